//! Command line arguments.

use clap::Parser;

/// Build front-end assets, or serve them with live reload.
#[derive(Debug, Clone, Parser)]
#[command(name = "assetrun", version, about, long_about = None)]
pub struct Args {
    /// Task to run.
    ///
    /// `default` compiles everything and starts the dev server with the
    /// watch loop, `dist` produces a production build.
    #[arg(value_name = "TASK", default_value = "default")]
    pub task: String,

    /// Print the registered tasks and exit.
    #[arg(long)]
    pub list: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_task() {
        let args = Args::try_parse_from(["assetrun"]).unwrap();
        assert_eq!(args.task, "default");
        assert!(!args.list);
    }

    #[test]
    fn test_named_task_and_list() {
        let args = Args::try_parse_from(["assetrun", "dist"]).unwrap();
        assert_eq!(args.task, "dist");

        let args = Args::try_parse_from(["assetrun", "--list"]).unwrap();
        assert!(args.list);
    }
}
