use std::process::ExitCode;

use assetrun::{cli, logging, run};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = cli::parse();

    if let Err(e) = logging::init() {
        eprintln!("assetrun: couldn't set up logging: {e}");
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
