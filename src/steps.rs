//! Leaf steps and the standard task registry wiring them together.

pub mod css;
pub mod images;
pub mod live;
pub mod scripts;
pub mod styles;
pub mod templates;

use crate::bundler::Mode;
use crate::error::RegistryError;
use crate::task::{Registry, Task};

/// Every task the CLI knows about.
pub fn registry() -> Registry {
    // The task table below is static, so a failure here is a programming
    // error caught by `test_standard_registry_is_valid`.
    build().expect("the standard task registry is well formed")
}

fn build() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();

    registry
        // styles
        .add(Task::step("sass-others", styles::SassOthers))?
        .add(Task::step("sass-main", styles::SassMain))?
        .add(Task::sequential("sass", ["sass-others", "sass-main"]))?
        // templates
        .add(Task::step("pug", templates::Templates))?
        // scripts
        .add(Task::step("bundle-dev", scripts::Bundle(Mode::Development)))?
        .add(Task::step("bundle-dist", scripts::Bundle(Mode::Production)))?
        .add(Task::step("clean-scripts", scripts::CleanScripts))?
        .add(Task::step("copy-scripts", scripts::CopyScripts))?
        .add(Task::sequential("build", ["clean-scripts", "copy-scripts"]))?
        // images
        .add(Task::step("copy-images", images::CopyImages))?
        .add(Task::step("optimize-images", images::OptimizeImages))?
        .add(Task::step("clear", images::ClearCache))?
        // production css
        .add(Task::step("remove-sourcemaps", css::RemoveSourceMaps))?
        .add(Task::step("beautify-main", css::BeautifyMain))?
        .add(Task::step("beautify-other", css::BeautifyOther))?
        .add(Task::parallel("beautify", ["beautify-main", "beautify-other"]))?
        // dev server
        .add(Task::step("reload", live::Reload))?
        .add(Task::step("watch", live::Watch))?
        .add(Task::step("serve", live::Serve))?
        // entry points
        .add(Task::sequential(
            "dist",
            [
                "build",
                "bundle-dist",
                "optimize-images",
                "remove-sourcemaps",
                "beautify",
            ],
        ))?
        .add(Task::parallel(
            "default",
            [
                "clear",
                "build",
                "bundle-dev",
                "sass",
                "copy-images",
                "pug",
                "watch",
                "serve",
            ],
        ))?;

    registry.validate()?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    #[test]
    fn test_standard_registry_is_valid() {
        build().unwrap();
    }

    #[test]
    fn test_entry_points() {
        let registry = registry();

        let dist = registry.get("dist").unwrap();
        assert_eq!(dist.kind(), TaskKind::Sequential);
        assert_eq!(
            dist.dependencies(),
            [
                "build",
                "bundle-dist",
                "optimize-images",
                "remove-sourcemaps",
                "beautify"
            ]
        );

        let default = registry.get("default").unwrap();
        assert_eq!(default.kind(), TaskKind::Parallel);
        assert!(default.dependencies().iter().any(|d| d == "serve"));
        assert!(default.dependencies().iter().any(|d| d == "watch"));

        let sass = registry.get("sass").unwrap();
        assert_eq!(sass.kind(), TaskKind::Sequential);
        assert_eq!(sass.dependencies(), ["sass-others", "sass-main"]);
        assert_eq!(
            registry.get("sass-others").unwrap().kind(),
            TaskKind::SourceTransform
        );
        assert!(registry.get("sass-partials").is_none());

        assert_eq!(registry.get("beautify").unwrap().kind(), TaskKind::Parallel);
        assert_eq!(registry.get("clear").unwrap().kind(), TaskKind::CacheReset);
        assert_eq!(registry.get("clean-scripts").unwrap().kind(), TaskKind::Delete);
        assert_eq!(registry.get("serve").unwrap().kind(), TaskKind::ServerStart);
        assert_eq!(registry.get("watch").unwrap().kind(), TaskKind::WatchRegister);
    }

    #[test]
    fn test_only_dev_tasks_are_long_lived() {
        let registry = registry();

        for name in ["default", "serve", "watch"] {
            assert!(registry.is_long_lived(name), "{name}");
        }
        for name in ["dist", "build", "sass", "beautify", "reload", "clear"] {
            assert!(!registry.is_long_lived(name), "{name}");
        }
    }
}
