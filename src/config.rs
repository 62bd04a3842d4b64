//! Settings file and the resolved project layout.
//!
//! The settings live in `assetrun.json` at the project root. Every key is
//! required once the file exists; without the file the built-in layout is
//! used:
//!
//! ```json
//! {
//!   "imagesDir": { "entry": "assets/images/", "output": "images/" },
//!   "scssDir": {
//!     "entry": "assets/scss/",
//!     "output": "css/",
//!     "mainFileName": "style",
//!     "mainFileOutput": "./"
//!   },
//!   "pugDir": { "entry": "assets/", "output": "" },
//!   "jsDir": { "entry": "assets/js/", "output": "js/" },
//!   "jsNames": { "names": ["main", "jquery.main"] }
//! }
//! ```

use std::collections::HashSet;
use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

pub const SETTINGS_FILE: &str = "assetrun.json";

/// Entry and output directory of one asset category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetDir {
    pub entry: String,
    pub output: String,
}

/// Style directories, plus where the main stylesheet goes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StyleDir {
    pub entry: String,
    pub output: String,
    pub main_file_name: String,
    pub main_file_output: String,
}

/// Ordered logical script names, e.g. `main` for `assets/js/main.js`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptNames {
    pub names: Vec<String>,
}

impl ScriptNames {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// File names exempt from script cleanup and from the unbundled copy.
    pub fn protected(&self) -> ProtectedScripts {
        ProtectedScripts(self.names.iter().map(|name| format!("{name}.js")).collect())
    }
}

/// Set of bundle file names (`<name>.js`) that must never be deleted from
/// the scripts output directory.
#[derive(Debug, Clone)]
pub struct ProtectedScripts(HashSet<String>);

impl ProtectedScripts {
    pub fn contains(&self, file_name: &str) -> bool {
        self.0.contains(file_name)
    }
}

/// Raw contents of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    pub images_dir: AssetDir,
    pub scss_dir: StyleDir,
    pub pug_dir: AssetDir,
    pub js_dir: AssetDir,
    pub js_names: ScriptNames,
}

impl Default for Settings {
    fn default() -> Self {
        let dir = |entry: &str, output: &str| AssetDir {
            entry: entry.into(),
            output: output.into(),
        };

        Self {
            images_dir: dir("assets/images/", "images/"),
            scss_dir: StyleDir {
                entry: "assets/scss/".into(),
                output: "css/".into(),
                main_file_name: "style".into(),
                main_file_output: "./".into(),
            },
            pug_dir: dir("assets/", ""),
            js_dir: dir("assets/js/", "js/"),
            js_names: ScriptNames {
                names: vec!["main".into(), "jquery.main".into()],
            },
        }
    }
}

impl Settings {
    /// Read `assetrun.json` from the project root, falling back to the
    /// built-in layout when the file does not exist.
    pub fn load(root: &Utf8Path) -> Result<Self, ConfigError> {
        let path = root.join(SETTINGS_FILE);

        if !path.exists() {
            tracing::debug!("no {SETTINGS_FILE} found, using the built-in layout");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        Self::parse(&path, &text)
    }

    pub fn parse(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(path.to_owned(), e))
    }

    /// Validate the settings and anchor every directory at `root`.
    pub fn resolve(self, root: &Utf8Path) -> Result<Paths, ConfigError> {
        let root = root
            .canonicalize_utf8()
            .map_err(|e| ConfigError::Root(root.to_owned(), e))?;

        if self.js_names.names.is_empty() {
            return Err(ConfigError::Invalid {
                key: "jsNames.names",
                reason: "at least one script name is required".into(),
            });
        }

        let mut seen = HashSet::new();
        for name in self.js_names.iter() {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(ConfigError::Invalid {
                    key: "jsNames.names",
                    reason: format!("'{name}' is not a plain file stem"),
                });
            }
            if !seen.insert(name) {
                return Err(ConfigError::Invalid {
                    key: "jsNames.names",
                    reason: format!("'{name}' is listed twice"),
                });
            }
        }

        let main_name = self.scss_dir.main_file_name;
        if main_name.is_empty() || main_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                key: "scssDir.mainFileName",
                reason: format!("'{main_name}' is not a plain file stem"),
            });
        }

        Ok(Paths {
            images: Dirs {
                entry: resolve_dir(&root, "imagesDir.entry", &self.images_dir.entry)?,
                output: resolve_dir(&root, "imagesDir.output", &self.images_dir.output)?,
            },
            styles: StyleDirs {
                entry: resolve_dir(&root, "scssDir.entry", &self.scss_dir.entry)?,
                output: resolve_dir(&root, "scssDir.output", &self.scss_dir.output)?,
                main_output: resolve_dir(
                    &root,
                    "scssDir.mainFileOutput",
                    &self.scss_dir.main_file_output,
                )?,
                main_name,
            },
            templates: Dirs {
                entry: resolve_dir(&root, "pugDir.entry", &self.pug_dir.entry)?,
                output: resolve_dir(&root, "pugDir.output", &self.pug_dir.output)?,
            },
            scripts: Dirs {
                entry: resolve_dir(&root, "jsDir.entry", &self.js_dir.entry)?,
                output: resolve_dir(&root, "jsDir.output", &self.js_dir.output)?,
            },
            script_names: self.js_names,
            root,
        })
    }
}

/// Joins a relative directory string onto the root. Absolute paths and `..`
/// segments are rejected so that every task stays inside the project.
fn resolve_dir(root: &Utf8Path, key: &'static str, value: &str) -> Result<Utf8PathBuf, ConfigError> {
    let mut path = root.to_path_buf();

    for component in Utf8Path::new(value).components() {
        match component {
            Utf8Component::Normal(part) => path.push(part),
            Utf8Component::CurDir => {}
            _ => {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("'{value}' must be a path relative to the project root"),
                });
            }
        }
    }

    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirs {
    pub entry: Utf8PathBuf,
    pub output: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleDirs {
    pub entry: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub main_name: String,
    pub main_output: Utf8PathBuf,
}

impl StyleDirs {
    pub fn main_source(&self) -> Utf8PathBuf {
        self.entry.join(format!("{}.scss", self.main_name))
    }

    pub fn main_css(&self) -> Utf8PathBuf {
        self.main_output.join(format!("{}.css", self.main_name))
    }

    pub fn main_map(&self) -> Utf8PathBuf {
        self.main_output.join(format!("{}.css.map", self.main_name))
    }
}

/// The project layout with every directory resolved to an absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub root: Utf8PathBuf,
    pub images: Dirs,
    pub styles: StyleDirs,
    pub templates: Dirs,
    pub scripts: Dirs,
    pub script_names: ScriptNames,
}

impl Paths {
    /// Load the settings under `root` and resolve them in one go.
    pub fn load(root: &Utf8Path) -> Result<Self, ConfigError> {
        Settings::load(root)?.resolve(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let (_dir, root) = tmp_root();
        let paths = Paths::load(&root).unwrap();
        let root = root.canonicalize_utf8().unwrap();

        assert_eq!(paths.images.entry, root.join("assets/images"));
        assert_eq!(paths.styles.output, root.join("css"));
        assert_eq!(paths.styles.main_css(), root.join("style.css"));
        assert_eq!(paths.templates.output, root);
        assert_eq!(paths.scripts.entry, root.join("assets/js"));
        assert_eq!(
            paths.script_names.iter().collect::<Vec<_>>(),
            vec!["main", "jquery.main"]
        );
    }

    #[test]
    fn test_parse_full_file() {
        let text = r#"{
            "imagesDir": { "entry": "src/img/", "output": "public/img/" },
            "scssDir": {
                "entry": "src/scss/",
                "output": "public/css/",
                "mainFileName": "app",
                "mainFileOutput": "public/"
            },
            "pugDir": { "entry": "src/", "output": "public/" },
            "jsDir": { "entry": "src/js/", "output": "public/js/" },
            "jsNames": { "names": ["app"] }
        }"#;

        let settings = Settings::parse(Utf8Path::new("assetrun.json"), text).unwrap();
        assert_eq!(settings.scss_dir.main_file_name, "app");
        assert_eq!(settings.js_names.names, vec!["app".to_string()]);
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let text = r#"{
            "imagesDir": { "entry": "a/", "output": "b/" },
            "pugDir": { "entry": "a/", "output": "" },
            "jsDir": { "entry": "a/", "output": "b/" },
            "jsNames": { "names": ["main"] }
        }"#;

        let err = Settings::parse(Utf8Path::new("assetrun.json"), text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(..)));
        assert!(err.to_string().contains("scssDir"));
    }

    #[test]
    fn test_malformed_file_fails_at_load() {
        let (_dir, root) = tmp_root();
        fs::write(root.join(SETTINGS_FILE), "{ not json").unwrap();

        assert!(matches!(Paths::load(&root), Err(ConfigError::Parse(..))));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let (_dir, root) = tmp_root();
        let mut settings = Settings::default();
        settings.js_dir.output = "../elsewhere/".into();

        let err = settings.resolve(&root).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "jsDir.output", .. }));
    }

    #[test]
    fn test_rejects_bad_script_names() {
        let (_dir, root) = tmp_root();

        let mut settings = Settings::default();
        settings.js_names.names.clear();
        assert!(settings.resolve(&root).is_err());

        let mut settings = Settings::default();
        settings.js_names.names = vec!["main".into(), "main".into()];
        assert!(settings.resolve(&root).is_err());

        let mut settings = Settings::default();
        settings.js_names.names = vec!["lib/main".into()];
        assert!(settings.resolve(&root).is_err());
    }

    #[test]
    fn test_protected_scripts() {
        let protected = Settings::default().js_names.protected();

        assert!(protected.contains("main.js"));
        assert!(protected.contains("jquery.main.js"));
        assert!(!protected.contains("main.js.map"));
        assert!(!protected.contains("vendor.js"));
        assert!(!protected.contains("jquery.js"));
    }
}
