use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use glob::MatchOptions;

use crate::error::{FsError, StepError};

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Match options shared by every source glob. A `*` never crosses a
/// directory boundary, only `**` does.
pub const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Expand `pattern` relative to `base` into a sorted list of files.
/// The base directory is escaped, so it may contain glob metacharacters.
pub fn find(base: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, StepError> {
    let full = format!("{}/{}", glob::Pattern::escape(base.as_str()), pattern);
    let mut files = Vec::new();

    for entry in glob::glob_with(&full, MATCH)? {
        let path = entry.map_err(|e| {
            let path = Utf8PathBuf::from(e.path().to_string_lossy().into_owned());
            FsError::new("scan", path, e.into_error())
        })?;

        match Utf8PathBuf::try_from(path) {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!("skipping non UTF-8 path {:?}", e.into_path_buf()),
        }
    }

    files.sort();
    Ok(files)
}

pub fn read(path: &Utf8Path) -> Result<Vec<u8>, FsError> {
    fs::read(path).map_err(|e| FsError::new("read", path, e))
}

pub fn read_to_string(path: &Utf8Path) -> Result<String, FsError> {
    fs::read_to_string(path).map_err(|e| FsError::new("read", path, e))
}

/// Write a file, creating missing parent directories.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> Result<(), FsError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| FsError::new("create directory", dir, e))?;
    }

    fs::write(path, data).map_err(|e| FsError::new("write", path, e))
}

/// Copy a file, creating missing parent directories.
pub fn copy(src: &Utf8Path, dst: &Utf8Path) -> Result<(), FsError> {
    if let Some(dir) = dst.parent() {
        fs::create_dir_all(dir).map_err(|e| FsError::new("create directory", dir, e))?;
    }

    fs::copy(src, dst).map_err(|e| FsError::new("copy", src, e))?;
    Ok(())
}

/// Remove a file or a whole directory tree.
pub fn remove(path: &Utf8Path) -> Result<(), FsError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|e| FsError::new("remove", path, e))
}

/// Path relative to the project root, for log lines.
pub fn short<'a>(path: &'a Utf8Path, root: &Utf8Path) -> &'a Utf8Path {
    path.strip_prefix(root).unwrap_or(path)
}

/// Map `file` under `from` to the same relative location under `to`.
pub fn rebase(file: &Utf8Path, from: &Utf8Path, to: &Utf8Path) -> Utf8PathBuf {
    match file.strip_prefix(from) {
        Ok(rel) => to.join(rel),
        Err(_) => to.join(file.file_name().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_respects_separators() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap();

        write(&base.join("a.scss"), "").unwrap();
        write(&base.join("b.scss"), "").unwrap();
        write(&base.join("nested/c.scss"), "").unwrap();
        write(&base.join(".hidden.scss"), "").unwrap();

        let top = find(base, "*.scss").unwrap();
        assert_eq!(top, vec![base.join("a.scss"), base.join("b.scss")]);

        let all = find(base, "**/*.scss").unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.contains(&base.join("nested/c.scss")));
    }

    #[test]
    fn test_find_escapes_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap().join("weird[dir]");

        write(&base.join("x.pug"), "").unwrap();

        assert_eq!(find(&base, "*.pug").unwrap(), vec![base.join("x.pug")]);
    }

    #[test]
    fn test_find_missing_base_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap().join("nope");

        assert!(find(&base, "**/*").unwrap().is_empty());
    }

    #[test]
    fn test_rebase() {
        let out = rebase(
            Utf8Path::new("/p/assets/images/icons/a.png"),
            Utf8Path::new("/p/assets/images"),
            Utf8Path::new("/p/images"),
        );
        assert_eq!(out, Utf8PathBuf::from("/p/images/icons/a.png"));
    }
}
