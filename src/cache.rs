use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};

/// 32 bytes length generic hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// Remembers the contents of every image already optimized in this process,
/// so repeated optimization runs only touch files that changed.
///
/// Lives in the task [`Context`](crate::Context) and is reset by the `clear`
/// task.
#[derive(Debug, Default)]
pub struct ImageCache {
    seen: Mutex<HashMap<Utf8PathBuf, Hash32>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `contents` differ from what was last recorded for
    /// `path`, recording the new contents. Unknown paths count as changed.
    pub fn changed(&self, path: &Utf8Path, contents: &[u8]) -> bool {
        let hash = Hash32::hash(contents);
        let mut seen = self.seen.lock().unwrap();

        match seen.insert(path.to_owned(), hash) {
            Some(old) => old != hash,
            None => true,
        }
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_hex() {
        let hex = Hash32::hash(b"abc").to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(
            hex,
            "6437b3ac38465133ffb63b75273a8db548c558465d79db03fd359c6cd5bd9d85"
        );
    }

    #[test]
    fn test_cache_passes_changed_files_only() {
        let cache = ImageCache::new();
        let path = Utf8Path::new("assets/images/a.png");

        assert!(cache.changed(path, b"one"));
        assert!(!cache.changed(path, b"one"));
        assert!(cache.changed(path, b"two"));
        assert!(cache.changed(Utf8Path::new("assets/images/b.png"), b"two"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let cache = ImageCache::new();
        let path = Utf8Path::new("a.gif");

        cache.changed(path, b"gif");
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.changed(path, b"gif"));
    }
}
