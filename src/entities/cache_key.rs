//! Preview cache key.
//!
//! Derived from (source locator, target width, target height) with a
//! name-based UUID, so the same request always maps to the same key and
//! the key doubles as the artifact's file stem on disk.

use std::fmt;
use uuid::Uuid;

/// Namespace for preview keys (fixed, so keys survive restarts)
const PREVIEW_NAMESPACE: Uuid = Uuid::from_u128(0x6c6f_6f70_6665_6564_9a1e_4b3f_2d7c_0e11);

/// Deterministic identity of one generated preview.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Uuid);

impl CacheKey {
    /// Key for a source rendered into a `width` x `height` bounding box.
    pub fn for_source(locator: &str, width: u32, height: u32) -> Self {
        let name = format!("{}:{}:{}", locator.trim(), width, height);
        Self(Uuid::new_v5(&PREVIEW_NAMESPACE, name.as_bytes()))
    }

    /// Parse a key back from an artifact file stem.
    ///
    /// Returns None for anything that isn't a key we could have produced
    /// (placeholder, temp files, foreign files in the directory).
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        if stem.len() != 32 {
            return None;
        }
        Uuid::try_parse(stem).ok().map(Self)
    }

    /// File stem used on disk (32 lowercase hex chars).
    pub fn file_stem(&self) -> String {
        self.0.simple().to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_request_same_key() {
        let a = CacheKey::for_source("/media/clip.mp4", 480, 800);
        let b = CacheKey::for_source("/media/clip.mp4", 480, 800);
        assert_eq!(a, b);
    }

    #[test]
    fn test_size_changes_key() {
        let a = CacheKey::for_source("/media/clip.mp4", 480, 800);
        let b = CacheKey::for_source("/media/clip.mp4", 240, 400);
        let c = CacheKey::for_source("/media/other.mp4", 480, 800);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_file_stem_roundtrip() {
        let key = CacheKey::for_source("/media/clip.mp4", 480, 800);
        let stem = key.file_stem();
        assert_eq!(stem.len(), 32);
        assert_eq!(CacheKey::from_file_stem(&stem), Some(key));
        assert_eq!(key.to_string(), stem);
    }

    #[test]
    fn test_foreign_stems_rejected() {
        assert_eq!(CacheKey::from_file_stem("placeholder"), None);
        assert_eq!(CacheKey::from_file_stem(""), None);
        assert_eq!(CacheKey::from_file_stem("zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"), None);
    }
}
