//! Disk tier of the artifact cache.
//!
//! Authoritative index of known artifacts. Files live in one directory and are
//! named `<key>.jpg`, so a fresh process rebuilds the index by listing it.
//!
//! Recency is a monotonic access sequence (a logical `lastAccessed`), so two
//! accesses within the same clock tick still order correctly. Wall-clock
//! times are kept for age reporting.

use log::{debug, trace, warn};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::artifact_cache::CacheError;
use crate::entities::CacheKey;

/// Artifact file extension
pub const ARTIFACT_EXT: &str = "jpg";

#[derive(Debug, Clone)]
pub struct DiskEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_accessed: SystemTime,
    pub access_count: u64,
    access_seq: u64,
}

pub struct DiskTier {
    dir: PathBuf,
    entries: HashMap<CacheKey, DiskEntry>,
    total_bytes: u64,
    max_bytes: u64,
    seq: u64,
}

impl DiskTier {
    /// Open (creating if needed) the artifact directory and index its contents.
    pub fn open(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(CacheError::InvalidDirectory(dir));
        }
        fs::create_dir_all(&dir)?;

        let mut tier = Self {
            dir,
            entries: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            seq: 0,
        };
        tier.scan()?;
        Ok(tier)
    }

    /// Rebuild the index from the directory listing.
    ///
    /// Access order is seeded from file mtimes; leftover temp files from an
    /// interrupted write are removed.
    fn scan(&mut self) -> Result<(), CacheError> {
        let mut found: Vec<(CacheKey, PathBuf, u64, SystemTime)> = Vec::new();

        for dir_entry in fs::read_dir(&self.dir)? {
            let dir_entry = match dir_entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Disk tier: unreadable entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            let path = dir_entry.path();
            let meta = match dir_entry.metadata() {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            if path.extension().is_some_and(|ext| ext == "tmp") {
                trace!("Disk tier: removing stale temp file {}", path.display());
                let _ = fs::remove_file(&path);
                continue;
            }
            if path.extension().is_none_or(|ext| ext != ARTIFACT_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()).and_then(CacheKey::from_file_stem) else {
                continue;
            };
            let mtime = meta.modified().unwrap_or_else(|_| SystemTime::now());
            found.push((key, path, meta.len(), mtime));
        }

        found.sort_by_key(|(_, _, _, mtime)| *mtime);
        for (key, path, size, mtime) in found {
            self.seq += 1;
            self.total_bytes += size;
            self.entries.insert(
                key,
                DiskEntry {
                    path,
                    size_bytes: size,
                    last_accessed: mtime,
                    access_count: 0,
                    access_seq: self.seq,
                },
            );
        }

        debug!(
            "Disk tier: indexed {} artifacts ({} bytes) in {}",
            self.entries.len(),
            self.total_bytes,
            self.dir.display()
        );
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic artifact path for a key.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.file_stem(), ARTIFACT_EXT))
    }

    /// Lookup, verifying the file still exists.
    ///
    /// A hit updates recency and access count. An index entry whose file
    /// vanished is dropped and reported as a miss.
    pub fn lookup(&mut self, key: &CacheKey) -> Option<DiskEntry> {
        let exists = self.entries.get(key)?.path.exists();
        if !exists {
            warn!("Disk tier: artifact for {} disappeared, dropping index entry", key);
            self.forget(key);
            return None;
        }

        self.seq += 1;
        let seq = self.seq;
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed = SystemTime::now();
        entry.access_count += 1;
        entry.access_seq = seq;
        Some(entry.clone())
    }

    pub fn peek(&self, key: &CacheKey) -> Option<&DiskEntry> {
        self.entries.get(key)
    }

    /// Record an artifact as most recently used (replacing any previous entry).
    pub fn record(&mut self, key: CacheKey, path: PathBuf, size_bytes: u64) {
        self.seq += 1;
        let entry = DiskEntry {
            path,
            size_bytes,
            last_accessed: SystemTime::now(),
            access_count: 0,
            access_seq: self.seq,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.total_bytes += size_bytes;
    }

    pub fn is_over_limit(&self) -> bool {
        self.total_bytes > self.max_bytes
    }

    /// Delete least-recently-accessed artifacts until the total fits the ceiling.
    ///
    /// Returns the evicted keys. Missing or undeletable files don't stop the pass.
    pub fn evict_to_limit(&mut self) -> Vec<CacheKey> {
        if !self.is_over_limit() {
            return Vec::new();
        }

        let mut order: Vec<(u64, CacheKey)> = self.entries.iter().map(|(k, e)| (e.access_seq, *k)).collect();
        order.sort_unstable();

        let mut evicted = Vec::new();
        for (_, key) in order {
            if !self.is_over_limit() {
                break;
            }
            if let Some(entry) = self.forget(&key) {
                delete_file(&entry.path);
                debug!("Disk tier: evicted {} ({} bytes)", key, entry.size_bytes);
                evicted.push(key);
            }
        }
        evicted
    }

    /// Delete artifacts whose file is older than `max_age` at `now`.
    ///
    /// Age is measured from the file's modification time. Entries whose file
    /// is already gone are dropped too.
    pub fn sweep_expired(&mut self, max_age: Duration, now: SystemTime) -> Vec<CacheKey> {
        let mut expired = Vec::new();
        let mut vanished = Vec::new();

        for (key, entry) in &self.entries {
            match fs::metadata(&entry.path).and_then(|m| m.modified()) {
                Ok(mtime) => {
                    // mtime in the future counts as fresh
                    let age = now.duration_since(mtime).unwrap_or_default();
                    if age > max_age {
                        expired.push(*key);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => vanished.push(*key),
                Err(e) => warn!("Disk tier: can't stat {}: {}", entry.path.display(), e),
            }
        }

        for key in &vanished {
            self.forget(key);
        }
        for key in &expired {
            if let Some(entry) = self.forget(key) {
                delete_file(&entry.path);
                debug!("Disk tier: expired {}", key);
            }
        }

        expired.extend(vanished);
        expired
    }

    /// Drop an entry and delete its file.
    pub fn remove(&mut self, key: &CacheKey) -> Option<DiskEntry> {
        let entry = self.forget(key)?;
        delete_file(&entry.path);
        Some(entry)
    }

    /// Delete every indexed artifact. Returns the number of removed entries.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            delete_file(&entry.path);
        }
        self.total_bytes = 0;
        count
    }

    fn forget(&mut self, key: &CacheKey) -> Option<DiskEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

/// Remove a file, treating "already gone" as success.
fn delete_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            trace!("Disk tier: {} already gone", path.display());
        }
        Err(e) => warn!("Disk tier: failed to delete {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::for_source(name, 480, 800)
    }

    fn write_artifact(tier: &DiskTier, name: &str, bytes: usize) -> PathBuf {
        let path = tier.path_for(&key(name));
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[test]
    fn test_open_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("previews");
        let tier = DiskTier::open(&dir, 1000).unwrap();
        assert!(dir.is_dir());
        assert!(tier.is_empty());
    }

    #[test]
    fn test_open_rejects_file_path() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(DiskTier::open(&file, 1000), Err(CacheError::InvalidDirectory(_))));
    }

    #[test]
    fn test_record_and_lookup() {
        let tmp = TempDir::new().unwrap();
        let mut tier = DiskTier::open(tmp.path(), 1000).unwrap();
        let path = write_artifact(&tier, "a", 10);
        tier.record(key("a"), path.clone(), 10);

        let hit = tier.lookup(&key("a")).unwrap();
        assert_eq!(hit.path, path);
        assert_eq!(hit.access_count, 1);
        assert_eq!(tier.lookup(&key("a")).unwrap().access_count, 2);
        assert_eq!(tier.total_bytes(), 10);
    }

    #[test]
    fn test_lookup_drops_vanished_file() {
        let tmp = TempDir::new().unwrap();
        let mut tier = DiskTier::open(tmp.path(), 1000).unwrap();
        let path = write_artifact(&tier, "a", 10);
        tier.record(key("a"), path.clone(), 10);
        fs::remove_file(&path).unwrap();

        assert!(tier.lookup(&key("a")).is_none());
        assert!(tier.is_empty());
        assert_eq!(tier.total_bytes(), 0);
    }

    #[test]
    fn test_evict_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let mut tier = DiskTier::open(tmp.path(), 25).unwrap();
        for name in ["a", "b", "c"] {
            let path = write_artifact(&tier, name, 10);
            tier.record(key(name), path, 10);
        }
        // a is now the most recent
        tier.lookup(&key("a"));

        let evicted = tier.evict_to_limit();
        assert_eq!(evicted, vec![key("b")]);
        assert!(tier.total_bytes() <= 25);
        assert!(!tier.path_for(&key("b")).exists());
        assert!(tier.peek(&key("a")).is_some());
        assert!(tier.peek(&key("c")).is_some());
    }

    #[test]
    fn test_evict_tolerates_missing_files() {
        let tmp = TempDir::new().unwrap();
        let mut tier = DiskTier::open(tmp.path(), 10).unwrap();
        // indexed but never written
        tier.record(key("ghost"), tier.path_for(&key("ghost")), 10);
        let path = write_artifact(&tier, "real", 10);
        tier.record(key("real"), path, 10);

        let evicted = tier.evict_to_limit();
        assert_eq!(evicted, vec![key("ghost")]);
        assert_eq!(tier.total_bytes(), 10);
    }

    #[test]
    fn test_scan_rebuilds_index_in_mtime_order() {
        let tmp = TempDir::new().unwrap();
        {
            let tier = DiskTier::open(tmp.path(), 1000).unwrap();
            let old = write_artifact(&tier, "old", 10);
            let new = write_artifact(&tier, "new", 10);
            filetime::set_file_mtime(&old, FileTime::from_unix_time(1_000_000, 0)).unwrap();
            filetime::set_file_mtime(&new, FileTime::from_unix_time(2_000_000, 0)).unwrap();
            fs::write(tmp.path().join("placeholder.jpg"), b"ph").unwrap();
            fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
            fs::write(tmp.path().join("abc.jpg.tmp"), b"partial").unwrap();
        }

        let mut tier = DiskTier::open(tmp.path(), 15).unwrap();
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.total_bytes(), 20);
        assert!(!tmp.path().join("abc.jpg.tmp").exists());

        // oldest mtime goes first
        assert_eq!(tier.evict_to_limit(), vec![key("old")]);
        assert!(tmp.path().join("placeholder.jpg").exists());
    }

    #[test]
    fn test_sweep_expired() {
        let tmp = TempDir::new().unwrap();
        let mut tier = DiskTier::open(tmp.path(), 1000).unwrap();
        let stale = write_artifact(&tier, "stale", 10);
        let fresh = write_artifact(&tier, "fresh", 10);
        tier.record(key("stale"), stale.clone(), 10);
        tier.record(key("fresh"), fresh.clone(), 10);

        let now = SystemTime::now();
        let eight_days_ago = now - Duration::from_secs(8 * 24 * 3600);
        filetime::set_file_mtime(&stale, FileTime::from_system_time(eight_days_ago)).unwrap();

        let removed = tier.sweep_expired(Duration::from_secs(7 * 24 * 3600), now);
        assert_eq!(removed, vec![key("stale")]);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let tmp = TempDir::new().unwrap();
        let mut tier = DiskTier::open(tmp.path(), 1000).unwrap();
        for name in ["a", "b"] {
            let path = write_artifact(&tier, name, 10);
            tier.record(key(name), path, 10);
        }
        assert!(tier.remove(&key("a")).is_some());
        assert!(!tier.path_for(&key("a")).exists());
        assert_eq!(tier.clear(), 1);
        assert!(tier.is_empty());
        assert_eq!(tier.total_bytes(), 0);
    }
}
