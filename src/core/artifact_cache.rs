//! Two-tier (memory + disk) preview artifact cache.
//!
//! - Memory tier: recency-ordered subset, bounded by entries and bytes
//! - Disk tier: authoritative index of files in the preview directory
//! - Sweeper: background thread for age expiry and periodic housekeeping
//!
//! Each tier's index sits behind its own mutex. When both are needed the disk
//! lock is taken first. Sizes are mirrored in atomics so `stats()` takes no
//! lock at all.
//!
//! The cache never coalesces concurrent generation for the same key; that is
//! `PreviewLoader`'s job. I/O failures become misses and are logged, never
//! returned to callers of `get`/`put`.

use log::{debug, info, trace};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use super::disk_tier::DiskTier;
use super::memory_tier::MemoryTier;
use super::sweeper::Sweeper;
use crate::entities::CacheKey;

/// File name of the shared placeholder artifact inside the cache directory
pub const PLACEHOLDER_FILE: &str = "placeholder.jpg";

// ============================================================================
// Errors and results
// ============================================================================

/// Failures opening or maintaining the cache directory
#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    /// Cache path exists but isn't a directory
    InvalidDirectory(PathBuf),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "Cache IO error: {}", e),
            CacheError::InvalidDirectory(p) => write!(f, "Not a directory: {}", p.display()),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(PathBuf),
    /// Caller must generate
    Miss,
}

impl Lookup {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Lookup::Found(p) => Some(p),
            Lookup::Miss => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

// ============================================================================
// Limits and statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLimits {
    pub memory_bytes: u64,
    pub memory_entries: usize,
    pub disk_bytes: u64,
    /// Artifacts <= memory_bytes / promotion_divisor are memory-eligible
    pub promotion_divisor: u64,
    pub max_age: Duration,
    pub sweep_interval: Duration,
    /// Every Nth sweep also trims memory and re-runs disk eviction
    pub housekeeping_every: u64,
    pub memory_trim_fraction: f64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 50 * 1024 * 1024,
            memory_entries: 200,
            disk_bytes: 200 * 1024 * 1024,
            promotion_divisor: 4,
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
            housekeeping_every: 10,
            memory_trim_fraction: 0.8,
        }
    }
}

/// Read-only snapshot of tier sizes and hit counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_bytes: u64,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.misses
    }

    pub fn hit_ratio(&self) -> f64 {
        let total = self.lookups();
        if total == 0 { 0.0 } else { (self.memory_hits + self.disk_hits) as f64 / total as f64 }
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_entries: AtomicUsize,
    memory_bytes: AtomicU64,
    disk_entries: AtomicUsize,
    disk_bytes: AtomicU64,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

// ============================================================================
// Cache
// ============================================================================

/// Shared with the sweeper thread.
struct CacheState {
    disk: Mutex<DiskTier>,
    memory: Mutex<MemoryTier>,
    counters: Counters,
    limits: CacheLimits,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl CacheState {
    fn sync_memory(&self, memory: &MemoryTier) {
        self.counters.memory_entries.store(memory.len(), Ordering::Relaxed);
        self.counters.memory_bytes.store(memory.total_bytes(), Ordering::Relaxed);
    }

    fn sync_disk(&self, disk: &DiskTier) {
        self.counters.disk_entries.store(disk.len(), Ordering::Relaxed);
        self.counters.disk_bytes.store(disk.total_bytes(), Ordering::Relaxed);
    }

    fn get(&self, key: &CacheKey) -> Lookup {
        {
            let mut memory = lock(&self.memory);
            if let Some(path) = memory.get(key) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                trace!("Memory hit: {}", key);
                return Lookup::Found(path.to_path_buf());
            }
        }

        let mut disk = lock(&self.disk);
        let result = match disk.lookup(key) {
            Some(entry) => {
                let mut memory = lock(&self.memory);
                memory.insert(*key, entry.path.clone(), entry.size_bytes);
                self.sync_memory(&memory);
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                trace!("Disk hit: {} (promoted: {})", key, memory.contains(key));
                Lookup::Found(entry.path)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Miss: {}", key);
                Lookup::Miss
            }
        };
        self.sync_disk(&disk);
        result
    }

    fn get_memory(&self, key: &CacheKey) -> Lookup {
        let mut memory = lock(&self.memory);
        match memory.get(key) {
            Some(path) => {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                Lookup::Found(path.to_path_buf())
            }
            None => Lookup::Miss,
        }
    }

    /// Disk eviction (file deletes) finishes before the memory lock is taken,
    /// so memory lookups never wait on disk I/O.
    fn put(&self, key: CacheKey, path: PathBuf, size_bytes: u64) {
        let mut disk = lock(&self.disk);
        disk.record(key, path.clone(), size_bytes);
        let evicted = if disk.is_over_limit() { disk.evict_to_limit() } else { Vec::new() };
        self.sync_disk(&disk);

        let mut memory = lock(&self.memory);
        memory.remove(&key);
        if !evicted.contains(&key) {
            memory.insert(key, path, size_bytes);
        }
        for gone in &evicted {
            memory.remove(gone);
        }
        self.sync_memory(&memory);
        debug!("Cached {} ({} bytes, {} evicted)", key, size_bytes, evicted.len());
    }

    fn evict_disk(&self) -> usize {
        let mut disk = lock(&self.disk);
        let evicted = disk.evict_to_limit();
        if !evicted.is_empty() {
            let mut memory = lock(&self.memory);
            for key in &evicted {
                memory.remove(key);
            }
            self.sync_memory(&memory);
        }
        self.sync_disk(&disk);
        evicted.len()
    }

    fn evict_memory_to_target(&self, fraction: f64) -> usize {
        let mut memory = lock(&self.memory);
        let count = memory.trim_to_fraction(fraction);
        self.sync_memory(&memory);
        count
    }

    fn sweep_expired(&self, max_age: Duration) -> usize {
        let mut disk = lock(&self.disk);
        let removed = disk.sweep_expired(max_age, SystemTime::now());
        if !removed.is_empty() {
            let mut memory = lock(&self.memory);
            for key in &removed {
                memory.remove(key);
            }
            self.sync_memory(&memory);
            debug!("Swept {} expired artifacts", removed.len());
        }
        self.sync_disk(&disk);
        removed.len()
    }

    fn invalidate(&self, key: &CacheKey) -> bool {
        let mut disk = lock(&self.disk);
        let mut memory = lock(&self.memory);
        let on_disk = disk.remove(key).is_some();
        let in_memory = memory.remove(key).is_some();
        self.sync_disk(&disk);
        self.sync_memory(&memory);
        on_disk || in_memory
    }

    fn clear_all(&self) -> usize {
        let mut disk = lock(&self.disk);
        let mut memory = lock(&self.memory);
        let count = disk.clear();
        memory.clear();
        self.sync_disk(&disk);
        self.sync_memory(&memory);
        count
    }

    /// One sweeper pass: expiry always, housekeeping every Nth pass.
    fn maintenance_pass(&self, pass_no: u64) {
        self.sweep_expired(self.limits.max_age);
        let every = self.limits.housekeeping_every.max(1);
        if pass_no % every == 0 {
            let disk = self.evict_disk();
            let memory = self.evict_memory_to_target(self.limits.memory_trim_fraction);
            debug!("Housekeeping: {} disk, {} memory entries evicted", disk, memory);
        }
    }
}

/// Preview artifact cache.
///
/// # Example
/// ```ignore
/// let cache = ArtifactCache::open(dir, CacheLimits::default())?;
/// match cache.get(&key) {
///     Lookup::Found(path) => show(path),
///     Lookup::Miss => loader.request(item),
/// }
/// ```
pub struct ArtifactCache {
    state: Arc<CacheState>,
    dir: PathBuf,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ArtifactCache {
    /// Open the cache directory and index existing artifacts.
    ///
    /// The background sweeper is not started; see `start_sweeper`.
    pub fn open(dir: impl Into<PathBuf>, limits: CacheLimits) -> Result<Self, CacheError> {
        let disk = DiskTier::open(dir, limits.disk_bytes)?;
        let memory = MemoryTier::new(limits.memory_bytes, limits.memory_entries, limits.promotion_divisor);
        let dir = disk.dir().to_path_buf();

        let state = Arc::new(CacheState {
            disk: Mutex::new(disk),
            memory: Mutex::new(memory),
            counters: Counters::default(),
            limits,
        });
        {
            let disk = lock(&state.disk);
            state.sync_disk(&disk);
        }
        // a directory left over from a bigger configuration
        state.evict_disk();

        let cache = Self { state, dir, sweeper: Mutex::new(None) };
        let stats = cache.stats();
        info!(
            "Artifact cache opened at {} ({} artifacts, {} bytes)",
            cache.dir.display(),
            stats.disk_entries,
            stats.disk_bytes
        );
        Ok(cache)
    }

    /// Start the periodic expiry/housekeeping thread (idempotent).
    pub fn start_sweeper(&self) -> Result<(), CacheError> {
        let mut slot = lock(&self.sweeper);
        if slot.as_ref().is_some_and(|s| s.is_running()) {
            return Ok(());
        }
        let state = Arc::clone(&self.state);
        let sweeper = Sweeper::spawn("loopfeed-sweeper", self.state.limits.sweep_interval, move |pass_no| {
            state.maintenance_pass(pass_no)
        })?;
        *slot = Some(sweeper);
        Ok(())
    }

    /// Stop the sweeper and wait for it. The cache stays usable.
    pub fn shutdown(&self) {
        if let Some(mut sweeper) = lock(&self.sweeper).take() {
            sweeper.stop();
        }
    }

    pub fn is_sweeping(&self) -> bool {
        lock(&self.sweeper).as_ref().is_some_and(|s| s.is_running())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.state.limits
    }

    /// Deterministic artifact path for a key (the file may not exist yet).
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        lock(&self.state.disk).path_for(key)
    }

    pub fn placeholder_path(&self) -> PathBuf {
        self.dir.join(PLACEHOLDER_FILE)
    }

    /// Memory tier first, then disk (promoting eligible hits).
    pub fn get(&self, key: &CacheKey) -> Lookup {
        self.state.get(key)
    }

    /// Memory tier only; never touches the filesystem. A miss here is not
    /// counted, the follow-up `get` does that.
    pub fn get_memory(&self, key: &CacheKey) -> Lookup {
        self.state.get_memory(key)
    }

    /// Record an artifact. Evicts from disk synchronously when over the ceiling.
    pub fn put(&self, key: CacheKey, path: impl Into<PathBuf>, size_bytes: u64) {
        self.state.put(key, path.into(), size_bytes)
    }

    /// LRU disk eviction down to the ceiling. Returns evicted count.
    pub fn evict_disk(&self) -> usize {
        self.state.evict_disk()
    }

    /// Trim the memory tier to `fraction` of its byte ceiling.
    pub fn evict_memory_to_target(&self, fraction: f64) -> usize {
        self.state.evict_memory_to_target(fraction)
    }

    /// Delete artifacts older than `max_age`. Returns removed count.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        self.state.sweep_expired(max_age)
    }

    /// Remove one artifact (e.g. its source changed).
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.state.invalidate(key)
    }

    /// Remove every indexed artifact. The placeholder survives.
    pub fn clear_all(&self) -> usize {
        let count = self.state.clear_all();
        info!("Artifact cache cleared ({} artifacts)", count);
        count
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.state.counters;
        CacheStats {
            memory_entries: c.memory_entries.load(Ordering::Relaxed),
            memory_bytes: c.memory_bytes.load(Ordering::Relaxed),
            disk_entries: c.disk_entries.load(Ordering::Relaxed),
            disk_bytes: c.disk_bytes.load(Ordering::Relaxed),
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            disk_hits: c.disk_hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn run_maintenance(&self, pass_no: u64) {
        self.state.maintenance_pass(pass_no)
    }
}

impl Drop for ArtifactCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn key(name: &str) -> CacheKey {
        CacheKey::for_source(name, 480, 800)
    }

    fn limits(memory: u64, disk: u64) -> CacheLimits {
        CacheLimits { memory_bytes: memory, disk_bytes: disk, ..CacheLimits::default() }
    }

    /// Write a small file but record a (possibly larger) logical size.
    fn put_artifact(cache: &ArtifactCache, name: &str, size: u64) -> PathBuf {
        let path = cache.path_for(&key(name));
        fs::write(&path, name.as_bytes()).unwrap();
        cache.put(key(name), path.clone(), size);
        path
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), CacheLimits::default()).unwrap();
        let path = put_artifact(&cache, "a", 1000);
        assert_eq!(cache.get(&key("a")), Lookup::Found(path));
        assert_eq!(cache.get(&key("missing")), Lookup::Miss);
    }

    #[test]
    fn test_disk_ceiling_keeps_latest() {
        // A 10MB then B 10MB with a 15MB disk ceiling
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), limits(50 * MB, 15 * MB)).unwrap();
        let a = put_artifact(&cache, "A", 10 * MB);
        let b = put_artifact(&cache, "B", 10 * MB);

        assert_eq!(cache.get(&key("A")), Lookup::Miss);
        assert_eq!(cache.get(&key("B")), Lookup::Found(b));
        assert!(!a.exists());
        assert!(cache.stats().disk_bytes <= 15 * MB);
    }

    #[test]
    fn test_disk_eviction_drops_memory_copy() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), limits(50 * MB, 15 * MB)).unwrap();
        put_artifact(&cache, "A", 10 * MB);
        assert!(matches!(cache.get_memory(&key("A")), Lookup::Found(_)));

        let b = put_artifact(&cache, "B", 10 * MB);
        assert_eq!(cache.get_memory(&key("A")), Lookup::Miss);
        assert_eq!(cache.get_memory(&key("B")), Lookup::Found(b));
        assert_eq!(cache.stats().memory_entries, 1);
    }

    #[test]
    fn test_memory_lookup_while_disk_busy() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), CacheLimits::default()).unwrap();
        let path = put_artifact(&cache, "a", 1000);

        // disk tier held as during eviction; memory tier stays reachable
        let _disk = lock(&cache.state.disk);
        let state = Arc::clone(&cache.state);
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handle = std::thread::spawn(move || {
            let _ = tx.send(state.get_memory(&key("a")));
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), Lookup::Found(path));
        handle.join().unwrap();
    }

    #[test]
    fn test_eviction_order_is_least_recently_accessed() {
        let tmp = TempDir::new().unwrap();
        // memory too small to hold anything, so every get goes to disk
        let cache = ArtifactCache::open(tmp.path(), limits(4, 30)).unwrap();
        put_artifact(&cache, "a", 10);
        put_artifact(&cache, "b", 10);
        put_artifact(&cache, "c", 10);
        assert!(cache.get(&key("a")).is_found());

        put_artifact(&cache, "d", 10);
        assert_eq!(cache.get(&key("b")), Lookup::Miss);
        assert!(cache.get(&key("a")).is_found());
        assert!(cache.get(&key("c")).is_found());
        assert!(cache.get(&key("d")).is_found());
    }

    #[test]
    fn test_disk_hit_promotes_to_memory() {
        let tmp = TempDir::new().unwrap();
        let path;
        {
            let cache = ArtifactCache::open(tmp.path(), limits(1000, 10_000)).unwrap();
            path = put_artifact(&cache, "a", 100);
        }
        // fresh process: only the disk index knows the artifact
        let cache = ArtifactCache::open(tmp.path(), limits(1000, 10_000)).unwrap();
        assert_eq!(cache.stats().memory_entries, 0);
        assert_eq!(cache.get(&key("a")), Lookup::Found(path.clone()));
        assert_eq!(cache.stats().memory_entries, 1);

        // second hit comes from memory even though the file is gone
        fs::remove_file(&path).unwrap();
        assert_eq!(cache.get(&key("a")), Lookup::Found(path));
        let stats = cache.stats();
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.memory_hits, 1);
    }

    #[test]
    fn test_large_artifact_not_promoted() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), limits(1000, 10_000)).unwrap();
        put_artifact(&cache, "big", 251);
        assert_eq!(cache.stats().memory_entries, 0);
        assert!(cache.get(&key("big")).is_found());
        assert_eq!(cache.stats().memory_entries, 0);
        assert_eq!(cache.stats().disk_hits, 1);
    }

    #[test]
    fn test_vanished_file_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), limits(4, 10_000)).unwrap();
        let path = put_artifact(&cache, "a", 100);
        fs::remove_file(path).unwrap();
        assert_eq!(cache.get(&key("a")), Lookup::Miss);
        assert_eq!(cache.stats().disk_entries, 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), CacheLimits::default()).unwrap();
        let a = put_artifact(&cache, "a", 10);
        put_artifact(&cache, "b", 10);
        fs::write(cache.placeholder_path(), b"ph").unwrap();

        assert!(cache.invalidate(&key("a")));
        assert!(!a.exists());
        assert_eq!(cache.get(&key("a")), Lookup::Miss);
        assert!(!cache.invalidate(&key("a")));

        assert_eq!(cache.clear_all(), 1);
        let stats = cache.stats();
        assert_eq!((stats.memory_entries, stats.disk_entries), (0, 0));
        assert!(cache.placeholder_path().exists());
    }

    #[test]
    fn test_stats_do_not_change_recency() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), limits(4, 20)).unwrap();
        put_artifact(&cache, "a", 10);
        put_artifact(&cache, "b", 10);
        let before = cache.stats();
        assert_eq!(before.disk_entries, 2);
        assert_eq!(before.lookups(), 0);
        put_artifact(&cache, "c", 10);
        assert_eq!(cache.get(&key("a")), Lookup::Miss);
    }

    #[test]
    fn test_sweep_expired_removes_from_both_tiers() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), CacheLimits::default()).unwrap();
        let old = put_artifact(&cache, "old", 10);
        put_artifact(&cache, "new", 10);
        let long_ago = SystemTime::now() - Duration::from_secs(3600);
        filetime::set_file_mtime(&old, FileTime::from_system_time(long_ago)).unwrap();

        assert_eq!(cache.sweep_expired(Duration::from_secs(60)), 1);
        assert_eq!(cache.get(&key("old")), Lookup::Miss);
        assert!(cache.get(&key("new")).is_found());
    }

    #[test]
    fn test_maintenance_trims_memory_on_housekeeping_pass() {
        let tmp = TempDir::new().unwrap();
        let cache = ArtifactCache::open(tmp.path(), limits(1000, 100_000)).unwrap();
        for name in ["a", "b", "c", "d"] {
            put_artifact(&cache, name, 250);
        }
        cache.run_maintenance(1);
        assert_eq!(cache.stats().memory_bytes, 1000);
        cache.run_maintenance(10);
        assert_eq!(cache.stats().memory_bytes, 750);
    }

    #[test]
    fn test_sweeper_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let lim = CacheLimits { sweep_interval: Duration::from_millis(10), ..CacheLimits::default() };
        let cache = ArtifactCache::open(tmp.path(), lim).unwrap();
        cache.start_sweeper().unwrap();
        cache.start_sweeper().unwrap();
        assert!(cache.is_sweeping());
        cache.shutdown();
        assert!(!cache.is_sweeping());
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats { memory_hits: 2, disk_hits: 1, misses: 1, ..CacheStats::default() };
        assert_eq!(stats.lookups(), 4);
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
