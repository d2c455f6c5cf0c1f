//! Preview loading with request dedup and stale-work cancellation.
//!
//! Sits between the feed controller and the artifact cache:
//! - memory-tier hits are answered immediately
//! - everything else (disk lookup, generation, placeholder) runs on the
//!   worker pool, at most one job per `CacheKey` at a time
//! - results come back on a channel the controller drains
//!
//! Generation failures degrade to the shared placeholder artifact.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::artifact_cache::{ArtifactCache, Lookup};
use crate::entities::{ArtifactGenerator, ArtifactRequest, CacheKey, FeedItem, WorkerPool};

/// Immediate answer to a preview request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewRequest {
    /// Usable right now (memory hit or precomputed cover)
    Ready(PathBuf),
    /// Job enqueued, result arrives on the results channel
    Queued,
    /// Same key already queued or running; nothing enqueued
    InFlight,
}

/// Delivered once per completed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewResult {
    pub key: CacheKey,
    pub item_id: String,
    /// None only when even the placeholder couldn't be written
    pub path: Option<PathBuf>,
    pub placeholder: bool,
}

/// Output geometry and quality for generated previews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSpec {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

impl Default for PreviewSpec {
    fn default() -> Self {
        Self { width: 480, height: 800, quality: 85 }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    epoch: u64,
    running: bool,
}

struct Shared {
    cache: Arc<ArtifactCache>,
    generator: Arc<dyn ArtifactGenerator>,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    placeholder_lock: Mutex<()>,
    results: Sender<PreviewResult>,
    spec: PreviewSpec,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    /// Claim the key for this job. False if another job already runs it.
    fn start(&self, key: &CacheKey) -> bool {
        let mut map = lock(&self.in_flight);
        match map.get_mut(key) {
            Some(entry) if entry.running => false,
            Some(entry) => {
                entry.running = true;
                true
            }
            // cleared by a concurrent stale pass; run anyway
            None => {
                map.insert(*key, InFlight { epoch: 0, running: true });
                true
            }
        }
    }

    fn finish(&self, key: &CacheKey) {
        lock(&self.in_flight).remove(key);
    }

    /// Drop the marker of a skipped job unless a newer request took it over.
    fn abandon(&self, key: &CacheKey, epoch: u64) {
        let mut map = lock(&self.in_flight);
        if map.get(key).is_some_and(|e| e.epoch == epoch && !e.running) {
            map.remove(key);
            trace!("Preview {} cancelled (epoch {})", key, epoch);
        }
    }

    fn run(&self, key: CacheKey, item_id: String, source: String) {
        if !self.start(&key) {
            trace!("Preview {} already running", key);
            return;
        }

        let (path, placeholder) = match self.cache.get(&key) {
            Lookup::Found(path) => (Some(path), false),
            Lookup::Miss => self.generate(&key, &source),
        };

        self.finish(&key);
        let _ = self.results.send(PreviewResult { key, item_id, path, placeholder });
    }

    fn generate(&self, key: &CacheKey, source: &str) -> (Option<PathBuf>, bool) {
        let request = ArtifactRequest {
            source: source.to_string(),
            output: self.cache.path_for(key),
            width: self.spec.width,
            height: self.spec.height,
            quality: self.spec.quality,
        };
        match self.generator.generate(&request) {
            Ok(artifact) => {
                self.cache.put(*key, artifact.path.clone(), artifact.size_bytes);
                (Some(artifact.path), false)
            }
            Err(e) => {
                warn!("Preview generation failed for '{}': {}", source, e);
                (self.ensure_placeholder(), true)
            }
        }
    }

    /// Shared placeholder, written once per cache directory.
    fn ensure_placeholder(&self) -> Option<PathBuf> {
        let path = self.cache.placeholder_path();
        let _guard = lock(&self.placeholder_lock);
        if path.is_file() {
            return Some(path);
        }
        match self.generator.placeholder(&path, self.spec.width, self.spec.height) {
            Ok(artifact) => {
                debug!("Placeholder written to {}", artifact.path.display());
                Some(artifact.path)
            }
            Err(e) => {
                warn!("Failed to write placeholder {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Dedup + cancellation layer over the worker pool.
pub struct PreviewLoader {
    shared: Arc<Shared>,
    pool: Arc<dyn WorkerPool>,
    epoch: Arc<AtomicU64>,
    results_rx: Receiver<PreviewResult>,
}

impl PreviewLoader {
    /// `epoch` must be the counter the worker pool checks jobs against.
    pub fn new(
        cache: Arc<ArtifactCache>,
        generator: Arc<dyn ArtifactGenerator>,
        pool: Arc<dyn WorkerPool>,
        epoch: Arc<AtomicU64>,
        spec: PreviewSpec,
    ) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                cache,
                generator,
                in_flight: Mutex::new(HashMap::new()),
                placeholder_lock: Mutex::new(()),
                results: results_tx,
                spec,
            }),
            pool,
            epoch,
            results_rx,
        }
    }

    pub fn spec(&self) -> PreviewSpec {
        self.shared.spec
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.shared.cache
    }

    pub fn key_for(&self, item: &FeedItem) -> CacheKey {
        CacheKey::for_source(&item.locator, self.shared.spec.width, self.shared.spec.height)
    }

    /// Ask for an item's preview.
    pub fn request(&self, item: &FeedItem) -> PreviewRequest {
        if let Some(cover) = item.cover_path() {
            return PreviewRequest::Ready(cover);
        }

        let key = self.key_for(item);
        if let Lookup::Found(path) = self.shared.cache.get_memory(&key) {
            return PreviewRequest::Ready(path);
        }

        let epoch = self.epoch.load(Ordering::Relaxed);
        {
            let mut map = lock(&self.shared.in_flight);
            match map.get_mut(&key) {
                Some(entry) if entry.running || entry.epoch == epoch => return PreviewRequest::InFlight,
                // queued under an older epoch: will be skipped, take it over
                Some(entry) => entry.epoch = epoch,
                None => {
                    map.insert(key, InFlight { epoch, running: false });
                }
            }
        }

        let run_shared = Arc::clone(&self.shared);
        let stale_shared = Arc::clone(&self.shared);
        let item_id = item.id.clone();
        let source = item.locator.clone();
        self.pool.execute_with_epoch(
            epoch,
            Box::new(move || run_shared.run(key, item_id, source)),
            Box::new(move || stale_shared.abandon(&key, epoch)),
        );
        trace!("Preview {} queued for '{}' (epoch {})", key, item.id, epoch);
        PreviewRequest::Queued
    }

    /// Request previews for many items under the same concurrency limit.
    ///
    /// Returns the number of newly queued jobs.
    pub fn warm<'a>(&self, items: impl IntoIterator<Item = &'a FeedItem>) -> usize {
        items
            .into_iter()
            .filter(|item| self.request(item) == PreviewRequest::Queued)
            .count()
    }

    /// Skip every job queued so far (running jobs finish normally).
    pub fn cancel_pending(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.shared.in_flight).len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        lock(&self.shared.in_flight).contains_key(key)
    }

    /// Completed results so far (non-blocking).
    pub fn drain(&self) -> Vec<PreviewResult> {
        self.results_rx.try_iter().collect()
    }

    /// Block for the next result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PreviewResult> {
        self.results_rx.recv_timeout(timeout).ok()
    }
}
