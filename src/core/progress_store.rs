//! Playback progress stores.
//!
//! `MemoryProgressStore` keeps records in a map; `JsonProgressStore` adds a
//! JSON file that is rewritten (temp file + rename) on every change.
//! Both implement `PlaybackStateStore`.

use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::entities::progress::now_millis;
use crate::entities::{PlaybackProgress, PlaybackStateStore, StoreError};

// ============================================================================
// In-memory table
// ============================================================================

#[derive(Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<String, PlaybackProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PlaybackProgress>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a record as-is (keeps its `last_watched`).
    pub fn insert(&self, progress: PlaybackProgress) {
        self.lock().insert(progress.item_id.clone(), progress);
    }

    /// Most recently watched first.
    pub fn recent(&self, limit: usize) -> Vec<PlaybackProgress> {
        let mut all: Vec<PlaybackProgress> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| b.last_watched.cmp(&a.last_watched).then_with(|| a.item_id.cmp(&b.item_id)));
        all.truncate(limit);
        all
    }

    pub fn remove(&self, item_id: &str) -> Option<PlaybackProgress> {
        self.lock().remove(item_id)
    }

    /// Drop records not watched within `age`. Returns removed count.
    pub fn prune_older_than(&self, age: Duration) -> usize {
        let cutoff = now_millis().saturating_sub(age.as_millis() as u64);
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, p| p.last_watched >= cutoff);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn all(&self) -> Vec<PlaybackProgress> {
        let mut all: Vec<PlaybackProgress> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        all
    }
}

impl PlaybackStateStore for MemoryProgressStore {
    fn save(&self, item_id: &str, position_ms: u64, duration_ms: u64, speed: f32) -> Result<(), StoreError> {
        self.insert(PlaybackProgress::new(item_id, position_ms, duration_ms, speed));
        Ok(())
    }

    fn load(&self, item_id: &str) -> Option<PlaybackProgress> {
        self.lock().get(item_id).cloned()
    }
}

// ============================================================================
// JSON file store
// ============================================================================

pub struct JsonProgressStore {
    path: PathBuf,
    table: MemoryProgressStore,
    // serializes file writes
    write_lock: Mutex<()>,
}

impl JsonProgressStore {
    /// Open `path`, loading existing records. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = MemoryProgressStore::new();

        if path.exists() {
            let json = fs::read_to_string(&path)?;
            if !json.trim().is_empty() {
                let records: Vec<PlaybackProgress> =
                    serde_json::from_str(&json).map_err(|e| StoreError::Parse(format!("{}: {}", path.display(), e)))?;
                for record in records {
                    table.insert(record);
                }
            }
        }
        debug!("Progress store {} opened ({} records)", path.display(), table.len());

        Ok(Self { path, table, write_lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_string_pretty(&self.table.all()).map_err(|e| StoreError::Parse(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Vec<PlaybackProgress> {
        self.table.recent(limit)
    }

    pub fn remove(&self, item_id: &str) -> Result<Option<PlaybackProgress>, StoreError> {
        let removed = self.table.remove(item_id);
        if removed.is_some() {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn prune_older_than(&self, age: Duration) -> Result<usize, StoreError> {
        let removed = self.table.prune_older_than(age);
        if removed > 0 {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl PlaybackStateStore for JsonProgressStore {
    fn save(&self, item_id: &str, position_ms: u64, duration_ms: u64, speed: f32) -> Result<(), StoreError> {
        self.table.save(item_id, position_ms, duration_ms, speed)?;
        self.flush().inspect_err(|e| warn!("Failed to persist progress to {}: {}", self.path.display(), e))
    }

    fn load(&self, item_id: &str) -> Option<PlaybackProgress> {
        self.table.load(item_id)
    }
}
