//! Saved playback progress for one item.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Progress record kept by a `PlaybackStateStore`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackProgress {
    pub item_id: String,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub speed: f32,
    /// Unix millis of the last save
    pub last_watched: u64,
}

impl PlaybackProgress {
    pub fn new(item_id: impl Into<String>, position_ms: u64, duration_ms: u64, speed: f32) -> Self {
        Self {
            item_id: item_id.into(),
            position_ms,
            duration_ms,
            speed,
            last_watched: now_millis(),
        }
    }

    /// Position worth seeking to on resume.
    ///
    /// None when nothing was watched yet or the item was (almost) finished,
    /// so a finished clip starts over instead of resuming at its last frame.
    pub fn resume_position(&self) -> Option<u64> {
        const END_GUARD_MS: u64 = 1000;
        if self.position_ms == 0 {
            return None;
        }
        if self.duration_ms > 0 && self.position_ms + END_GUARD_MS >= self.duration_ms {
            return None;
        }
        Some(self.position_ms)
    }
}

/// Current wall-clock time in Unix millis.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
