//! Headless playback engine driven by the wall clock.
//!
//! Implements `PlaybackEngine` without decoding anything: position advances
//! with real time while playing and loops at the end of the clip (repeat
//! one). Used by the `simulate` command and as the engine in tests.

use log::trace;
use std::time::Instant;

use crate::entities::feed_item::local_path;
use crate::entities::{EngineError, PlaybackEngine};

#[derive(Debug)]
pub struct ClockEngine {
    id: usize,
    locator: Option<String>,
    duration_ms: u64,
    play_when_ready: bool,
    /// Set while playing; position = base + elapsed * speed
    started_at: Option<Instant>,
    base_position_ms: u64,
    speed: f32,
    disposed: bool,
    load_count: usize,
}

impl ClockEngine {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            locator: None,
            duration_ms: 0,
            play_when_ready: false,
            started_at: None,
            base_position_ms: 0,
            speed: 1.0,
            disposed: false,
            load_count: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn locator(&self) -> Option<&str> {
        self.locator.as_deref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Successful loads so far
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.freeze();
        self.speed = speed.max(0.0);
        self.thaw();
    }

    fn raw_position(&self) -> u64 {
        let elapsed = self
            .started_at
            .map(|t| (t.elapsed().as_millis() as f64 * self.speed as f64) as u64)
            .unwrap_or(0);
        let pos = self.base_position_ms + elapsed;
        if self.duration_ms > 0 { pos % self.duration_ms } else { pos }
    }

    /// Fold elapsed time into the base position and stop the clock.
    fn freeze(&mut self) {
        self.base_position_ms = self.raw_position();
        self.started_at = None;
    }

    fn thaw(&mut self) {
        if self.play_when_ready && self.has_media() {
            self.started_at = Some(Instant::now());
        }
    }
}

impl PlaybackEngine for ClockEngine {
    fn load(&mut self, locator: &str, duration_ms: u64) -> Result<(), EngineError> {
        if self.disposed {
            return Err(EngineError::Unreachable(format!("engine {} disposed", self.id)));
        }
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(EngineError::InvalidLocator(locator.to_string()));
        }
        // local files must exist; other schemes are taken on faith
        if let Some(path) = local_path(locator) {
            if !path.exists() {
                return Err(EngineError::Unreachable(locator.to_string()));
            }
        }

        self.locator = Some(locator.to_string());
        self.duration_ms = duration_ms;
        self.base_position_ms = 0;
        self.started_at = None;
        self.load_count += 1;
        trace!("Engine {} loaded {}", self.id, locator);
        if self.play_when_ready {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.play_when_ready = false;
        self.started_at = None;
        self.base_position_ms = 0;
    }

    fn clear(&mut self) {
        self.stop();
        self.locator = None;
        self.duration_ms = 0;
    }

    fn set_play_when_ready(&mut self, play: bool) {
        if play == self.play_when_ready {
            return;
        }
        self.freeze();
        self.play_when_ready = play;
        if play && self.has_media() {
            self.started_at = Some(Instant::now());
        }
    }

    fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    fn is_playing(&self) -> bool {
        self.play_when_ready && self.started_at.is_some()
    }

    fn has_media(&self) -> bool {
        self.locator.is_some() && !self.disposed
    }

    fn seek(&mut self, position_ms: u64) {
        let playing = self.started_at.is_some();
        self.base_position_ms = if self.duration_ms > 0 { position_ms.min(self.duration_ms - 1) } else { position_ms };
        self.started_at = playing.then(Instant::now);
    }

    fn position_ms(&self) -> u64 {
        self.raw_position()
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn speed(&self) -> f32 {
        self.speed
    }

    fn dispose(&mut self) {
        self.clear();
        self.disposed = true;
        trace!("Engine {} disposed", self.id);
    }
}
