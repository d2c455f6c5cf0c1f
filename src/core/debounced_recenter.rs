//! Debounced re-centering of the virtual feed.
//!
//! When the scroll position drifts within a cycle of either edge of the
//! virtual range, the feed should jump back to the middle without an
//! animation. Doing that mid-fling is visible, so instead:
//! 1. On every edge warning, (re)schedule a recenter
//! 2. After the delay with no further scrolling, `tick` hands back the
//!    position to recenter from
//!
//! Scrolling again before the delay resets the timer.

use std::time::{Duration, Instant};

use super::mapper::VirtualPosition;

/// # Usage
/// ```ignore
/// // on scroll near an edge:
/// recenter.schedule(position);
///
/// // on every tick:
/// if let Some(from) = recenter.tick() {
///     scroll_to(recenter_target(from, data_size), false);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DebouncedRecenter {
    delay: Duration,
    /// (position at last schedule, trigger time)
    pending: Option<(VirtualPosition, Instant)>,
}

impl Default for DebouncedRecenter {
    fn default() -> Self {
        Self::new(300)
    }
}

impl DebouncedRecenter {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay: Duration::from_millis(delay_ms), pending: None }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay.as_millis() as u64
    }

    /// Schedule (or push back) a recenter from `position`.
    pub fn schedule(&mut self, position: VirtualPosition) {
        self.pending = Some((position, Instant::now() + self.delay));
        log::trace!("DebouncedRecenter: scheduled from {} in {}ms", position, self.delay.as_millis());
    }

    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            log::trace!("DebouncedRecenter: cancelled");
        }
    }

    /// Some(position) once the delay has elapsed; clears the pending state.
    pub fn tick(&mut self) -> Option<VirtualPosition> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<VirtualPosition> {
        let (position, trigger_at) = self.pending?;
        if now >= trigger_at {
            self.pending = None;
            log::trace!("DebouncedRecenter: firing from {}", position);
            Some(position)
        } else {
            None
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_position(&self) -> Option<VirtualPosition> {
        self.pending.map(|(p, _)| p)
    }
}
