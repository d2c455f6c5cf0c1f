//! Fixed pool of playback engines shared by an unbounded virtual feed.
//!
//! Slot for a virtual position is `position mod pool_size`. Engines are built
//! once at construction and only ever move between positions by rebinding.
//! The pool, not the engines, guarantees that at most one slot is active.
//!
//! Misuse (slot index out of range, calls after `release_all`) panics in
//! debug builds and is logged + returned as `PoolError` in release builds.

use log::{debug, error, trace, warn};
use std::fmt;

use super::mapper::VirtualPosition;
use crate::entities::{FeedItem, PlaybackEngine};

// ============================================================================
// Types
// ============================================================================

/// Programming errors at the pool boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    SlotOutOfRange { slot: usize, pool_size: usize },
    /// Pool was torn down by `release_all`
    Released,
    /// Handle doesn't belong to this pool's slot layout
    StaleHandle { slot: usize, virtual_position: VirtualPosition },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::SlotOutOfRange { slot, pool_size } => {
                write!(f, "Slot {} out of range (pool size {})", slot, pool_size)
            }
            PoolError::Released => write!(f, "Playback pool already released"),
            PoolError::StaleHandle { slot, virtual_position } => {
                write!(f, "Handle for position {} doesn't map to slot {}", virtual_position, slot)
            }
        }
    }
}

impl std::error::Error for PoolError {}

/// Engine reference for one virtual position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub slot: usize,
    pub virtual_position: VirtualPosition,
}

/// What `bind` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// Source loaded, paused, ready to activate
    Prepared,
    /// Empty or unloadable locator: engine cleared and idle
    Idle,
    /// Same item already bound at this position; engine untouched
    AlreadyBound,
}

/// Playback state of one slot, for progress persistence
#[derive(Debug, Clone, PartialEq)]
pub struct SlotProgress {
    pub item_id: String,
    pub virtual_position: VirtualPosition,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub speed: f32,
}

struct Slot<E> {
    engine: E,
    bound_position: Option<VirtualPosition>,
    bound_item: Option<String>,
    bound_locator: Option<String>,
    /// Prepared but not yet activated; saved progress still to apply
    needs_restore: bool,
}

impl<E> Slot<E> {
    fn unbind(&mut self) {
        self.bound_position = None;
        self.bound_item = None;
        self.bound_locator = None;
        self.needs_restore = false;
    }
}

// ============================================================================
// Pool
// ============================================================================

pub struct PlaybackPool<E: PlaybackEngine> {
    slots: Vec<Slot<E>>,
    active: Option<SlotHandle>,
    released: bool,
}

impl<E: PlaybackEngine> PlaybackPool<E> {
    /// Build `pool_size` engines (at least one) up front.
    pub fn new(pool_size: usize, mut factory: impl FnMut(usize) -> E) -> Self {
        let pool_size = pool_size.max(1);
        let slots = (0..pool_size)
            .map(|i| Slot {
                engine: factory(i),
                bound_position: None,
                bound_item: None,
                bound_locator: None,
                needs_restore: false,
            })
            .collect();
        debug!("Playback pool created with {} engines", pool_size);
        Self { slots, active: None, released: false }
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn slot_of(&self, virtual_position: VirtualPosition) -> usize {
        virtual_position.rem_euclid(self.slots.len() as i64) as usize
    }

    fn misuse(&self, err: PoolError) -> PoolError {
        error!("Playback pool misuse: {}", err);
        debug_assert!(false, "playback pool misuse: {}", err);
        err
    }

    fn check_live(&self) -> Result<(), PoolError> {
        if self.released {
            return Err(self.misuse(PoolError::Released));
        }
        Ok(())
    }

    fn check_slot(&self, slot: usize) -> Result<(), PoolError> {
        self.check_live()?;
        if slot >= self.slots.len() {
            return Err(self.misuse(PoolError::SlotOutOfRange { slot, pool_size: self.slots.len() }));
        }
        Ok(())
    }

    /// Engine handle for a virtual position. Touches no engine state, so
    /// repeated calls while scrolling are free.
    pub fn acquire(&self, virtual_position: VirtualPosition) -> Result<SlotHandle, PoolError> {
        self.check_live()?;
        Ok(SlotHandle { slot: self.slot_of(virtual_position), virtual_position })
    }

    /// Bind an item to the handle's slot.
    ///
    /// Stops and clears whatever the engine had, then loads the item's source
    /// only if its locator is non-empty. Playback stays paused. Binding the
    /// same item (id and locator) at the same position again is a no-op.
    pub fn bind(&mut self, handle: &SlotHandle, item: &FeedItem) -> Result<BindOutcome, PoolError> {
        self.check_slot(handle.slot)?;
        if self.slot_of(handle.virtual_position) != handle.slot {
            return Err(self.misuse(PoolError::StaleHandle {
                slot: handle.slot,
                virtual_position: handle.virtual_position,
            }));
        }

        let slot = &mut self.slots[handle.slot];
        if slot.bound_position == Some(handle.virtual_position)
            && slot.bound_item.as_deref() == Some(item.id.as_str())
            && slot.bound_locator.as_deref() == Some(item.locator.as_str())
        {
            trace!("Slot {}: '{}' already bound at {}", handle.slot, item.id, handle.virtual_position);
            return Ok(BindOutcome::AlreadyBound);
        }

        // previous binding of this slot loses its active state
        if self.active.is_some_and(|a| a.slot == handle.slot) {
            self.active = None;
        }

        slot.engine.stop();
        slot.engine.clear();
        slot.engine.set_play_when_ready(false);
        slot.bound_position = Some(handle.virtual_position);
        slot.bound_item = Some(item.id.clone());
        slot.bound_locator = Some(item.locator.clone());
        slot.needs_restore = false;

        if !item.has_locator() {
            debug!("Slot {}: '{}' has no locator, leaving idle", handle.slot, item.id);
            return Ok(BindOutcome::Idle);
        }

        match slot.engine.load(&item.locator, item.duration_ms) {
            Ok(()) => {
                slot.needs_restore = true;
                trace!("Slot {}: prepared '{}' at {}", handle.slot, item.id, handle.virtual_position);
                Ok(BindOutcome::Prepared)
            }
            Err(e) => {
                warn!("Slot {}: can't load '{}': {}", handle.slot, item.id, e);
                slot.engine.clear();
                Ok(BindOutcome::Idle)
            }
        }
    }

    /// Make `virtual_position` the single playing position.
    ///
    /// The previously active slot is paused first. Returns false when the
    /// slot was rebound to another position since, or holds no media; the
    /// current active slot is then left as it was.
    pub fn set_active(&mut self, virtual_position: VirtualPosition) -> Result<bool, PoolError> {
        self.check_live()?;
        let slot_idx = self.slot_of(virtual_position);

        if self.active.is_some_and(|a| a.virtual_position == virtual_position) {
            let engine = &mut self.slots[slot_idx].engine;
            engine.set_play_when_ready(true);
            return Ok(true);
        }

        let slot = &self.slots[slot_idx];
        if slot.bound_position != Some(virtual_position) {
            debug!(
                "Ignoring stale activation of {} (slot {} bound to {:?})",
                virtual_position, slot_idx, slot.bound_position
            );
            return Ok(false);
        }
        if !slot.engine.has_media() {
            trace!("Slot {} idle, nothing to activate", slot_idx);
            return Ok(false);
        }

        if let Some(prev) = self.active.take() {
            self.slots[prev.slot].engine.set_play_when_ready(false);
        }
        self.slots[slot_idx].engine.set_play_when_ready(true);
        self.active = Some(SlotHandle { slot: slot_idx, virtual_position });
        Ok(true)
    }

    /// True once per binding: the first time it's asked after the active
    /// slot was freshly prepared. Callers apply saved progress then.
    pub fn take_restore(&mut self) -> bool {
        if self.released {
            return false;
        }
        match self.active {
            Some(active) => std::mem::take(&mut self.slots[active.slot].needs_restore),
            None => false,
        }
    }

    /// Pause the active engine and drop the active marker.
    pub fn deactivate(&mut self) -> Option<SlotHandle> {
        let prev = self.active.take()?;
        self.slots[prev.slot].engine.set_play_when_ready(false);
        Some(prev)
    }

    pub fn active(&self) -> Option<SlotHandle> {
        self.active
    }

    pub fn is_active(&self, virtual_position: VirtualPosition) -> bool {
        self.active.is_some_and(|a| a.virtual_position == virtual_position)
    }

    /// Pause the active engine. Binding and active marker stay.
    pub fn pause_active(&mut self) -> bool {
        self.with_active(|e| e.set_play_when_ready(false)).is_some()
    }

    pub fn resume_active(&mut self) -> bool {
        self.with_active(|e| e.set_play_when_ready(true)).is_some()
    }

    /// Flip play/pause on the active engine. Returns the new play state.
    pub fn toggle_active(&mut self) -> Option<bool> {
        self.with_active(|e| {
            let play = !e.play_when_ready();
            e.set_play_when_ready(play);
            play
        })
    }

    pub fn seek_active(&mut self, position_ms: u64) -> bool {
        self.with_active(|e| e.seek(position_ms)).is_some()
    }

    fn with_active<R>(&mut self, f: impl FnOnce(&mut E) -> R) -> Option<R> {
        if self.released {
            return None;
        }
        let active = self.active?;
        Some(f(&mut self.slots[active.slot].engine))
    }

    /// Stop and clear one slot; the engine stays in the pool.
    pub fn release(&mut self, slot: usize) -> Result<(), PoolError> {
        self.check_slot(slot)?;
        let s = &mut self.slots[slot];
        s.engine.stop();
        s.engine.clear();
        s.unbind();
        if self.active.is_some_and(|a| a.slot == slot) {
            self.active = None;
        }
        trace!("Slot {} released", slot);
        Ok(())
    }

    /// Stop, clear and dispose every engine. The pool is unusable afterwards.
    pub fn release_all(&mut self) {
        if self.released {
            return;
        }
        for slot in &mut self.slots {
            slot.engine.stop();
            slot.engine.clear();
            slot.engine.dispose();
            slot.unbind();
        }
        self.active = None;
        self.released = true;
        debug!("Playback pool released ({} engines)", self.slots.len());
    }

    pub fn engine(&self, slot: usize) -> Option<&E> {
        self.slots.get(slot).map(|s| &s.engine)
    }

    /// (virtual position, item id) bound to a slot
    pub fn binding(&self, slot: usize) -> Option<(VirtualPosition, &str)> {
        let s = self.slots.get(slot)?;
        Some((s.bound_position?, s.bound_item.as_deref()?))
    }

    /// Slots whose engine is currently playing.
    pub fn playing_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.engine.is_playing())
            .map(|(i, _)| i)
            .collect()
    }

    /// Progress of a slot that holds media.
    pub fn progress(&self, slot: usize) -> Option<SlotProgress> {
        let s = self.slots.get(slot)?;
        if !s.engine.has_media() {
            return None;
        }
        Some(SlotProgress {
            item_id: s.bound_item.clone()?,
            virtual_position: s.bound_position?,
            position_ms: s.engine.position_ms(),
            duration_ms: s.engine.duration_ms(),
            speed: s.engine.speed(),
        })
    }
}

impl<E: PlaybackEngine> Drop for PlaybackPool<E> {
    fn drop(&mut self) {
        self.release_all();
    }
}
