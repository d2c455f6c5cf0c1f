//! Feed controller - composition root of the virtualized feed.
//!
//! Combines the position mapper, the playback pool and the preview loader
//! behind a single `dispatch(FeedEvent) -> Vec<FeedCommand>` entry point.
//! Runs on the host's event thread and never blocks: preview work goes to
//! the worker pool and comes back through `FeedEvent::Tick`.
//!
//! # Flow
//!
//! ```text
//! Scrolled  -> loop management near the range edges (ScrollTo, silent)
//! Settled   -> bind + activate the slot for the position, request previews
//! Attached  -> prepare the row's slot (paused) and request its preview
//! Tick      -> item store updates, preview results, deferred recentering
//! ```

use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use super::debounced_recenter::DebouncedRecenter;
use super::feed_events::{FeedCommand, FeedEvent};
use super::item_store::{ItemSnapshot, ItemStore};
use super::mapper::{
    LoopPolicy, VIRTUAL_EXTENT, VirtualPosition, convert_to_virtual_position, infinite_count, map_to_real_index,
    needs_loop_reset, recenter_target, start_virtual_position,
};
use super::player_pool::PlaybackPool;
use super::preview_loader::{PreviewLoader, PreviewRequest};
use crate::entities::{CacheKey, FeedItem, PlaybackEngine, PlaybackStateStore};

/// Upper bound for `FeedConfig::prefetch_radius`
pub const MAX_PREFETCH_RADIUS: usize = 8;

/// Controller tuning
#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub loop_threshold_divisor: i64,
    pub recenter_delay_ms: u64,
    /// Neighbours on each side whose previews are requested on settle,
    /// capped at `MAX_PREFETCH_RADIUS`
    pub prefetch_radius: usize,
    /// Seek to saved progress on the first activation of a fresh binding
    pub resume_playback: bool,
    /// Item to start at on the first non-empty collection
    pub start_item: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            loop_threshold_divisor: 2,
            recenter_delay_ms: 300,
            prefetch_radius: 1,
            resume_playback: true,
            start_item: None,
        }
    }
}

pub struct FeedController<E: PlaybackEngine> {
    items: Vec<FeedItem>,
    index_by_id: HashMap<String, usize>,
    pool: PlaybackPool<E>,
    previews: Option<Arc<PreviewLoader>>,
    progress: Option<Arc<dyn PlaybackStateStore>>,
    item_updates: Option<Receiver<ItemSnapshot>>,
    policy: LoopPolicy,
    recenter: DebouncedRecenter,
    config: FeedConfig,
    current: VirtualPosition,
    attached: BTreeSet<VirtualPosition>,
    preview_waiters: HashMap<CacheKey, Vec<VirtualPosition>>,
    host_paused: bool,
    torn_down: bool,
}

impl<E: PlaybackEngine> FeedController<E> {
    pub fn new(pool: PlaybackPool<E>, mut config: FeedConfig) -> Self {
        if config.prefetch_radius > MAX_PREFETCH_RADIUS {
            warn!("prefetch_radius {} too large, using {}", config.prefetch_radius, MAX_PREFETCH_RADIUS);
            config.prefetch_radius = MAX_PREFETCH_RADIUS;
        }
        Self {
            items: Vec::new(),
            index_by_id: HashMap::new(),
            pool,
            previews: None,
            progress: None,
            item_updates: None,
            policy: LoopPolicy::new(config.loop_threshold_divisor),
            recenter: DebouncedRecenter::new(config.recenter_delay_ms),
            config,
            current: 0,
            attached: BTreeSet::new(),
            preview_waiters: HashMap::new(),
            host_paused: false,
            torn_down: false,
        }
    }

    pub fn with_previews(mut self, loader: Arc<PreviewLoader>) -> Self {
        self.previews = Some(loader);
        self
    }

    pub fn with_progress_store(mut self, store: Arc<dyn PlaybackStateStore>) -> Self {
        self.progress = Some(store);
        self
    }

    /// Follow an item store; its snapshots are applied on `Tick`.
    pub fn subscribe_to(mut self, store: &ItemStore) -> Self {
        self.item_updates = Some(store.subscribe());
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn data_size(&self) -> i64 {
        self.items.len() as i64
    }

    pub fn current_position(&self) -> VirtualPosition {
        self.current
    }

    pub fn item_at(&self, position: VirtualPosition) -> Option<&FeedItem> {
        let real = map_to_real_index(position, self.data_size());
        usize::try_from(real).ok().and_then(|i| self.items.get(i))
    }

    pub fn pool(&self) -> &PlaybackPool<E> {
        &self.pool
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Handle one event and return what the host should do.
    pub fn dispatch(&mut self, event: FeedEvent) -> Vec<FeedCommand> {
        if self.torn_down {
            trace!("Feed torn down, ignoring {:?}", event);
            return Vec::new();
        }

        match event {
            FeedEvent::ItemsChanged(items) => self.set_items(items),
            FeedEvent::Scrolled { position, delta } => self.on_scrolled(position, delta),
            FeedEvent::Settled { position } => self.settle(position),
            FeedEvent::Attached { position } => self.on_attached(position),
            FeedEvent::Detached { position } => {
                self.on_detached(position);
                Vec::new()
            }
            FeedEvent::JumpToItem { item_id } => self.jump_to_item(&item_id),
            FeedEvent::Tapped => {
                if self.pool.toggle_active() == Some(false) {
                    self.save_progress();
                }
                Vec::new()
            }
            FeedEvent::HostPaused => {
                self.host_paused = true;
                self.save_progress();
                self.pool.pause_active();
                Vec::new()
            }
            FeedEvent::HostResumed => {
                self.host_paused = false;
                self.pool.resume_active();
                Vec::new()
            }
            FeedEvent::Tick => self.tick(),
            FeedEvent::Teardown => {
                self.teardown();
                Vec::new()
            }
        }
    }

    fn set_items(&mut self, items: Vec<FeedItem>) -> Vec<FeedCommand> {
        let previous_item = self.item_at(self.current).map(|i| i.id.clone());
        let was_empty = self.items.is_empty();

        let total = items.len();
        let mut seen = HashSet::new();
        self.items = items.into_iter().filter(|i| seen.insert(i.id.clone())).collect();
        if self.items.len() != total {
            warn!("Dropped {} items with duplicate ids", total - self.items.len());
        }
        self.index_by_id = self.items.iter().enumerate().map(|(i, item)| (item.id.clone(), i)).collect();

        let size = self.data_size();
        info!("Feed has {} items", size);
        let mut commands = vec![FeedCommand::SetItemCount(infinite_count(size))];

        if size == 0 {
            self.reset_playback();
            self.current = 0;
            commands.push(FeedCommand::Empty);
            return commands;
        }

        let target = if was_empty {
            let preferred = self
                .config
                .start_item
                .as_deref()
                .and_then(|id| self.index_by_id.get(id))
                .map_or(0, |&i| i as i64);
            start_virtual_position(size, preferred)
        } else {
            // keep the same item on screen when it survived the change
            let index = previous_item
                .and_then(|id| self.index_by_id.get(&id).copied())
                .map_or_else(|| map_to_real_index(self.current, size), |i| i as i64);
            let position = convert_to_virtual_position(index, self.current, size);
            if needs_loop_reset(position, size) { recenter_target(position, size) } else { position }
        };

        if target != self.current {
            commands.push(FeedCommand::ScrollTo { position: target, animate: false });
        }
        // positions now show different items; pending preview routing is void
        self.preview_waiters.clear();
        commands.extend(self.settle(target));
        commands
    }

    fn on_scrolled(&mut self, position: VirtualPosition, delta: i64) -> Vec<FeedCommand> {
        let size = self.data_size();
        if size == 0 {
            return Vec::new();
        }
        self.current = position;

        if !needs_loop_reset(position, size) {
            self.recenter.cancel();
            return Vec::new();
        }

        let mut commands = Vec::new();
        let target = self.policy.smooth_loop_target(position, size, delta.signum());
        if target != position {
            debug!("Loop jump {} -> {}", position, target);
            commands.push(FeedCommand::ScrollTo { position: target, animate: false });
            self.current = target;
        }
        self.recenter.schedule(self.current);
        commands
    }

    /// Make `position` the active item.
    fn settle(&mut self, position: VirtualPosition) -> Vec<FeedCommand> {
        let size = self.data_size();
        if size == 0 {
            return vec![FeedCommand::Empty];
        }
        self.current = position;
        let mut commands = Vec::new();

        if self.pool.active().is_some_and(|a| a.virtual_position != position) {
            self.save_progress();
        }
        if let Some(loader) = &self.previews {
            loader.cancel_pending();
        }

        if let Some(item) = self.item_at(position).cloned() {
            let real_index = map_to_real_index(position, size);
            if let Ok(handle) = self.pool.acquire(position) {
                // row may already be prepared by Attached; that bind still counts as fresh
                let _ = self.pool.bind(&handle, &item);
                if let Ok(true) = self.pool.set_active(position) {
                    if self.pool.take_restore() {
                        self.restore_progress(&item.id);
                    }
                    if self.host_paused {
                        self.pool.pause_active();
                    }
                    commands.push(FeedCommand::Activated { position, real_index, slot: handle.slot });
                } else {
                    debug!("Nothing to play at {} ('{}')", position, item.id);
                    self.pool.deactivate();
                }
            }
        }

        commands.extend(self.request_previews(self.preview_positions(position)));
        if needs_loop_reset(position, size) {
            self.recenter.schedule(position);
        }
        commands
    }

    fn on_attached(&mut self, position: VirtualPosition) -> Vec<FeedCommand> {
        if self.data_size() == 0 {
            return Vec::new();
        }
        self.attached.insert(position);

        // prepare the row's engine unless its slot is playing another position
        let slot = self.pool.slot_of(position);
        let slot_busy = self.pool.active().is_some_and(|a| a.slot == slot && a.virtual_position != position);
        if !slot_busy {
            if let (Some(item), Ok(handle)) = (self.item_at(position).cloned(), self.pool.acquire(position)) {
                let _ = self.pool.bind(&handle, &item);
            }
        }

        self.request_previews([position])
    }

    fn on_detached(&mut self, position: VirtualPosition) {
        self.attached.remove(&position);
        for waiters in self.preview_waiters.values_mut() {
            waiters.retain(|p| *p != position);
        }
        self.preview_waiters.retain(|_, w| !w.is_empty());

        if self.pool.is_active(position) {
            self.save_progress();
            self.pool.pause_active();
            return;
        }
        let slot = self.pool.slot_of(position);
        if self.pool.binding(slot).is_some_and(|(p, _)| p == position) {
            let _ = self.pool.release(slot);
        }
    }

    fn jump_to_item(&mut self, item_id: &str) -> Vec<FeedCommand> {
        let Some(&index) = self.index_by_id.get(item_id) else {
            warn!("Jump to unknown item '{}'", item_id);
            return Vec::new();
        };
        let target = convert_to_virtual_position(index as i64, self.current, self.data_size());
        let mut commands = vec![FeedCommand::ScrollTo { position: target, animate: false }];
        commands.extend(self.settle(target));
        commands
    }

    fn tick(&mut self) -> Vec<FeedCommand> {
        let mut commands = Vec::new();

        let latest = self.item_updates.as_ref().and_then(|rx| rx.try_iter().last());
        if let Some(items) = latest {
            commands.extend(self.set_items(items));
        }

        commands.extend(self.drain_previews());

        if self.recenter.tick().is_some() {
            let size = self.data_size();
            if size > 0 && needs_loop_reset(self.current, size) {
                let target = recenter_target(self.current, size);
                info!("Recentering {} -> {}", self.current, target);
                commands.push(FeedCommand::ScrollTo { position: target, animate: false });
                commands.extend(self.settle(target));
            }
        }
        commands
    }

    fn teardown(&mut self) {
        self.save_progress();
        if let Some(loader) = &self.previews {
            loader.cancel_pending();
        }
        self.pool.release_all();
        self.attached.clear();
        self.preview_waiters.clear();
        self.recenter.cancel();
        self.torn_down = true;
        info!("Feed torn down");
    }

    /// Drop every binding (collection became empty).
    fn reset_playback(&mut self) {
        self.save_progress();
        for slot in 0..self.pool.pool_size() {
            let _ = self.pool.release(slot);
        }
        self.attached.clear();
        self.preview_waiters.clear();
        self.recenter.cancel();
    }

    // ------------------------------------------------------------------------
    // Previews
    // ------------------------------------------------------------------------

    /// Settled position, its neighbours and every attached row.
    fn preview_positions(&self, position: VirtualPosition) -> BTreeSet<VirtualPosition> {
        let radius = self.config.prefetch_radius as i64;
        let mut positions: BTreeSet<VirtualPosition> = (position - radius..=position + radius)
            .filter(|p| (0..VIRTUAL_EXTENT).contains(p))
            .collect();
        positions.extend(self.attached.iter().copied());
        positions
    }

    fn request_previews(&mut self, positions: impl IntoIterator<Item = VirtualPosition>) -> Vec<FeedCommand> {
        let Some(loader) = self.previews.clone() else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        for position in positions {
            let Some(item) = self.item_at(position).cloned() else {
                continue;
            };
            match loader.request(&item) {
                PreviewRequest::Ready(path) => commands.push(FeedCommand::ShowPreview {
                    position,
                    item_id: item.id,
                    path,
                    placeholder: false,
                }),
                PreviewRequest::Queued | PreviewRequest::InFlight => {
                    let waiters = self.preview_waiters.entry(loader.key_for(&item)).or_default();
                    if !waiters.contains(&position) {
                        waiters.push(position);
                    }
                }
            }
        }
        commands
    }

    fn drain_previews(&mut self) -> Vec<FeedCommand> {
        let Some(loader) = self.previews.clone() else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        for result in loader.drain() {
            let Some(positions) = self.preview_waiters.remove(&result.key) else {
                continue;
            };
            let Some(path) = result.path else {
                continue;
            };
            for position in positions {
                // the position may show another item after a collection change
                let Some(item) = self.item_at(position) else {
                    continue;
                };
                if loader.key_for(item) != result.key {
                    continue;
                }
                commands.push(FeedCommand::ShowPreview {
                    position,
                    item_id: item.id.clone(),
                    path: path.clone(),
                    placeholder: result.placeholder,
                });
            }
        }
        commands
    }

    // ------------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------------

    fn save_progress(&self) {
        let (Some(store), Some(active)) = (&self.progress, self.pool.active()) else {
            return;
        };
        let Some(progress) = self.pool.progress(active.slot) else {
            return;
        };
        match store.save(&progress.item_id, progress.position_ms, progress.duration_ms, progress.speed) {
            Ok(()) => trace!("Saved progress for '{}' at {}ms", progress.item_id, progress.position_ms),
            Err(e) => warn!("Failed to save progress for '{}': {}", progress.item_id, e),
        }
    }

    fn restore_progress(&mut self, item_id: &str) {
        if !self.config.resume_playback {
            return;
        }
        let resume_at = self.progress.as_ref().and_then(|s| s.load(item_id)).and_then(|p| p.resume_position());
        if let Some(position_ms) = resume_at {
            debug!("Resuming '{}' at {}ms", item_id, position_ms);
            self.pool.seek_active(position_ms);
        }
    }
}
