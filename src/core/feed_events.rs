//! Events consumed and commands produced by `FeedController::dispatch`.

use std::path::PathBuf;

use super::mapper::VirtualPosition;
use crate::entities::FeedItem;

/// Input to the feed controller (host UI, lifecycle, timer).
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// New backing collection
    ItemsChanged(Vec<FeedItem>),
    /// Scroll in progress; `delta` sign is the direction
    Scrolled { position: VirtualPosition, delta: i64 },
    /// Scrolling stopped with `position` as the primary visible item
    Settled { position: VirtualPosition },
    /// A row for `position` became visible
    Attached { position: VirtualPosition },
    /// The row for `position` left the screen
    Detached { position: VirtualPosition },
    /// Show a specific item without losing loop headroom
    JumpToItem { item_id: String },
    /// Toggle play/pause of the active item
    Tapped,
    HostPaused,
    HostResumed,
    /// Periodic pump: item updates, preview results, deferred recentering
    Tick,
    Teardown,
}

/// Output of the feed controller, applied by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    /// Item count to report to the list widget
    SetItemCount(i64),
    ScrollTo { position: VirtualPosition, animate: bool },
    /// `position` is now the single playing item
    Activated { position: VirtualPosition, real_index: i64, slot: usize },
    ShowPreview { position: VirtualPosition, item_id: String, path: PathBuf, placeholder: bool },
    /// Nothing to show
    Empty,
}
