//! Core engine modules - mapper, playback pool, artifact cache, workers, feed
//!
//! These modules form the feed engine, independent of any UI toolkit.

pub mod artifact_cache;
pub mod cache_budget;
pub mod clock_engine;
pub mod debounced_recenter;
pub mod disk_tier;
pub mod feed;
pub mod feed_events;
pub mod generator;
pub mod item_store;
pub mod mapper;
pub mod memory_tier;
pub mod player_pool;
pub mod preview_loader;
pub mod progress_store;
pub mod services;
pub mod sweeper;
pub mod workers;

// Re-exports for convenience
pub use artifact_cache::{ArtifactCache, CacheError, CacheLimits, CacheStats, Lookup};
pub use clock_engine::ClockEngine;
pub use debounced_recenter::DebouncedRecenter;
pub use feed::{FeedConfig, FeedController};
pub use feed_events::{FeedCommand, FeedEvent};
pub use generator::ImageGenerator;
pub use item_store::ItemStore;
pub use mapper::{LoopPolicy, VIRTUAL_EXTENT, VirtualPosition};
pub use player_pool::{BindOutcome, PlaybackPool, PoolError, SlotHandle};
pub use preview_loader::{PreviewLoader, PreviewRequest, PreviewResult, PreviewSpec};
pub use progress_store::{JsonProgressStore, MemoryProgressStore};
pub use services::FeedServices;
pub use workers::Workers;
