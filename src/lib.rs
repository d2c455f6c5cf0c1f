//! LOOPFEED - virtualized looping video feed engine
//!
//! Re-exports all modules for use by the binary target.

// Core engine (mapper, pool, cache, workers, feed controller)
pub mod core;

// App modules
pub mod cli;
pub mod entities;
pub mod paths;
pub mod settings;

// Re-export commonly used types from core
pub use core::artifact_cache::{ArtifactCache, CacheLimits};
pub use core::feed::{FeedConfig, FeedController};
pub use core::feed_events::{FeedCommand, FeedEvent};
pub use core::services::FeedServices;

// Re-export entities
pub use entities::{CacheKey, FeedItem, PlaybackProgress};
pub use settings::FeedSettings;
