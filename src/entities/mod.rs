//! Entities module - plain feed types and the interfaces the engine needs
//!
//! Nothing in here touches threads, files or engines directly:
//! - `FeedItem`: externally owned record the feed displays
//! - `CacheKey`: deterministic identity of a generated preview
//! - `PlaybackProgress`: what the progress store remembers per item
//! - `traits`: playback engine, preview generator and progress store seams

pub mod cache_key;
pub mod feed_item;
pub mod progress;
pub mod traits;

pub use cache_key::CacheKey;
pub use feed_item::FeedItem;
pub use progress::PlaybackProgress;
pub use traits::{
    Artifact, ArtifactGenerator, ArtifactRequest, EngineError, GenerationError, PlaybackEngine,
    Job, PlaybackStateStore, StoreError, WorkerPool,
};
