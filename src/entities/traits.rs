//! Abstract traits for dependency inversion.
//!
//! These traits define what the engine needs from the outside world
//! (playback engines, preview generation, progress persistence, background
//! threads), so `core` can be tested with in-process stand-ins.
//!
//! Implementations live in `core/`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::progress::PlaybackProgress;

// ============================================================================
// Playback engine
// ============================================================================

/// Engine-side failures when loading a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Locator is empty or not something the engine understands
    InvalidLocator(String),
    /// Locator is well-formed but the media can't be reached
    Unreachable(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidLocator(l) => write!(f, "Invalid locator: '{}'", l),
            EngineError::Unreachable(l) => write!(f, "Media unreachable: {}", l),
        }
    }
}

impl std::error::Error for EngineError {}

/// One stateful playback engine.
///
/// Engines are pre-constructed by the pool and reused across many feed
/// positions. None of these calls may block on I/O.
pub trait PlaybackEngine: Send {
    /// Attach and prepare a source. Playback stays paused.
    fn load(&mut self, locator: &str, duration_ms: u64) -> Result<(), EngineError>;

    /// Stop playback (keeps the source attached).
    fn stop(&mut self);

    /// Detach the current source.
    fn clear(&mut self);

    /// Request play (true) or pause (false).
    fn set_play_when_ready(&mut self, play: bool);

    fn play_when_ready(&self) -> bool;

    /// Actually producing frames right now.
    fn is_playing(&self) -> bool;

    /// A source is attached and prepared.
    fn has_media(&self) -> bool;

    fn seek(&mut self, position_ms: u64);

    fn position_ms(&self) -> u64;

    fn duration_ms(&self) -> u64;

    fn speed(&self) -> f32;

    /// Free the underlying engine for good. The engine is unusable afterwards.
    fn dispose(&mut self);
}

// ============================================================================
// Preview generation
// ============================================================================

/// Preview generation failures
#[derive(Debug)]
pub enum GenerationError {
    /// Source locator empty, non-local or missing
    InvalidLocator(String),
    /// Source could not be decoded into a frame
    Decode(String),
    /// Frame could not be encoded/written
    Encode(String),
    Io(std::io::Error),
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::InvalidLocator(l) => write!(f, "Invalid source locator: '{}'", l),
            GenerationError::Decode(e) => write!(f, "Decode error: {}", e),
            GenerationError::Encode(e) => write!(f, "Encode error: {}", e),
            GenerationError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<std::io::Error> for GenerationError {
    fn from(e: std::io::Error) -> Self {
        GenerationError::Io(e)
    }
}

/// What to generate and where to put it
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub source: String,
    /// Final artifact path (deterministic, owned by the cache)
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    /// JPEG quality 1..=100
    pub quality: u8,
}

/// A generated preview on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Produces a preview artifact from a source. Stateless per call.
///
/// Implementations must keep the aspect ratio, never upscale past the
/// source's native size, and release any decode resource on every path.
pub trait ArtifactGenerator: Send + Sync {
    fn generate(&self, request: &ArtifactRequest) -> Result<Artifact, GenerationError>;

    /// Write a neutral placeholder image to `output`.
    fn placeholder(&self, output: &Path, width: u32, height: u32) -> Result<Artifact, GenerationError>;
}

// ============================================================================
// Progress persistence
// ============================================================================

/// Progress store failures
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Parse(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Parse(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// External repository of per-item playback progress.
pub trait PlaybackStateStore: Send + Sync {
    fn save(&self, item_id: &str, position_ms: u64, duration_ms: u64, speed: f32) -> Result<(), StoreError>;

    fn load(&self, item_id: &str) -> Option<PlaybackProgress>;
}

// ============================================================================
// Background execution
// ============================================================================

/// Background job type
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstract worker pool interface.
///
/// Allows preview loading to schedule background work without knowing
/// the concrete thread pool implementation.
pub trait WorkerPool: Send + Sync {
    /// Execute `job` on a worker thread if `epoch` is still current when a
    /// worker picks it up; otherwise run `on_stale` instead.
    fn execute_with_epoch(&self, epoch: u64, job: Job, on_stale: Job);
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: ArtifactGenerator + ?Sized> ArtifactGenerator for Arc<T> {
    fn generate(&self, request: &ArtifactRequest) -> Result<Artifact, GenerationError> {
        (**self).generate(request)
    }

    fn placeholder(&self, output: &Path, width: u32, height: u32) -> Result<Artifact, GenerationError> {
        (**self).placeholder(output, width, height)
    }
}

impl<T: PlaybackStateStore + ?Sized> PlaybackStateStore for Arc<T> {
    fn save(&self, item_id: &str, position_ms: u64, duration_ms: u64, speed: f32) -> Result<(), StoreError> {
        (**self).save(item_id, position_ms, duration_ms, speed)
    }

    fn load(&self, item_id: &str) -> Option<PlaybackProgress> {
        (**self).load(item_id)
    }
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute_with_epoch(&self, epoch: u64, job: Job, on_stale: Job) {
        (**self).execute_with_epoch(epoch, job, on_stale)
    }
}
