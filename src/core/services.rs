//! Dependency container for the feed engine.
//!
//! Builds the shared pieces once from `FeedSettings` (worker pool, artifact
//! cache, generator, preview loader, progress store) and hands out feed
//! controllers wired to them.

use log::info;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use anyhow::{Context, Result};

use super::artifact_cache::ArtifactCache;
use super::cache_budget::memory_budget;
use super::feed::FeedController;
use super::generator::ImageGenerator;
use super::player_pool::PlaybackPool;
use super::preview_loader::PreviewLoader;
use super::progress_store::JsonProgressStore;
use super::workers::Workers;
use crate::entities::{ArtifactGenerator, PlaybackEngine, PlaybackStateStore};
use crate::settings::FeedSettings;

pub struct FeedServices {
    settings: FeedSettings,
    workers: Arc<Workers>,
    cache: Arc<ArtifactCache>,
    previews: Arc<PreviewLoader>,
    progress: Arc<JsonProgressStore>,
}

impl FeedServices {
    /// Build with the built-in image generator.
    pub fn new(settings: FeedSettings, previews_dir: &Path, progress_file: &Path) -> Result<Self> {
        Self::with_generator(settings, previews_dir, progress_file, Arc::new(ImageGenerator::new()))
    }

    pub fn with_generator(
        mut settings: FeedSettings,
        previews_dir: &Path,
        progress_file: &Path,
        generator: Arc<dyn ArtifactGenerator>,
    ) -> Result<Self> {
        settings.validate();

        let memory = memory_budget(settings.memory_cache_bytes, settings.max_memory_fraction);
        let cache = Arc::new(
            ArtifactCache::open(previews_dir, settings.cache_limits(memory))
                .with_context(|| format!("Failed to open preview cache: {}", previews_dir.display()))?,
        );

        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Arc::new(
            Workers::new(settings.generation_workers, Arc::clone(&epoch)).context("Failed to start worker threads")?,
        );
        let previews = Arc::new(PreviewLoader::new(
            Arc::clone(&cache),
            generator,
            workers.clone(),
            epoch,
            settings.preview_spec(),
        ));

        let progress = Arc::new(
            JsonProgressStore::open(progress_file)
                .with_context(|| format!("Failed to open progress store: {}", progress_file.display()))?,
        );

        info!(
            "Feed services ready: {} workers, previews in {}",
            workers.size(),
            previews_dir.display()
        );
        Ok(Self { settings, workers, cache, previews, progress })
    }

    /// Start background cache maintenance.
    pub fn start(&self) -> Result<()> {
        self.cache.start_sweeper().context("Failed to start cache sweeper")
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    pub fn previews(&self) -> &Arc<PreviewLoader> {
        &self.previews
    }

    pub fn progress(&self) -> &Arc<JsonProgressStore> {
        &self.progress
    }

    pub fn workers(&self) -> &Arc<Workers> {
        &self.workers
    }

    /// Controller with a fresh engine pool, sharing previews and progress.
    pub fn controller<E, F>(&self, factory: F, start_item: Option<String>) -> FeedController<E>
    where
        E: PlaybackEngine,
        F: FnMut(usize) -> E,
    {
        let pool = PlaybackPool::new(self.settings.pool_size, factory);
        let progress: Arc<dyn PlaybackStateStore> = self.progress.clone();
        FeedController::new(pool, self.settings.feed_config(start_item))
            .with_previews(Arc::clone(&self.previews))
            .with_progress_store(progress)
    }

    /// Skip queued work and stop the sweeper.
    pub fn shutdown(&self) {
        self.previews.cancel_pending();
        self.cache.shutdown();
        info!("Feed services shut down");
    }
}
