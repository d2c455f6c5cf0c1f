//! Persistent engine settings (`loopfeed.json`).
//!
//! Every field has a default, so partial or older files load fine. Values
//! are sanitized by `validate()` before the engine is built from them.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;

use crate::core::artifact_cache::CacheLimits;
use crate::core::feed::{FeedConfig, MAX_PREFETCH_RADIUS};
use crate::core::preview_loader::PreviewSpec;

pub const SETTINGS_FILE: &str = "loopfeed.json";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct FeedSettings {
    // Playback
    pub pool_size: usize,
    pub loop_threshold_divisor: i64,
    pub recenter_delay_ms: u64,
    pub resume_playback: bool,

    // Memory tier
    pub memory_cache_bytes: u64,
    pub memory_cache_entries: usize,
    pub promotion_divisor: u64,
    pub max_memory_fraction: f64, // share of available RAM the memory tier may take

    // Disk tier
    pub disk_cache_bytes: u64,
    pub artifact_max_age_ms: u64,
    pub sweep_interval_ms: u64,
    pub housekeeping_every: u64,
    pub memory_trim_fraction: f64,

    // Previews
    pub target_width: u32,
    pub target_height: u32,
    pub artifact_quality: u8,
    pub generation_workers: usize,
    pub prefetch_radius: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            pool_size: 2,
            loop_threshold_divisor: 2,
            recenter_delay_ms: 300,
            resume_playback: true,
            memory_cache_bytes: 50 * MIB,
            memory_cache_entries: 200,
            promotion_divisor: 4,
            max_memory_fraction: 0.25,
            disk_cache_bytes: 200 * MIB,
            artifact_max_age_ms: 7 * 24 * 60 * 60 * 1000,
            sweep_interval_ms: 60_000,
            housekeeping_every: 10,
            memory_trim_fraction: 0.8,
            target_width: 480,
            target_height: 800,
            artifact_quality: 85,
            generation_workers: 2,
            prefetch_radius: 1,
        }
    }
}

impl FeedSettings {
    /// Load from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Clamp out-of-range values in place. Returns the number of fixes.
    pub fn validate(&mut self) -> usize {
        let defaults = Self::default();
        let max_workers = num_cpus::get().max(1);
        let mut fixes = 0;

        fixes += fix("pool_size", &mut self.pool_size, |v| *v >= 1, |_| 1);
        fixes += fix("loop_threshold_divisor", &mut self.loop_threshold_divisor, |v| *v >= 1, |_| {
            defaults.loop_threshold_divisor
        });
        fixes += fix("memory_cache_bytes", &mut self.memory_cache_bytes, |v| *v > 0, |_| defaults.memory_cache_bytes);
        fixes += fix("memory_cache_entries", &mut self.memory_cache_entries, |v| *v > 0, |_| {
            defaults.memory_cache_entries
        });
        fixes += fix("prefetch_radius", &mut self.prefetch_radius, |v| *v <= MAX_PREFETCH_RADIUS, |_| {
            MAX_PREFETCH_RADIUS
        });
        fixes += fix("promotion_divisor", &mut self.promotion_divisor, |v| *v >= 1, |_| 1);
        fixes += fix("max_memory_fraction", &mut self.max_memory_fraction, |v| *v > 0.0 && *v <= 1.0, |_| {
            defaults.max_memory_fraction
        });
        fixes += fix("disk_cache_bytes", &mut self.disk_cache_bytes, |v| *v > 0, |_| defaults.disk_cache_bytes);
        fixes += fix("artifact_max_age_ms", &mut self.artifact_max_age_ms, |v| *v > 0, |_| {
            defaults.artifact_max_age_ms
        });
        fixes += fix("sweep_interval_ms", &mut self.sweep_interval_ms, |v| *v >= 100, |_| 100);
        fixes += fix("housekeeping_every", &mut self.housekeeping_every, |v| *v >= 1, |_| 1);
        fixes += fix("memory_trim_fraction", &mut self.memory_trim_fraction, |v| *v > 0.0 && *v <= 1.0, |_| {
            defaults.memory_trim_fraction
        });
        fixes += fix("target_width", &mut self.target_width, |v| *v > 0, |_| defaults.target_width);
        fixes += fix("target_height", &mut self.target_height, |v| *v > 0, |_| defaults.target_height);
        fixes += fix("artifact_quality", &mut self.artifact_quality, |v| (1..=100).contains(v), |v| (*v).clamp(1, 100));
        fixes += fix("generation_workers", &mut self.generation_workers, |v| (1..=max_workers).contains(v), |v| {
            (*v).clamp(1, max_workers)
        });

        fixes
    }

    /// Cache limits; `memory_bytes` is the already-budgeted ceiling.
    pub fn cache_limits(&self, memory_bytes: u64) -> CacheLimits {
        CacheLimits {
            memory_bytes,
            memory_entries: self.memory_cache_entries,
            disk_bytes: self.disk_cache_bytes,
            promotion_divisor: self.promotion_divisor,
            max_age: Duration::from_millis(self.artifact_max_age_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            housekeeping_every: self.housekeeping_every,
            memory_trim_fraction: self.memory_trim_fraction,
        }
    }

    pub fn preview_spec(&self) -> PreviewSpec {
        PreviewSpec { width: self.target_width, height: self.target_height, quality: self.artifact_quality }
    }

    pub fn feed_config(&self, start_item: Option<String>) -> FeedConfig {
        FeedConfig {
            loop_threshold_divisor: self.loop_threshold_divisor,
            recenter_delay_ms: self.recenter_delay_ms,
            prefetch_radius: self.prefetch_radius,
            resume_playback: self.resume_playback,
            start_item,
        }
    }
}

/// Replace `field` with `fallback(field)` unless `valid`. Returns 1 on change.
fn fix<T: Copy + std::fmt::Debug>(
    name: &str,
    field: &mut T,
    valid: impl Fn(&T) -> bool,
    fallback: impl FnOnce(&T) -> T,
) -> usize {
    if valid(field) {
        return 0;
    }
    let value = fallback(field);
    warn!("Setting {}: {:?} out of range, using {:?}", name, field, value);
    *field = value;
    1
}
