//! Memory budget for the artifact cache's memory tier.
//!
//! The configured memory ceiling is clamped to a fraction of the memory the
//! system currently reports as available, so a small device doesn't
//! blindly reserve the default.

use log::{info, warn};
use sysinfo::System;

/// Bytes of memory currently available to new allocations.
pub fn available_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.available_memory()
}

/// Clamp `configured` bytes to `fraction` of `available` bytes.
///
/// `available == 0` means "unknown" and leaves the configured value alone.
pub fn clamp_to_available(configured: u64, available: u64, fraction: f64) -> u64 {
    if available == 0 {
        return configured;
    }
    let fraction = fraction.clamp(0.0, 1.0);
    let ceiling = (available as f64 * fraction) as u64;
    configured.min(ceiling)
}

/// Effective memory-tier ceiling for this machine.
pub fn memory_budget(configured: u64, fraction: f64) -> u64 {
    let available = available_memory();
    let budget = clamp_to_available(configured, available, fraction);
    if budget < configured {
        warn!(
            "Memory cache limited to {} MB ({}% of {} MB available, {} MB configured)",
            budget / 1024 / 1024,
            (fraction * 100.0) as u32,
            available / 1024 / 1024,
            configured / 1024 / 1024
        );
    } else {
        info!(
            "Memory cache budget: {} MB (available={} MB)",
            budget / 1024 / 1024,
            available / 1024 / 1024
        );
    }
    budget
}
