use loopfeed::cli::{Args, Command};
use loopfeed::core::artifact_cache::ArtifactCache;
use loopfeed::core::cache_budget::memory_budget;
use loopfeed::core::clock_engine::ClockEngine;
use loopfeed::core::feed_events::{FeedCommand, FeedEvent};
use loopfeed::core::preview_loader::PreviewRequest;
use loopfeed::core::services::FeedServices;
use loopfeed::entities::{CacheKey, FeedItem};
use loopfeed::paths::{self, PathConfig};
use loopfeed::settings::FeedSettings;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long `preview` waits for the workers
const PREVIEW_TIMEOUT: Duration = Duration::from_secs(120);

fn main() -> Result<()> {
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;
    info!("loopfeed {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!("Config path: {}", paths::settings_file(&path_config).display());
    info!("Previews path: {}", paths::previews_dir(&path_config).display());

    let mut settings = FeedSettings::load(&paths::settings_file(&path_config))?;
    settings.validate();

    match args.command {
        Command::Preview { sources, width, height } => {
            if let Some(w) = width {
                settings.target_width = w;
            }
            if let Some(h) = height {
                settings.target_height = h;
            }
            run_preview(settings, &path_config, &sources)
        }
        Command::Stats => run_stats(&settings, &path_config),
        Command::Sweep { max_age_secs } => run_sweep(&settings, &path_config, max_age_secs.map(Duration::from_secs)),
        Command::Clear => {
            let cache = open_cache(&settings, &path_config)?;
            println!("Removed {} previews from {}", cache.clear_all(), cache.dir().display());
            Ok(())
        }
        Command::Simulate { items, steps, pool, start, reverse } => {
            if let Some(n) = pool {
                settings.pool_size = n.max(1);
            }
            run_simulate(settings, &path_config, items, steps, start, reverse)
        }
    }
}

/// 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file(paths::LOG_FILE, path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn open_cache(settings: &FeedSettings, path_config: &PathConfig) -> Result<ArtifactCache> {
    let dir = paths::previews_dir(path_config);
    let memory = memory_budget(settings.memory_cache_bytes, settings.max_memory_fraction);
    ArtifactCache::open(&dir, settings.cache_limits(memory))
        .with_context(|| format!("Failed to open preview cache: {}", dir.display()))
}

fn build_services(settings: FeedSettings, path_config: &PathConfig) -> Result<FeedServices> {
    FeedServices::new(settings, &paths::previews_dir(path_config), &paths::progress_file(path_config))
}

fn item_for(source: &Path) -> FeedItem {
    let id = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string());
    FeedItem::new(id, source.to_string_lossy())
}

// ============================================================================
// Commands
// ============================================================================

fn run_preview(settings: FeedSettings, path_config: &PathConfig, sources: &[PathBuf]) -> Result<()> {
    let services = build_services(settings, path_config)?;
    let loader = services.previews();

    let items: Vec<FeedItem> = sources.iter().map(|s| item_for(s)).collect();
    info!("{} of {} previews queued", loader.warm(&items), items.len());

    // key -> sources waiting for it
    let mut pending: HashMap<CacheKey, Vec<String>> = HashMap::new();
    for item in &items {
        match loader.request(item) {
            PreviewRequest::Ready(path) => println!("{} -> {}", item.locator, path.display()),
            PreviewRequest::Queued | PreviewRequest::InFlight => {
                pending.entry(loader.key_for(item)).or_default().push(item.locator.clone());
            }
        }
    }

    let deadline = Instant::now() + PREVIEW_TIMEOUT;
    let mut failed = 0;
    while !pending.is_empty() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(result) = loader.recv_timeout(remaining) else {
            bail!("Timed out waiting for {} previews", pending.len());
        };
        let Some(waiting) = pending.remove(&result.key) else {
            continue;
        };
        for source in waiting {
            match (&result.path, result.placeholder) {
                (Some(path), false) => println!("{} -> {}", source, path.display()),
                (Some(path), true) => {
                    failed += 1;
                    println!("{} -> {} (placeholder)", source, path.display());
                }
                (None, _) => {
                    failed += 1;
                    println!("{} -> (failed)", source);
                }
            }
        }
    }

    let stats = services.cache().stats();
    info!("Preview cache: {} artifacts, {} bytes on disk", stats.disk_entries, stats.disk_bytes);
    services.shutdown();
    if failed > 0 {
        warn!("{} of {} previews could not be generated", failed, sources.len());
    }
    Ok(())
}

fn run_stats(settings: &FeedSettings, path_config: &PathConfig) -> Result<()> {
    let cache = open_cache(settings, path_config)?;
    let stats = cache.stats();
    let limits = cache.limits();
    println!("Previews: {}", cache.dir().display());
    println!("Memory:   {} entries, {} / {} bytes", stats.memory_entries, stats.memory_bytes, limits.memory_bytes);
    println!("Disk:     {} entries, {} / {} bytes", stats.disk_entries, stats.disk_bytes, limits.disk_bytes);
    println!("Max age:  {}s", limits.max_age.as_secs());

    let progress = loopfeed::core::progress_store::JsonProgressStore::open(paths::progress_file(path_config))
        .context("Failed to open progress store")?;
    println!("Progress: {} items", progress.len());
    for record in progress.recent(5) {
        println!("  {:<24} {:>8}ms / {}ms", record.item_id, record.position_ms, record.duration_ms);
    }
    Ok(())
}

fn run_sweep(settings: &FeedSettings, path_config: &PathConfig, max_age: Option<Duration>) -> Result<()> {
    let cache = open_cache(settings, path_config)?;
    let max_age = max_age.unwrap_or(cache.limits().max_age);
    let expired = cache.sweep_expired(max_age);
    let evicted = cache.evict_disk();
    let stats = cache.stats();
    println!(
        "Expired {}, evicted {}; {} previews remain ({} bytes)",
        expired, evicted, stats.disk_entries, stats.disk_bytes
    );
    Ok(())
}

fn run_simulate(
    settings: FeedSettings,
    path_config: &PathConfig,
    items: usize,
    steps: usize,
    start: Option<String>,
    reverse: bool,
) -> Result<()> {
    let services = build_services(settings, path_config)?;
    services.start()?;
    let mut feed = services.controller(ClockEngine::new, start);

    let catalog: Vec<FeedItem> = (0..items)
        .map(|i| FeedItem::new(format!("item-{}", i), format!("sim://item-{}", i)).with_duration(15_000))
        .collect();
    print_commands(&feed.dispatch(FeedEvent::ItemsChanged(catalog)));

    let delta = if reverse { -1 } else { 1 };
    for step in 0..steps {
        let from = feed.current_position();
        let to = from + delta;
        feed.dispatch(FeedEvent::Attached { position: to });
        print_commands(&feed.dispatch(FeedEvent::Scrolled { position: to, delta }));
        let settled = feed.current_position();
        let commands = feed.dispatch(FeedEvent::Settled { position: settled });
        feed.dispatch(FeedEvent::Detached { position: from });

        if let Some(item) = feed.item_at(settled) {
            println!("step {:>3}: position {} shows '{}'", step, settled, item.id);
        }
        print_commands(&commands);

        std::thread::sleep(Duration::from_millis(20));
        print_commands(&feed.dispatch(FeedEvent::Tick));
    }

    feed.dispatch(FeedEvent::Teardown);
    let stats = services.cache().stats();
    println!(
        "Cache: {} hits, {} misses ({:.0}% hit ratio)",
        stats.memory_hits + stats.disk_hits,
        stats.misses,
        stats.hit_ratio() * 100.0
    );
    services.shutdown();
    Ok(())
}

fn print_commands(commands: &[FeedCommand]) {
    for command in commands {
        match command {
            FeedCommand::SetItemCount(n) => println!("  item count {}", n),
            FeedCommand::ScrollTo { position, .. } => println!("  scroll to {}", position),
            FeedCommand::Activated { position, real_index, slot } => {
                println!("  activated {} (item #{}, slot {})", position, real_index, slot)
            }
            FeedCommand::ShowPreview { position, item_id, path, placeholder } => println!(
                "  preview {} '{}' {}{}",
                position,
                item_id,
                path.display(),
                if *placeholder { " (placeholder)" } else { "" }
            ),
            FeedCommand::Empty => println!("  empty feed"),
        }
    }
}
