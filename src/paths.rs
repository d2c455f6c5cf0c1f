use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Settings file name
pub const SETTINGS_FILE: &str = crate::settings::SETTINGS_FILE;
/// Persisted playback progress
pub const PROGRESS_FILE: &str = "progress.json";
/// Default log file for `--log`
pub const LOG_FILE: &str = "loopfeed.log";
/// Preview artifact directory under the data directory
pub const PREVIEWS_DIR: &str = "previews";

const APP_DIR: &str = "loopfeed";
const CONFIG_DIR_ENV: &str = "LOOPFEED_CONFIG_DIR";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (LOOPFEED_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. LOOPFEED_CONFIG_DIR environment variable
/// 3. Local folder IF any loopfeed files exist (loopfeed.json, progress.json, loopfeed.log)
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/loopfeed/{name}
/// - macOS: ~/Library/Application Support/loopfeed/{name}
/// - Windows: %APPDATA%\loopfeed\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    get_config_dir(config).join(name)
}

/// Get path to a data file (previews, progress, logs)
///
/// Same priority as `config_file`, with the platform data directory last:
/// - Linux: ~/.local/share/loopfeed/{name}
/// - macOS: ~/Library/Application Support/loopfeed/{name}
/// - Windows: %APPDATA%\loopfeed\{name}
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    get_data_dir(config).join(name)
}

pub fn settings_file(config: &PathConfig) -> PathBuf {
    config_file(SETTINGS_FILE, config)
}

pub fn previews_dir(config: &PathConfig) -> PathBuf {
    data_file(PREVIEWS_DIR, config)
}

pub fn progress_file(config: &PathConfig) -> PathBuf {
    data_file(PROGRESS_FILE, config)
}

/// Ensure that configuration, data and preview directories exist
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = get_config_dir(config);
    let data_dir = get_data_dir(config);

    for dir in [&config_dir, &data_dir, &data_dir.join(PREVIEWS_DIR)] {
        if !dir.exists() {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

/// Check if any loopfeed files exist in the given directory
fn has_local_config_files(dir: &Path) -> bool {
    [SETTINGS_FILE, PROGRESS_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn local_dir() -> Option<PathBuf> {
    std::env::current_dir().ok().filter(|dir| has_local_config_files(dir))
}

fn get_config_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::config_dir().map(|d| d.join(APP_DIR)).unwrap_or_else(|| PathBuf::from("."))
}

fn get_data_dir(config: &PathConfig) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(dir) = local_dir() {
        return dir;
    }
    dirs_next::data_dir().map(|d| d.join(APP_DIR)).unwrap_or_else(|| PathBuf::from("."))
}
