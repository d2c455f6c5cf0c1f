use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build version with backend info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Previews: image 0.25 (JPEG)\n",
    "Target:   ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Virtualized looping video feed engine
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable logging to file (default: loopfeed.log in the data directory)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate (or look up) previews for local media and print their paths
    Preview {
        /// Source files
        #[arg(value_name = "SOURCE", required = true)]
        sources: Vec<PathBuf>,

        /// Output bounding box width (default: from settings)
        #[arg(long, value_name = "PX")]
        width: Option<u32>,

        /// Output bounding box height (default: from settings)
        #[arg(long, value_name = "PX")]
        height: Option<u32>,
    },

    /// Print cache tier sizes and limits
    Stats,

    /// Delete expired previews and enforce the disk ceiling
    Sweep {
        /// Override the configured maximum age
        #[arg(long = "max-age-secs", value_name = "N")]
        max_age_secs: Option<u64>,
    },

    /// Remove every cached preview
    Clear,

    /// Drive a synthetic feed with headless engines and print activations
    Simulate {
        /// Items in the synthetic feed
        #[arg(long, value_name = "N", default_value_t = 12)]
        items: usize,

        /// Settle steps to perform
        #[arg(long, value_name = "K", default_value_t = 20)]
        steps: usize,

        /// Playback engines (default: from settings)
        #[arg(long, value_name = "N")]
        pool: Option<usize>,

        /// Item id to start at
        #[arg(long, value_name = "ID")]
        start: Option<String>,

        /// Scroll backwards instead of forwards
        #[arg(long)]
        reverse: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_simulate() {
        let args = Args::parse_from(["loopfeed", "-vv", "simulate", "--items", "5", "--pool", "3"]);
        assert_eq!(args.verbosity, 2);
        match args.command {
            Command::Simulate { items, steps, pool, start, reverse } => {
                assert_eq!((items, steps, pool), (5, 20, Some(3)));
                assert!(start.is_none());
                assert!(!reverse);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_log_flag_without_file() {
        let args = Args::parse_from(["loopfeed", "stats", "--log"]);
        assert_eq!(args.log_file, Some(None));
        let args = Args::parse_from(["loopfeed", "--log", "x.log", "clear"]);
        assert_eq!(args.log_file, Some(Some(PathBuf::from("x.log"))));
    }
}
