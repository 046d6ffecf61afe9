//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Detect, acquire and track downloads of web video resources.
///
/// Direct video URLs are handed to the built-in download manager; anything
/// else goes through the acquisition chain. Progress and history persist in
/// a state file between runs.
#[derive(Parser, Debug)]
#[command(name = "video-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/video-downloader/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory downloads are written to
    #[arg(short = 'o', long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// JSON file holding download state
    #[arg(long, global = true, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Progress poll interval in milliseconds (100-60000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(100..=60000))]
    pub poll_interval_ms: Option<u64>,

    /// Give up on an acquisition after this many seconds (1-3600)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub acquisition_budget_secs: Option<u64>,

    /// Longest stream capture in seconds (1-3600)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub max_capture_secs: Option<u64>,

    /// HTTP connect timeout in seconds (1-3600)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout_secs: Option<u64>,

    /// HTTP read timeout in seconds (1-3600)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Classify URLs without downloading them
    Classify {
        /// URLs to classify
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Download a video and follow its progress
    Download {
        /// Video URL
        url: String,

        /// Display title (defaults to the last path segment)
        #[arg(short, long)]
        title: Option<String>,

        /// Media duration in seconds, if known
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Show active and finished downloads from the state file
    Status,

    /// Remove finished downloads from the history
    Clear {
        /// Also cancel and remove active downloads
        #[arg(long)]
        all: bool,
    },
}
