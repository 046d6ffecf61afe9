//! CLI entry point for the video downloader.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};
use video_downloader_core::config::load_config;

mod app;
mod cli;

use app::commands;
use app::runtime::Runtime;
use app::settings::{resolve_default_log_level, resolve_settings};
use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let loaded = load_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = resolve_default_log_level(&args, &loaded.config);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    debug!(
        path = ?loaded.path,
        loaded_from_file = loaded.loaded_from_file,
        "configuration resolved"
    );

    if let Command::Classify { urls } = &args.command {
        return commands::classify_urls(urls);
    }

    let settings = resolve_settings(&args, &loaded.config)?;
    info!(
        output_dir = %settings.output_dir.display(),
        state_file = %settings.state_file.display(),
        "video downloader starting"
    );
    let runtime = Runtime::build(settings).await?;

    let result = match args.command {
        Command::Download { url, title, duration } => {
            commands::download(&runtime, &url, title, duration, args.quiet).await
        }
        Command::Status => {
            commands::status(&runtime).await;
            Ok(())
        }
        Command::Clear { all } => commands::clear(&runtime, all).await,
        Command::Classify { .. } => Ok(()),
    };

    runtime.shutdown().await;
    result
}
