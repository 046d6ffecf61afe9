//! Merges CLI flags with config file values into runtime settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use video_downloader_core::acquisition::CapturePolicy;
use video_downloader_core::config::{FileConfig, VerbositySetting, default_state_file};
use video_downloader_core::http::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS, HttpSettings};

use crate::cli::Args;

/// Effective settings for one run. CLI flags win over config values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) output_dir: PathBuf,
    pub(crate) state_file: PathBuf,
    pub(crate) poll_interval: Duration,
    pub(crate) acquisition_budget: Duration,
    pub(crate) capture: CapturePolicy,
    pub(crate) http: HttpSettings,
}

pub(crate) fn resolve_settings(args: &Args, file: &FileConfig) -> Result<Settings> {
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let Some(state_file) = args
        .state_file
        .clone()
        .or_else(|| file.state_file.clone())
        .or_else(default_state_file)
    else {
        bail!("No state file location: pass --state-file or set HOME");
    };

    let poll_interval = args
        .poll_interval_ms
        .map_or_else(|| file.poll_interval(), Duration::from_millis);
    let acquisition_budget = args
        .acquisition_budget_secs
        .map_or_else(|| file.acquisition_budget(), Duration::from_secs);
    let max_capture = args
        .max_capture_secs
        .map_or_else(|| file.max_capture(), Duration::from_secs);

    let connect = args
        .connect_timeout_secs
        .or(file.connect_timeout_secs)
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
    let read = args
        .read_timeout_secs
        .or(file.read_timeout_secs)
        .unwrap_or(DEFAULT_READ_TIMEOUT_SECS);

    Ok(Settings {
        output_dir,
        state_file,
        poll_interval,
        acquisition_budget,
        capture: CapturePolicy {
            max_capture,
            ..CapturePolicy::default()
        },
        http: HttpSettings {
            connect_timeout: Duration::from_secs(connect),
            read_timeout: Duration::from_secs(read),
        },
    })
}

/// Log level used when `RUST_LOG` is unset.
///
/// Priority: quiet flag > verbose flag > config verbosity > info.
pub(crate) fn resolve_default_log_level(args: &Args, file: &FileConfig) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => {}
        1 => return "debug",
        _ => return "trace",
    }
    match file.verbosity {
        Some(VerbositySetting::Quiet) => "error",
        Some(VerbositySetting::Verbose) => "debug",
        Some(VerbositySetting::Debug) => "trace",
        Some(VerbositySetting::Default) | None => "info",
    }
}
