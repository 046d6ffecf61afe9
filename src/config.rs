//! File-backed configuration defaults.
//!
//! The file uses simple `key = value` lines with `#` comments. Values from
//! the file sit between the built-in defaults and command-line flags.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Default interval between progress polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default wall-clock budget for one acquisition.
pub const DEFAULT_ACQUISITION_BUDGET_SECS: u64 = 600;

/// Default cap on stream capture length.
pub const DEFAULT_MAX_CAPTURE_SECS: u64 = 600;

const APP_DIR: &str = "video-downloader";

/// Values read from `config.toml`. Unset keys are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Directory downloads are written to.
    pub output_dir: Option<PathBuf>,
    /// JSON file holding tracker state.
    pub state_file: Option<PathBuf>,
    /// Progress poll interval in milliseconds (100..=60000).
    pub poll_interval_ms: Option<u64>,
    /// Acquisition budget in seconds (1..=3600).
    pub acquisition_budget_secs: Option<u64>,
    /// Stream capture cap in seconds (1..=3600).
    pub max_capture_secs: Option<u64>,
    /// HTTP connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
    /// Default verbosity.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Names the offending key and the accepted range.
    pub fn validate(&self) -> Result<()> {
        if let Some(poll) = self.poll_interval_ms
            && !(100..=60_000).contains(&poll)
        {
            bail!("Invalid config value for `poll_interval_ms`: {poll}. Expected range: 100..=60000");
        }
        validate_secs("acquisition_budget_secs", self.acquisition_budget_secs)?;
        validate_secs("max_capture_secs", self.max_capture_secs)?;
        validate_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }

    /// Poll interval, or the default.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Acquisition budget, or the default.
    #[must_use]
    pub fn acquisition_budget(&self) -> Duration {
        Duration::from_secs(
            self.acquisition_budget_secs
                .unwrap_or(DEFAULT_ACQUISITION_BUDGET_SECS),
        )
    }

    /// Stream capture cap, or the default.
    #[must_use]
    pub fn max_capture(&self) -> Duration {
        Duration::from_secs(self.max_capture_secs.unwrap_or(DEFAULT_MAX_CAPTURE_SECS))
    }
}

fn validate_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl FromStr for VerbositySetting {
    type Err = anyhow::Error;

    fn from_str(label: &str) -> Result<Self> {
        Ok(match label {
            "default" => Self::Default,
            "verbose" => Self::Verbose,
            "quiet" => Self::Quiet,
            "debug" => Self::Debug,
            other => bail!("Unknown verbosity '{other}'. Expected one of: default, verbose, quiet, debug"),
        })
    }
}

/// Result of looking for the default config file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path, if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config; default when no file exists.
    pub config: FileConfig,
    /// True when the values came from disk.
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/video-downloader/config.toml`
/// 2. `$HOME/.config/video-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

/// Default location of the tracker state file, next to the config.
#[must_use]
pub fn default_state_file() -> Option<PathBuf> {
    resolve_default_config_path()
        .and_then(|path| path.parent().map(|dir| dir.join("downloads.json")))
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config at `explicit`, or at the default path if it exists.
///
/// An explicit path must exist; a missing default file yields defaults.
///
/// # Errors
///
/// Fails when the file cannot be read or does not parse.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config,
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&contents).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(contents: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (number, line) in contents.lines().enumerate().map(|(index, line)| (index + 1, line)) {
        let entry = without_comment(line).trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once('=')
            .map(|(key, value)| (key.trim(), value.trim()))
            .with_context(|| format!("Invalid config syntax on line {number}: expected key = value"))?;
        let at = || format!("Invalid `{key}` value on line {number}");

        match key {
            "output_dir" => cfg.output_dir = Some(quoted(value).with_context(at)?.into()),
            "state_file" => cfg.state_file = Some(quoted(value).with_context(at)?.into()),
            "poll_interval_ms" => cfg.poll_interval_ms = Some(number_value(value).with_context(at)?),
            "acquisition_budget_secs" => cfg.acquisition_budget_secs = Some(number_value(value).with_context(at)?),
            "max_capture_secs" => cfg.max_capture_secs = Some(number_value(value).with_context(at)?),
            "connect_timeout_secs" => cfg.connect_timeout_secs = Some(number_value(value).with_context(at)?),
            "read_timeout_secs" => cfg.read_timeout_secs = Some(number_value(value).with_context(at)?),
            "verbosity" => {
                let label = quoted(value).with_context(at)?;
                cfg.verbosity = Some(label.parse::<VerbositySetting>().with_context(at)?);
            }
            unknown => bail!("Unknown configuration key: '{unknown}' on line {number}"),
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Cuts a trailing `#` comment, ignoring `#` inside double quotes.
fn without_comment(line: &str) -> &str {
    let mut in_quotes = false;
    let end = line
        .char_indices()
        .find(|&(_, ch)| {
            if ch == '"' {
                in_quotes = !in_quotes;
            }
            ch == '#' && !in_quotes
        })
        .map_or(line.len(), |(index, _)| index);
    &line[..end]
}

fn quoted(value: &str) -> Result<String> {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .context("Expected double-quoted string")
}

fn number_value(value: &str) -> Result<u64> {
    if value.starts_with('-') {
        bail!("Expected non-negative integer, got '{value}'");
    }
    value
        .parse::<u64>()
        .with_context(|| format!("Expected integer, got '{value}'"))
}
