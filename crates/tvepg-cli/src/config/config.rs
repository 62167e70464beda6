//! `AppConfig` struct and TOML read/write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tvepg_xmltv::RepairOptions;
use url::Url;

use crate::pipeline::Input;

/// Accepted layouts for `rollover_window_end`.
const WINDOW_FORMATS: &[&str] = &["%H:%M:%S", "%H:%M"];

/// Top-level application configuration.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// Repair engine settings.
    #[serde(default)]
    pub repair: RepairConfig,
    /// HTTP client settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// EPG sources processed by `tvepg fetch`.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Repair engine configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairConfig {
    /// End of the rollover window, `HH:MM:SS` (exclusive).
    #[serde(default = "default_rollover_window_end")]
    pub rollover_window_end: String,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            rollover_window_end: default_rollover_window_end(),
        }
    }
}

fn default_rollover_window_end() -> String {
    String::from("06:00:00")
}

impl RepairConfig {
    /// Converts to engine options.
    ///
    /// # Errors
    ///
    /// Returns an error if `rollover_window_end` is not a valid time of day.
    pub fn to_options(&self) -> Result<RepairOptions> {
        Ok(RepairOptions {
            rollover_window_end: parse_window_end(&self.rollover_window_end)?,
        })
    }
}

/// Parses a `HH:MM:SS` (or `HH:MM`) time of day.
///
/// # Errors
///
/// Returns an error for anything else.
pub fn parse_window_end(value: &str) -> Result<NaiveTime> {
    WINDOW_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(value.trim(), f).ok())
        .with_context(|| format!("invalid rollover window end {value:?} (expected HH:MM:SS)"))
}

/// HTTP client configuration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchConfig {
    /// User-Agent header; defaults to `tvepg/<version>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, in seconds.
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// Retry delay cap, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Pause between two remote sources, in seconds.
    #[serde(default = "default_source_delay_secs")]
    pub source_delay_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            source_delay_secs: default_source_delay_secs(),
        }
    }
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_secs() -> u64 {
    2
}

const fn default_max_backoff_secs() -> u64 {
    30
}

const fn default_source_delay_secs() -> u64 {
    2
}

impl FetchConfig {
    /// Pause between two remote sources.
    #[must_use]
    pub const fn source_delay(&self) -> Duration {
        Duration::from_secs(self.source_delay_secs)
    }
}

/// One EPG source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Name used in logs and `--only`.
    pub name: String,
    /// Remote feed URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Local feed path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Where the processed document is written.
    pub output: PathBuf,
    /// Run the repair engine.
    #[serde(default = "default_true")]
    pub repair: bool,
    /// Escape bare `&` characters before parsing.
    #[serde(default)]
    pub escape_ampersands: bool,
}

const fn default_true() -> bool {
    true
}

impl SourceConfig {
    /// Resolves where the feed is read from.
    ///
    /// # Errors
    ///
    /// Returns an error if both or neither of `url` and `path` are set, or
    /// the URL is invalid.
    pub fn input(&self) -> Result<Input> {
        match (&self.url, &self.path) {
            (Some(url), None) => {
                let url = Url::parse(url)
                    .with_context(|| format!("source {:?}: invalid url {url:?}", self.name))?;
                Ok(Input::Remote(url))
            }
            (None, Some(path)) => Ok(Input::Local(path.clone())),
            (Some(_), Some(_)) => bail!("source {:?}: set either url or path, not both", self.name),
            (None, None) => bail!("source {:?}: url or path is required", self.name),
        }
    }
}

impl AppConfig {
    /// Loads config from a TOML file. Returns default if file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Saves config to a TOML file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or file write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config to TOML")?;
        std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Checks values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        self.repair.to_options()?;
        if self.fetch.max_backoff_secs < self.fetch.initial_backoff_secs {
            bail!(
                "fetch.max_backoff_secs ({}) is lower than fetch.initial_backoff_secs ({})",
                self.fetch.max_backoff_secs,
                self.fetch.initial_backoff_secs
            );
        }

        let mut names = HashSet::with_capacity(self.sources.len());
        for source in &self.sources {
            if !names.insert(source.name.as_str()) {
                bail!("duplicate source name {:?}", source.name);
            }
            source.input()?;
        }
        Ok(())
    }
}
