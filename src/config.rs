//! Configuration file parser for ~/.config/tankobon/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged, since they are usually
//! typos of real keys.
use crate::orchestrator::{ChapterRange, HarvestSettings, RangeEnd};
use crate::scheduler::{RetryDelay, RetryPolicy, SchedulerSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Values parse but cannot drive a run.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Which discovery backend enumerates pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryKind {
    /// Latest chapter from the RSS feed, pages by numeric probing
    #[default]
    Feed,
    /// Pages listed from each chapter's rendered reader view
    PageScan,
}

/// Shape of the pause between retries of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
}

/// Top-level harvest configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chapters harvested at once.
    pub concurrent_chapters: usize,
    /// Pages fetched at once within one chapter.
    pub concurrent_pages: usize,
    /// Chapters per window; a pause follows each window.
    pub window_size_chapters: usize,
    pub window_size_pages: usize,

    /// Attempts per page or chapter before it is abandoned.
    pub retry_patience: u32,
    /// Pause before a retry, in seconds. 0 retries immediately.
    pub retry_delay_seconds: f64,
    pub retry_backoff: Backoff,

    /// Pause between chapter windows, in seconds.
    pub inter_window_delay_seconds: f64,
    /// Pause between page windows, in seconds.
    pub page_window_delay_seconds: f64,

    pub range_begin: u32,
    /// Last chapter, or `"discover"` to ask the feed.
    pub range_end: RangeEnd,

    pub request_timeout_seconds: u64,
    /// Bound on loading one chapter view in page-scan mode.
    pub settle_timeout_seconds: u64,

    pub discovery: DiscoveryKind,
    pub feed_origin: String,
    pub site_origin: String,
    pub image_origin: String,

    /// Pages land in `<output_dir>/<series slug>/`.
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrent_chapters: 10,
            concurrent_pages: 5,
            window_size_chapters: 10,
            window_size_pages: 5,
            retry_patience: 3,
            retry_delay_seconds: 0.0,
            retry_backoff: Backoff::Fixed,
            inter_window_delay_seconds: 300.0,
            page_window_delay_seconds: 0.0,
            range_begin: 1,
            range_end: RangeEnd::Discover,
            request_timeout_seconds: 30,
            settle_timeout_seconds: 60,
            discovery: DiscoveryKind::Feed,
            feed_origin: "https://manga4life.com/rss".to_string(),
            site_origin: "https://manga4life.com".to_string(),
            image_origin: "https://scans-hot.leanbox.us/manga".to_string(),
            output_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 18] = [
        "concurrent_chapters",
        "concurrent_pages",
        "window_size_chapters",
        "window_size_pages",
        "retry_patience",
        "retry_delay_seconds",
        "retry_backoff",
        "inter_window_delay_seconds",
        "page_window_delay_seconds",
        "range_begin",
        "range_end",
        "request_timeout_seconds",
        "settle_timeout_seconds",
        "discovery",
        "feed_origin",
        "site_origin",
        "image_origin",
        "output_dir",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    ///
    /// Values are not validated here; call [`Config::validate`] once CLI
    /// overrides have been applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file is never pulled into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), discovery = ?config.discovery, "Loaded configuration");
        Ok(config)
    }

    /// Reject values that cannot drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let caps = [
            ("concurrent_chapters", self.concurrent_chapters),
            ("concurrent_pages", self.concurrent_pages),
            ("window_size_chapters", self.window_size_chapters),
            ("window_size_pages", self.window_size_pages),
        ];
        for (key, value) in caps {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }
        if self.retry_patience == 0 {
            return Err(ConfigError::Invalid(
                "retry_patience must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_seconds must be at least 1".to_string(),
            ));
        }

        let delays = [
            ("retry_delay_seconds", self.retry_delay_seconds),
            ("inter_window_delay_seconds", self.inter_window_delay_seconds),
            ("page_window_delay_seconds", self.page_window_delay_seconds),
        ];
        for (key, value) in delays {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be a non-negative number of seconds, got {value}"
                )));
            }
        }

        if self.range_begin == 0 {
            return Err(ConfigError::Invalid(
                "range_begin must be at least 1 (chapters are numbered from 1)".to_string(),
            ));
        }
        if let RangeEnd::Index(end) = self.range_end {
            if end < self.range_begin {
                return Err(ConfigError::Invalid(format!(
                    "range_end ({end}) is before range_begin ({})",
                    self.range_begin
                )));
            }
        }

        for (key, origin) in [
            ("feed_origin", &self.feed_origin),
            ("site_origin", &self.site_origin),
            ("image_origin", &self.image_origin),
        ] {
            validate_origin(key, origin)?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let delay = seconds(self.retry_delay_seconds);
        let delay = if delay.is_zero() {
            RetryDelay::None
        } else {
            match self.retry_backoff {
                Backoff::Fixed => RetryDelay::Fixed(delay),
                Backoff::Linear => RetryDelay::Linear(delay),
            }
        };
        RetryPolicy::new(self.retry_patience, delay)
    }

    /// Settings of the chapter and page schedulers.
    pub fn harvest_settings(&self) -> HarvestSettings {
        let retry = self.retry_policy();
        HarvestSettings {
            chapters: SchedulerSettings::new(self.concurrent_chapters)
                .with_window_size(self.window_size_chapters)
                .with_pacing(seconds(self.inter_window_delay_seconds))
                .with_retry(retry),
            pages: SchedulerSettings::new(self.concurrent_pages)
                .with_window_size(self.window_size_pages)
                .with_pacing(seconds(self.page_window_delay_seconds))
                .with_retry(retry),
        }
    }

    pub fn chapter_range(&self) -> ChapterRange {
        ChapterRange {
            begin: self.range_begin,
            end: self.range_end,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_seconds)
    }
}

/// Non-finite or negative values become zero; `validate` rejects them first.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn validate_origin(key: &str, origin: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(origin)
        .map_err(|e| ConfigError::Invalid(format!("{key} is not a valid URL ({e}): {origin}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(ConfigError::Invalid(format!(
            "{key} must use http or https, got {scheme}://"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
