//! Archive access configuration.
//!
//! Values come from built-in defaults, optionally a YAML file, and finally
//! environment overrides:
//!
//! ```yaml
//! archive_root: https://noaa-nexrad-level2.s3.amazonaws.com
//! listing_format: auto   # auto | html | s3
//! request_timeout_secs: 10
//! extensions: [".ar2v", ".gz"]
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use radar_common::{RadarError, RadarResult};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_ARCHIVE_ROOT: &str = "https://noaa-nexrad-level2.s3.amazonaws.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const ENV_ARCHIVE_ROOT: &str = "RADAR_ARCHIVE_ROOT";
pub const ENV_TIMEOUT_SECS: &str = "RADAR_TIMEOUT_SECS";
pub const ENV_LISTING_FORMAT: &str = "RADAR_LISTING_FORMAT";

/// How the archive answers a request for a station's day of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingFormat {
    /// `S3` for roots on `amazonaws.com`, `Html` otherwise
    #[default]
    Auto,
    /// HTML index served at `{root}/YYYY/MM/DD/{STATION}/`
    Html,
    /// ListObjectsV2 XML from `{root}/?list-type=2&prefix=YYYY/MM/DD/{STATION}/`
    S3,
}

impl FromStr for ListingFormat {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ListingFormat::Auto),
            "html" => Ok(ListingFormat::Html),
            "s3" => Ok(ListingFormat::S3),
            other => Err(RadarError::Configuration(format!(
                "unknown listing format '{other}' (expected auto, html or s3)"
            ))),
        }
    }
}

impl fmt::Display for ListingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ListingFormat::Auto => "auto",
            ListingFormat::Html => "html",
            ListingFormat::S3 => "s3",
        })
    }
}

/// Settings for talking to the date-partitioned radar archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Base URL; station directories live at `{root}/YYYY/MM/DD/{STATION}/`
    pub archive_root: String,
    pub listing_format: ListingFormat,
    /// Sent as the `User-Agent` header on every request
    pub user_agent: String,
    /// Upper bound for each HTTP request
    pub request_timeout_secs: u64,
    /// Accepted volume file extensions, matched case-insensitively
    pub extensions: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_root: DEFAULT_ARCHIVE_ROOT.to_string(),
            listing_format: ListingFormat::Auto,
            user_agent: default_user_agent(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            extensions: vec![".ar2v".to_string(), ".gz".to_string()],
        }
    }
}

fn default_user_agent() -> String {
    format!("radar-fetch/{}", env!("CARGO_PKG_VERSION"))
}

impl ArchiveConfig {
    /// Load from a YAML file. Keys that are absent keep their defaults.
    pub fn load(path: &Path) -> RadarResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RadarError::Configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        let config: ArchiveConfig = serde_yaml::from_str(&content).map_err(|e| {
            RadarError::Configuration(format!(
                "failed to parse config file {}: {e}",
                path.display()
            ))
        })?;

        config.validate()?;
        debug!(path = %path.display(), root = %config.archive_root, "Loaded archive config");
        Ok(config)
    }

    /// Apply `RADAR_ARCHIVE_ROOT`, `RADAR_LISTING_FORMAT` and
    /// `RADAR_TIMEOUT_SECS` from the process environment.
    pub fn with_env_overrides(self) -> RadarResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> RadarResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ARCHIVE_ROOT).filter(|v| !v.trim().is_empty()) {
            self.archive_root = root.trim().to_string();
        }
        if let Some(format) = lookup(ENV_LISTING_FORMAT).filter(|v| !v.trim().is_empty()) {
            self.listing_format = format.parse()?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = raw.trim().parse().map_err(|_| {
                RadarError::Configuration(format!("{ENV_TIMEOUT_SECS} must be an integer, got '{raw}'"))
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> RadarResult<()> {
        if self.archive_root.trim().is_empty() {
            return Err(RadarError::Configuration("archive_root is empty".to_string()));
        }
        Url::parse(&self.archive_root).map_err(|e| {
            RadarError::Configuration(format!("archive_root '{}' is not a URL: {e}", self.archive_root))
        })?;
        if self.request_timeout_secs == 0 {
            return Err(RadarError::Configuration(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(RadarError::Configuration(
                "at least one volume extension is required".to_string(),
            ));
        }
        if let Some(bad) = self.extensions.iter().find(|e| !e.starts_with('.') || e.len() < 2) {
            return Err(RadarError::Configuration(format!(
                "extension '{bad}' must start with '.'"
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Concrete listing format, resolving `Auto` from the root's host.
    pub fn resolved_listing_format(&self) -> ListingFormat {
        match self.listing_format {
            ListingFormat::Auto => {
                let on_s3 = Url::parse(&self.archive_root)
                    .ok()
                    .and_then(|url| url.host_str().map(|h| h.ends_with(".amazonaws.com")))
                    .unwrap_or(false);
                if on_s3 {
                    ListingFormat::S3
                } else {
                    ListingFormat::Html
                }
            }
            explicit => explicit,
        }
    }
}
