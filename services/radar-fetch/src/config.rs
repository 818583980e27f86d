//! Resolution of archive settings from file, environment and flags.
//!
//! Precedence, lowest first: built-in defaults, `--config` YAML file,
//! `RADAR_*` environment variables, explicit command-line flags.

use std::path::Path;

use anyhow::{Context, Result};
use radar_ingestion::{ArchiveConfig, ListingFormat};
use tracing::debug;

/// Flag values that override everything else when present.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides<'a> {
    pub config_file: Option<&'a Path>,
    pub archive_root: Option<&'a str>,
    pub timeout_secs: Option<u64>,
    pub listing_format: Option<ListingFormat>,
}

pub fn resolve(overrides: &ConfigOverrides<'_>) -> Result<ArchiveConfig> {
    let base = match overrides.config_file {
        Some(path) => ArchiveConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => ArchiveConfig::default(),
    };

    let mut config = base
        .with_env_overrides()
        .context("Invalid RADAR_* environment settings")?;

    if let Some(root) = overrides.archive_root {
        config.archive_root = root.to_string();
    }
    if let Some(secs) = overrides.timeout_secs {
        config.request_timeout_secs = secs;
    }
    if let Some(format) = overrides.listing_format {
        config.listing_format = format;
    }
    config.validate().context("Invalid archive settings")?;

    debug!(
        root = %config.archive_root,
        timeout_secs = config.request_timeout_secs,
        listing = %config.resolved_listing_format(),
        "Resolved archive config"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.yaml");
        std::fs::write(&path, "archive_root: http://file.example\nrequest_timeout_secs: 30\n").unwrap();

        let config = resolve(&ConfigOverrides {
            config_file: Some(&path),
            archive_root: Some("http://flag.example"),
            timeout_secs: None,
            listing_format: None,
        })
        .unwrap();

        assert_eq!(config.archive_root, "http://flag.example");
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_listing_format_flag() {
        let config = resolve(&ConfigOverrides {
            archive_root: Some("http://mirror.example"),
            listing_format: Some(ListingFormat::S3),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.resolved_listing_format(), ListingFormat::S3);

        let config = resolve(&ConfigOverrides {
            archive_root: Some("http://mirror.example"),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.resolved_listing_format(), ListingFormat::Html);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = resolve(&ConfigOverrides {
            timeout_secs: Some(0),
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let result = resolve(&ConfigOverrides {
            config_file: Some(Path::new("/nonexistent/archive.yaml")),
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
