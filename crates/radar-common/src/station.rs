//! Radar station identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// ICAO-style radar site code such as `KTLX`.
///
/// Construction only normalizes (trim + uppercase); whether the code names a
/// real site is decided by the site registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

impl StationId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Codes are short and ASCII alphanumeric.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= 8 && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for StationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
