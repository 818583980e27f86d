//! NEXRAD site registry.
//!
//! The catalog is a JSON array of records; only `id` and `name` are
//! required:
//!
//! ```json
//! [{"id": "KTLX", "name": "Oklahoma City, OK", "latitude": 35.333, "longitude": -97.278}]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use radar_common::{RadarError, RadarResult, StationId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BUNDLED_CATALOG: &str = include_str!("../data/nexrad_sites.json");

static BUNDLED: OnceCell<Result<Arc<SiteRegistry>, String>> = OnceCell::new();

/// One radar site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: StationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_m: Option<f64>,
}

impl SiteRecord {
    /// (latitude, longitude) when the catalog carries both.
    pub fn location(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// Immutable set of known radar sites.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    sites: BTreeMap<StationId, SiteRecord>,
}

impl SiteRegistry {
    /// Parse a catalog from JSON text.
    pub fn from_json(text: &str) -> RadarResult<Self> {
        parse_catalog(text).map_err(RadarError::Configuration)
    }

    /// Load a catalog file.
    pub fn load(path: &Path) -> RadarResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RadarError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let registry = Self::from_json(&text)?;
        info!(path = %path.display(), sites = registry.len(), "Loaded site catalog");
        Ok(registry)
    }

    /// The catalog compiled into this binary.
    ///
    /// Parsed on first use; the outcome, success or failure, is kept for the
    /// life of the process.
    pub fn bundled() -> RadarResult<Arc<SiteRegistry>> {
        BUNDLED
            .get_or_init(|| {
                let result = parse_catalog(BUNDLED_CATALOG).map(Arc::new);
                if let Ok(registry) = &result {
                    debug!(sites = registry.len(), "Parsed bundled site catalog");
                }
                result
            })
            .clone()
            .map_err(RadarError::Configuration)
    }

    /// Normalize `station` and check it names a known site.
    pub fn validate(&self, station: &str) -> RadarResult<StationId> {
        let id = StationId::new(station);
        if self.sites.contains_key(&id) {
            Ok(id)
        } else {
            Err(RadarError::InvalidStation(station.to_string()))
        }
    }

    pub fn is_valid(&self, station: &str) -> bool {
        self.validate(station).is_ok()
    }

    pub fn get(&self, station: &str) -> Option<&SiteRecord> {
        self.sites.get(&StationId::new(station))
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Site ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &StationId> {
        self.sites.keys()
    }

    /// Records in id order.
    pub fn records(&self) -> impl Iterator<Item = &SiteRecord> {
        self.sites.values()
    }
}

fn parse_catalog(text: &str) -> Result<SiteRegistry, String> {
    let records: Vec<SiteRecord> =
        serde_json::from_str(text).map_err(|e| format!("malformed site catalog: {e}"))?;
    if records.is_empty() {
        return Err("site catalog is empty".to_string());
    }

    let mut sites = BTreeMap::new();
    for mut record in records {
        // Ids pass through serde untouched, so normalize here.
        record.id = StationId::new(record.id.as_str());
        if !record.id.is_well_formed() {
            return Err(format!("invalid site id '{}'", record.id));
        }
        if let Some(previous) = sites.insert(record.id.clone(), record) {
            return Err(format!("duplicate site id '{}'", previous.id));
        }
    }

    Ok(SiteRegistry { sites })
}
