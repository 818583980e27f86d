//! Coordinate Reference System codes used by raster output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known CRS codes the exporter can tag rasters with.
///
/// Output is always geographic WGS84 today; the enum exists so the GeoKey
/// directory is derived from one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrsCode {
    /// WGS84 Geographic (lat/lon in degrees)
    Epsg4326,
}

impl CrsCode {
    /// Numeric EPSG code.
    pub fn epsg(&self) -> u16 {
        match self {
            CrsCode::Epsg4326 => 4326,
        }
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}
