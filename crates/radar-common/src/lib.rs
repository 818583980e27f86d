//! Common types shared by the radar fetch and raster export crates.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod grid;
pub mod partial;
pub mod station;
pub mod transform;

pub use bbox::BoundingBox;
pub use crs::CrsCode;
pub use error::{RadarError, RadarResult};
pub use grid::{Envelope, GridSpec};
pub use partial::{create_partial_file, is_partial_name};
pub use station::StationId;
pub use transform::{compute_transform, GeoTransform, EARTH_RADIUS_M};
