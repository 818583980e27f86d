//! GeoTIFF export for gridded radar fields.
//!
//! Takes one masked 2-D layer, a geographic transform and a set of
//! provenance tags, and writes a single-band, LZW-compressed, EPSG:4326
//! GeoTIFF with NaN as the no-data value.
//!
//! # Example
//!
//! ```ignore
//! use raster_writer::{GeoTiffWriter, MaskedGrid, RasterTags};
//!
//! let grid = MaskedGrid::from_nan(values);
//! GeoTiffWriter::new().write(&path, &grid, &transform, &tags)?;
//!
//! let band = raster_writer::GeoTiffReader::open(&path)?;
//! assert_eq!(band.tags.field, "reflectivity");
//! ```

pub mod geotiff;
pub mod masked;
pub mod reader;
pub mod tags;

pub use geotiff::{GeoTiffWriter, RasterSample, RasterWriteResult};
pub use masked::MaskedGrid;
pub use reader::{GeoTiffReader, RasterBand, RasterData};
pub use tags::RasterTags;
