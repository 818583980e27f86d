//! Single-band GeoTIFF writer.
//!
//! Output layout:
//! - one band, sample type taken from the grid (`f32` or `f64`)
//! - LZW compression
//! - ModelPixelScale + ModelTiepoint georeferencing, north-up
//! - GeoKey directory declaring geographic WGS84 (EPSG:4326), pixel-is-area
//! - GDAL_NODATA = "nan" and GDAL_METADATA provenance items

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use radar_common::{create_partial_file, CrsCode, GeoTransform, RadarError, RadarResult};
use tiff::encoder::colortype::{ColorType, Gray32Float, Gray64Float};
use tiff::encoder::compression::Lzw;
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, info, instrument};

use crate::masked::MaskedGrid;
use crate::tags::RasterTags;

pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GDAL_METADATA: u16 = 42112;
pub const TAG_GDAL_NODATA: u16 = 42113;

/// GeoKey ids used in the key directory.
pub const GEOKEY_MODEL_TYPE: u16 = 1024;
pub const GEOKEY_RASTER_TYPE: u16 = 1025;
pub const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
pub const GEOKEY_ANGULAR_UNITS: u16 = 2054;

const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const ANGULAR_UNIT_DEGREE: u16 = 9102;

const SOFTWARE: &str = concat!("radar-fetch ", env!("CARGO_PKG_VERSION"));

/// Resolve a numeric tag id to the decoder/encoder's `Tag` value.
pub fn tag(id: u16) -> Tag {
    Tag::from_u16_exhaustive(id)
}

/// Sample types that can be written as a single float band.
pub trait RasterSample: Copy + Send + Sync + 'static {
    type Color: ColorType<Inner = Self>;
    /// No-data sentinel written into masked cells.
    const NO_DATA: Self;
    const DTYPE: &'static str;
}

impl RasterSample for f32 {
    type Color = Gray32Float;
    const NO_DATA: Self = f32::NAN;
    const DTYPE: &'static str = "float32";
}

impl RasterSample for f64 {
    type Color = Gray64Float;
    const NO_DATA: Self = f64::NAN;
    const DTYPE: &'static str = "float64";
}

/// GeoKey directory for a geographic CRS.
pub fn geo_key_directory(crs: CrsCode) -> Vec<u16> {
    vec![
        1, 1, 0, 4, // version, revision, minor revision, key count
        GEOKEY_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC,
        GEOKEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        GEOKEY_GEOGRAPHIC_TYPE, 0, 1, crs.epsg(),
        GEOKEY_ANGULAR_UNITS, 0, 1, ANGULAR_UNIT_DEGREE,
    ]
}

/// Result of a raster write.
#[derive(Debug, Clone)]
pub struct RasterWriteResult {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub dtype: &'static str,
    /// Cells that were masked and written as no-data.
    pub nodata_cells: usize,
}

/// Writes tagged single-band GeoTIFFs.
#[derive(Debug, Clone)]
pub struct GeoTiffWriter {
    crs: CrsCode,
}

impl Default for GeoTiffWriter {
    fn default() -> Self {
        Self {
            crs: CrsCode::Epsg4326,
        }
    }
}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `grid` to `path`, replacing any existing file.
    ///
    /// The grid is unmasked (masked cells become NaN) before encoding. The
    /// file is written under a temporary name in the same directory and
    /// renamed into place once complete.
    #[instrument(skip(self, grid, transform, tags), fields(path = %path.display(), field = %tags.field))]
    pub fn write<T>(
        &self,
        path: &Path,
        grid: &MaskedGrid<T>,
        transform: &GeoTransform,
        tags: &RasterTags,
    ) -> RadarResult<RasterWriteResult>
    where
        T: RasterSample,
        [T]: TiffValue,
    {
        let (height, width) = grid.dim();
        if width != transform.width || height != transform.height {
            return Err(RadarError::raster_io(
                path,
                format!(
                    "grid is {}x{} but transform describes {}x{}",
                    width, height, transform.width, transform.height
                ),
            ));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RadarError::raster_io(path, e))?;
        }

        let samples = grid.filled_row_major(T::NO_DATA);
        let nodata_cells = grid.dim().0 * grid.dim().1 - grid.valid_count();

        let temp = create_partial_file(path).map_err(|e| RadarError::raster_io(path, e))?;
        let (file, temp_path) = temp.into_parts();
        // Dropping `temp_path` on an early return deletes the partial file.
        self.encode(file, &samples, width, height, transform, tags)
            .map_err(|e| RadarError::raster_io(path, e))?;
        debug!(path = %temp_path.display(), "Encoded GeoTIFF");
        temp_path
            .persist(path)
            .map_err(|e| RadarError::raster_io(path, e.error))?;

        info!(
            width = width,
            height = height,
            dtype = T::DTYPE,
            nodata_cells = nodata_cells,
            "Wrote GeoTIFF"
        );

        Ok(RasterWriteResult {
            path: path.to_path_buf(),
            width,
            height,
            dtype: T::DTYPE,
            nodata_cells,
        })
    }

    fn encode<T>(
        &self,
        file: File,
        samples: &[T],
        width: usize,
        height: usize,
        transform: &GeoTransform,
        tags: &RasterTags,
    ) -> Result<(), String>
    where
        T: RasterSample,
        [T]: TiffValue,
    {
        let mut writer = BufWriter::new(file);

        {
            let mut encoder = TiffEncoder::new(&mut writer).map_err(|e| e.to_string())?;
            let mut image = encoder
                .new_image_with_compression::<T::Color, Lzw>(width as u32, height as u32, Lzw::default())
                .map_err(|e| e.to_string())?;

            let pixel_scale = [transform.pixel_width, -transform.pixel_height, 0.0];
            let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
            let geokeys = geo_key_directory(self.crs);
            let metadata = tags.to_gdal_metadata();
            let timestamp = tags.processed_at.format("%Y:%m:%d %H:%M:%S").to_string();

            let dir = image.encoder();
            dir.write_tag(tag(TAG_MODEL_PIXEL_SCALE), &pixel_scale[..])
                .map_err(|e| e.to_string())?;
            dir.write_tag(tag(TAG_MODEL_TIEPOINT), &tiepoint[..])
                .map_err(|e| e.to_string())?;
            dir.write_tag(tag(TAG_GEO_KEY_DIRECTORY), &geokeys[..])
                .map_err(|e| e.to_string())?;
            dir.write_tag(tag(TAG_GDAL_NODATA), "nan")
                .map_err(|e| e.to_string())?;
            dir.write_tag(tag(TAG_GDAL_METADATA), metadata.as_str())
                .map_err(|e| e.to_string())?;
            dir.write_tag(Tag::ImageDescription, tags.field.as_str())
                .map_err(|e| e.to_string())?;
            dir.write_tag(Tag::Software, SOFTWARE)
                .map_err(|e| e.to_string())?;
            dir.write_tag(Tag::DateTime, timestamp.as_str())
                .map_err(|e| e.to_string())?;

            image.write_data(samples).map_err(|e| e.to_string())?;
        }

        writer.flush().map_err(|e| e.to_string())?;
        let file = writer.into_inner().map_err(|e| e.to_string())?;
        file.sync_all().map_err(|e| e.to_string())?;
        Ok(())
    }
}
