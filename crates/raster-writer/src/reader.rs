//! Reads back rasters produced by [`GeoTiffWriter`](crate::GeoTiffWriter).

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use radar_common::{BoundingBox, GeoTransform, RadarError, RadarResult};
use tiff::decoder::{Decoder, DecodingResult};
use tracing::debug;

use crate::geotiff::{
    tag, GEOKEY_GEOGRAPHIC_TYPE, TAG_GDAL_METADATA, TAG_GDAL_NODATA, TAG_GEO_KEY_DIRECTORY,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT,
};
use crate::tags::RasterTags;

/// Decoded band samples.
#[derive(Debug, Clone)]
pub enum RasterData {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl RasterData {
    pub fn len(&self) -> usize {
        match self {
            RasterData::F32(v) => v.len(),
            RasterData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            RasterData::F32(_) => "float32",
            RasterData::F64(_) => "float64",
        }
    }

    /// Sample at a row-major index, widened to f64.
    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            RasterData::F32(v) => v.get(index).map(|x| *x as f64),
            RasterData::F64(v) => v.get(index).copied(),
        }
    }
}

/// A single-band raster with its georeferencing and provenance.
#[derive(Debug, Clone)]
pub struct RasterBand {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub epsg: Option<u16>,
    pub no_data: Option<f64>,
    pub tags: RasterTags,
    pub data: RasterData,
}

impl RasterBand {
    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds()
    }

    /// Sample at (row, col).
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data.get(row * self.width + col)
    }
}

pub struct GeoTiffReader;

impl GeoTiffReader {
    /// Open and fully decode a raster.
    pub fn open(path: &Path) -> RadarResult<RasterBand> {
        let file = File::open(path).map_err(|e| RadarError::raster_io(path, e))?;
        Self::decode(file).map_err(|reason| RadarError::raster_io(path, reason))
    }

    fn decode<R: Read + Seek>(reader: R) -> Result<RasterBand, String> {
        let mut decoder = Decoder::new(reader).map_err(|e| e.to_string())?;
        let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
        let (width, height) = (width as usize, height as usize);

        let scale = decoder
            .get_tag_f64_vec(tag(TAG_MODEL_PIXEL_SCALE))
            .map_err(|e| format!("missing ModelPixelScale: {e}"))?;
        let tiepoint = decoder
            .get_tag_f64_vec(tag(TAG_MODEL_TIEPOINT))
            .map_err(|e| format!("missing ModelTiepoint: {e}"))?;
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err("malformed georeferencing tags".to_string());
        }

        // Tiepoint format: [i, j, k, x, y, z]; pixel (i, j) maps to (x, y)
        let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
        let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
        let transform = GeoTransform {
            origin_x,
            pixel_width: scale[0],
            rotation_x: 0.0,
            origin_y,
            rotation_y: 0.0,
            pixel_height: -scale[1],
            width,
            height,
        };

        let epsg = decoder
            .get_tag_u16_vec(tag(TAG_GEO_KEY_DIRECTORY))
            .ok()
            .and_then(|keys| {
                keys.chunks(4)
                    .skip(1)
                    .find(|k| k.len() == 4 && k[0] == GEOKEY_GEOGRAPHIC_TYPE)
                    .map(|k| k[3])
            });

        let no_data = decoder
            .get_tag_ascii_string(tag(TAG_GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

        let metadata = decoder
            .get_tag_ascii_string(tag(TAG_GDAL_METADATA))
            .map_err(|e| format!("missing GDAL_METADATA: {e}"))?;
        let tags = RasterTags::from_gdal_metadata(metadata.trim_matches(char::from(0)))?;

        let data = match decoder.read_image().map_err(|e| e.to_string())? {
            DecodingResult::F32(v) => RasterData::F32(v),
            DecodingResult::F64(v) => RasterData::F64(v),
            _ => return Err("unsupported sample format".to_string()),
        };
        if data.len() != width * height {
            return Err(format!(
                "expected {} samples, decoded {}",
                width * height,
                data.len()
            ));
        }

        debug!(width, height, dtype = data.dtype(), "Decoded GeoTIFF");

        Ok(RasterBand {
            width,
            height,
            transform,
            epsg,
            no_data,
            tags,
            data,
        })
    }
}
