//! Affine pixel-to-geographic transforms for radar-centered grids.
//!
//! Angular extents come from a spherical Earth with the WGS84 equatorial
//! radius. The east-west step is stretched by `1 / cos(latitude)` to account
//! for meridian convergence. At radar ranges of a few hundred kilometers this
//! is well inside a pixel of the ellipsoidal answer, and output rasters depend
//! on these exact numbers, so do not swap in an ellipsoid model.

use serde::{Deserialize, Serialize};

use crate::bbox::BoundingBox;
use crate::error::{RadarError, RadarResult};

/// Earth radius used for meter-to-degree conversion (WGS84 semi-major axis).
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// GDAL-ordered affine transform.
///
/// `lon = origin_x + col * pixel_width + row * rotation_x`
/// `lat = origin_y + col * rotation_y + row * pixel_height`
///
/// `pixel_height` is negative for north-up rasters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub origin_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
    /// Raster width in pixels
    pub width: usize,
    /// Raster height in pixels
    pub height: usize,
}

impl GeoTransform {
    /// North-up transform mapping a `width x height` raster onto `bounds`.
    pub fn from_bounds(bounds: &BoundingBox, width: usize, height: usize) -> Self {
        Self {
            origin_x: bounds.min_x,
            pixel_width: bounds.width() / width as f64,
            rotation_x: 0.0,
            origin_y: bounds.max_y,
            rotation_y: 0.0,
            pixel_height: -bounds.height() / height as f64,
            width,
            height,
        }
    }

    /// Coefficients in GDAL order.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.rotation_x,
            self.origin_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Geographic coordinate (lon, lat) of a pixel corner.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.rotation_x,
            self.origin_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Bounding rectangle covered by the full raster.
    pub fn bounds(&self) -> BoundingBox {
        let (x0, y0) = self.pixel_to_geo(0.0, 0.0);
        let (x1, y1) = self.pixel_to_geo(self.width as f64, self.height as f64);
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Angular half extents (degrees of latitude, degrees of longitude) for a
/// physical half-width centered at `latitude`.
pub fn angular_half_extent(latitude: f64, half_width_m: f64) -> RadarResult<(f64, f64)> {
    if !latitude.is_finite() || latitude.abs() >= 90.0 {
        return Err(RadarError::InvalidGridSpec(format!(
            "radar latitude must be within (-90, 90), got {latitude}"
        )));
    }
    if !half_width_m.is_finite() || half_width_m <= 0.0 {
        return Err(RadarError::InvalidGridSpec(format!(
            "envelope half-width must be positive, got {half_width_m}"
        )));
    }
    let dlat = (half_width_m / EARTH_RADIUS_M).to_degrees();
    let dlon = (half_width_m / (EARTH_RADIUS_M * latitude.to_radians().cos())).to_degrees();
    Ok((dlat, dlon))
}

/// Transform for a grid of `shape = (rows, cols)` centered on the radar and
/// extending `half_width_m` meters to each edge.
pub fn compute_transform(
    radar_latitude: f64,
    radar_longitude: f64,
    half_width_m: f64,
    shape: (usize, usize),
) -> RadarResult<GeoTransform> {
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 {
        return Err(RadarError::InvalidGridSpec(format!(
            "grid shape must be positive, got ({rows}, {cols})"
        )));
    }
    let (dlat, dlon) = angular_half_extent(radar_latitude, half_width_m)?;
    let bounds = BoundingBox::centered(radar_longitude, radar_latitude, dlon, dlat);
    Ok(GeoTransform::from_bounds(&bounds, cols, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equator_extents_are_symmetric() {
        let (dlat, dlon) = angular_half_extent(0.0, 100_000.0).unwrap();
        assert!((dlat - dlon).abs() < 1e-12);
        assert!((dlat - 0.898315).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_correction_at_35n() {
        let t = compute_transform(35.0, -97.0, 200_000.0, (400, 400)).unwrap();
        let b = t.bounds();
        // 200 km over R = 6378137 m
        let dlat = 1.796630568;
        let dlon = dlat / 35f64.to_radians().cos();
        assert!((b.max_y - (35.0 + dlat)).abs() < 1e-6);
        assert!((b.min_y - (35.0 - dlat)).abs() < 1e-6);
        assert!((b.min_x - (-97.0 - dlon)).abs() < 1e-6);
        assert!((b.max_x - (-97.0 + dlon)).abs() < 1e-6);
        assert!(b.width() > b.height());
    }

    #[test]
    fn test_pixel_size_follows_shape() {
        let t = compute_transform(35.0, -97.0, 200_000.0, (400, 200)).unwrap();
        assert_eq!(t.width, 200);
        assert_eq!(t.height, 400);
        assert!(t.pixel_height < 0.0);
        assert!((t.pixel_width * 200.0 - t.bounds().width()).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_polar_latitude() {
        assert!(compute_transform(90.0, 0.0, 1000.0, (10, 10)).is_err());
        assert!(compute_transform(-91.0, 0.0, 1000.0, (10, 10)).is_err());
    }

    #[test]
    fn test_gdal_order() {
        let t = GeoTransform::from_bounds(&BoundingBox::new(-100.0, 30.0, -90.0, 40.0), 10, 20);
        assert_eq!(t.to_gdal(), [-100.0, 1.0, 0.0, 40.0, 0.0, -0.5]);
        assert_eq!(t.pixel_to_geo(10.0, 20.0), (-90.0, 30.0));
    }
}
