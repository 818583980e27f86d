//! Cartesian grid specifications for radar gridding.

use serde::{Deserialize, Serialize};

use crate::error::{RadarError, RadarResult};

/// Requested Cartesian grid: square cells of `resolution_m` meters,
/// `rows x cols` cells, centered on the radar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Cell size in meters
    pub resolution_m: f64,
    /// Number of rows (north-south)
    pub rows: usize,
    /// Number of columns (east-west)
    pub cols: usize,
}

impl GridSpec {
    /// Create a grid spec without validating it.
    pub fn new(resolution_m: f64, rows: usize, cols: usize) -> Self {
        Self {
            resolution_m,
            rows,
            cols,
        }
    }

    /// Build from a resolution and a shape slice, which must hold exactly two
    /// dimensions.
    pub fn from_parts(resolution_m: f64, shape: &[usize]) -> RadarResult<Self> {
        match shape {
            [rows, cols] => {
                let spec = Self::new(resolution_m, *rows, *cols);
                spec.validate()?;
                Ok(spec)
            }
            _ => Err(RadarError::InvalidGridSpec(format!(
                "shape must have exactly two dimensions, got {}",
                shape.len()
            ))),
        }
    }

    /// Check that resolution and both dimensions are strictly positive.
    pub fn validate(&self) -> RadarResult<()> {
        if !self.resolution_m.is_finite() || self.resolution_m <= 0.0 {
            return Err(RadarError::InvalidGridSpec(format!(
                "resolution must be a positive number of meters, got {}",
                self.resolution_m
            )));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(RadarError::InvalidGridSpec(format!(
                "shape must be two positive integers, got ({}, {})",
                self.rows, self.cols
            )));
        }
        Ok(())
    }

    /// Grid shape as (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Check if grid is empty.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Square envelope covered by this grid.
    ///
    /// The half-width is `resolution * max(rows, cols) / 2`, so a larger
    /// shape or a coarser resolution both extend the covered radius.
    pub fn plan_envelope(&self) -> Envelope {
        let longest = self.rows.max(self.cols) as f64;
        Envelope {
            half_width_m: self.resolution_m * longest / 2.0,
        }
    }

    /// Cell center offsets from the grid center, in meters.
    ///
    /// Row 0 is the northern edge, column 0 the western edge.
    pub fn cell_center_m(&self, row: usize, col: usize) -> (f64, f64) {
        let half = self.plan_envelope().half_width_m;
        let dx = 2.0 * half / self.cols as f64;
        let dy = 2.0 * half / self.rows as f64;
        let x = -half + (col as f64 + 0.5) * dx;
        let y = half - (row as f64 + 0.5) * dy;
        (x, y)
    }
}

/// Physical coverage of a grid around the radar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Distance from the radar to each edge of the square, in meters
    pub half_width_m: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_envelope() {
        let grid = GridSpec::new(1000.0, 400, 400);
        assert_eq!(grid.plan_envelope().half_width_m, 200_000.0);
    }

    #[test]
    fn test_plan_envelope_uses_longest_side() {
        let grid = GridSpec::new(500.0, 100, 300);
        assert_eq!(grid.plan_envelope().half_width_m, 75_000.0);
    }

    #[test]
    fn test_validate_rejects_bad_resolution() {
        for res in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = GridSpec::new(res, 10, 10).validate().unwrap_err();
            assert!(matches!(err, RadarError::InvalidGridSpec(_)), "{res}");
        }
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        assert!(GridSpec::new(1000.0, 0, 10).validate().is_err());
        assert!(GridSpec::new(1000.0, 10, 0).validate().is_err());
        assert!(GridSpec::new(1000.0, 1, 1).validate().is_ok());
    }

    #[test]
    fn test_from_parts_requires_two_dimensions() {
        assert!(GridSpec::from_parts(1000.0, &[400]).is_err());
        assert!(GridSpec::from_parts(1000.0, &[1, 400, 400]).is_err());
        let grid = GridSpec::from_parts(1000.0, &[400, 200]).unwrap();
        assert_eq!(grid.shape(), (400, 200));
        assert_eq!(grid.len(), 80_000);
    }

    #[test]
    fn test_cell_center_orientation() {
        let grid = GridSpec::new(1000.0, 4, 4);
        let (x, y) = grid.cell_center_m(0, 0);
        assert_eq!((x, y), (-1500.0, 1500.0));
        let (x, y) = grid.cell_center_m(3, 3);
        assert_eq!((x, y), (1500.0, -1500.0));
    }
}
