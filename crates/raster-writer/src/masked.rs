//! Masked 2-D grids and conversion to sentinel-filled rasters.

use ndarray::Array2;
use radar_common::{RadarError, RadarResult};

/// One gridded layer with a validity mask (`true` = masked / no data).
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedGrid<T> {
    values: Array2<T>,
    mask: Array2<bool>,
}

impl<T: Copy> MaskedGrid<T> {
    /// Pair values with a mask of the same shape.
    pub fn new(values: Array2<T>, mask: Array2<bool>) -> RadarResult<Self> {
        if values.dim() != mask.dim() {
            return Err(RadarError::InvalidGridSpec(format!(
                "mask shape {:?} does not match data shape {:?}",
                mask.dim(),
                values.dim()
            )));
        }
        Ok(Self { values, mask })
    }

    /// Grid with every cell valid.
    pub fn unmasked(values: Array2<T>) -> Self {
        let mask = Array2::from_elem(values.dim(), false);
        Self { values, mask }
    }

    /// Shape as (rows, cols).
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Array2<T> {
        &self.values
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Number of unmasked cells.
    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    /// Replace masked cells with `no_data`.
    pub fn filled(&self, no_data: T) -> Array2<T> {
        let mut out = self.values.clone();
        out.zip_mut_with(&self.mask, |v, masked| {
            if *masked {
                *v = no_data;
            }
        });
        out
    }

    /// Row-major samples with masked cells replaced by `no_data`.
    pub fn filled_row_major(&self, no_data: T) -> Vec<T> {
        self.filled(no_data).iter().copied().collect()
    }
}

impl MaskedGrid<f32> {
    /// Mask every NaN cell.
    pub fn from_nan(values: Array2<f32>) -> Self {
        let mask = values.mapv(f32::is_nan);
        Self { values, mask }
    }
}

impl MaskedGrid<f64> {
    /// Mask every NaN cell.
    pub fn from_nan(values: Array2<f64>) -> Self {
        let mask = values.mapv(f64::is_nan);
        Self { values, mask }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_filled_replaces_masked_cells() {
        let grid = MaskedGrid::new(
            array![[1.0f32, 2.0], [3.0, 4.0]],
            array![[false, true], [true, false]],
        )
        .unwrap();

        let filled = grid.filled(f32::NAN);
        assert_eq!(filled[[0, 0]], 1.0);
        assert!(filled[[0, 1]].is_nan());
        assert!(filled[[1, 0]].is_nan());
        assert_eq!(filled[[1, 1]], 4.0);
        assert_eq!(grid.valid_count(), 2);
    }

    #[test]
    fn test_row_major_order() {
        let grid = MaskedGrid::unmasked(array![[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(grid.filled_row_major(f64::NAN), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let result = MaskedGrid::new(Array2::<f32>::zeros((2, 2)), Array2::from_elem((2, 3), false));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_nan() {
        let grid = MaskedGrid::<f32>::from_nan(array![[f32::NAN, 1.0]]);
        assert_eq!(grid.mask(), &array![[true, false]]);
    }
}
