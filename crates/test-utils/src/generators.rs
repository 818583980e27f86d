//! Synthetic sweep data with predictable values.
//!
//! Arrays are laid out rays x gates, matching a decoded PPI sweep.

use ndarray::Array2;

/// Evenly spaced azimuths covering a full rotation, starting at north.
///
/// # Example
///
/// ```
/// use test_utils::uniform_azimuths;
///
/// let az = uniform_azimuths(4);
/// assert_eq!(az, vec![0.0, 90.0, 180.0, 270.0]);
/// ```
pub fn uniform_azimuths(rays: usize) -> Vec<f64> {
    let step = 360.0 / rays as f64;
    (0..rays).map(|i| i as f64 * step).collect()
}

/// Gate center ranges in meters.
pub fn gate_ranges(gates: usize, first_m: f64, spacing_m: f64) -> Vec<f64> {
    (0..gates).map(|i| first_m + i as f64 * spacing_m).collect()
}

/// Field with every gate set to `value`.
pub fn constant_field(rays: usize, gates: usize, value: f32) -> Array2<f32> {
    Array2::from_elem((rays, gates), value)
}

/// Field with every gate missing.
pub fn missing_field(rays: usize, gates: usize) -> Array2<f32> {
    Array2::from_elem((rays, gates), f32::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_ranges() {
        assert_eq!(gate_ranges(3, 2125.0, 250.0), vec![2125.0, 2375.0, 2625.0]);
    }

    #[test]
    fn test_missing_field_all_nan() {
        assert!(missing_field(2, 2).iter().all(|v| v.is_nan()));
    }
}
