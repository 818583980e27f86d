//! Gate-to-grid interpolation.
//!
//! Decoding raw Level-II volumes is delegated to a [`VolumeReader`]; the
//! pipeline only needs the decoded sweeps. [`WeightedGateGridder`] maps the
//! gates of one or more sweeps onto a radar-centered Cartesian grid.
//!
//! Gate positions use the 4/3 effective Earth radius beam model. Each grid
//! cell gathers the valid gates within a radius of influence that grows with
//! distance from the radar and averages them with the configured weighting.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array2, Array3};
use radar_common::{GridSpec, RadarError, RadarResult};
use raster_writer::MaskedGrid;
use rayon::prelude::*;
use tracing::debug;

/// Mean Earth radius used by the beam propagation model.
const EARTH_MEAN_RADIUS_M: f64 = 6_371_000.0;

/// One elevation sweep, rays x gates.
#[derive(Debug, Clone)]
pub struct Sweep {
    pub elevation_deg: f64,
    /// Azimuth of each ray, degrees clockwise from north
    pub azimuths_deg: Vec<f64>,
    /// Range of each gate center, meters
    pub ranges_m: Vec<f64>,
    /// Moment name to values; NaN marks a missing gate
    pub fields: HashMap<String, Array2<f32>>,
}

impl Sweep {
    pub fn field(&self, name: &str) -> Option<&Array2<f32>> {
        self.fields.get(name)
    }

    /// Every field must be `rays x gates`.
    pub fn check_shapes(&self) -> Result<(), String> {
        let expected = (self.azimuths_deg.len(), self.ranges_m.len());
        for (name, values) in &self.fields {
            if values.dim() != expected {
                return Err(format!(
                    "field '{name}' has shape {:?}, expected {:?}",
                    values.dim(),
                    expected
                ));
            }
        }
        Ok(())
    }
}

/// A decoded volume scan.
#[derive(Debug, Clone)]
pub struct RadarVolume {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub sweeps: Vec<Sweep>,
}

impl RadarVolume {
    pub fn sweep(&self, index: usize) -> Option<&Sweep> {
        self.sweeps.get(index)
    }
}

/// Decodes a raw volume file.
pub trait VolumeReader: Send + Sync {
    fn read(&self, path: &Path) -> RadarResult<RadarVolume>;
}

/// Used when no decoder has been configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredReader;

impl VolumeReader for UnconfiguredReader {
    fn read(&self, path: &Path) -> RadarResult<RadarVolume> {
        Err(RadarError::VolumeRead {
            path: path.to_path_buf(),
            reason: "no Level-II decoder configured".to_string(),
        })
    }
}

/// Signature of a custom weighting: `(distance², radius²) -> weight`.
pub type WeightFn = dyn Fn(f64, f64) -> f64 + Send + Sync;

/// Distance weighting applied to gates inside the radius of influence.
#[derive(Clone, Default)]
pub enum WeightingFunction {
    /// `exp(-d² / (2R²))`
    Barnes,
    /// `exp(-d² / (R²/4))`
    #[default]
    Barnes2,
    /// `(R² - d²) / (R² + d²)`
    Cressman,
    /// Value of the closest gate
    Nearest,
    Custom(Arc<WeightFn>),
}

impl WeightingFunction {
    pub fn weight(&self, dist2: f64, roi2: f64) -> f64 {
        match self {
            WeightingFunction::Barnes => (-dist2 / (2.0 * roi2)).exp(),
            WeightingFunction::Barnes2 => (-dist2 / (roi2 / 4.0)).exp(),
            WeightingFunction::Cressman => (roi2 - dist2) / (roi2 + dist2),
            WeightingFunction::Nearest => 1.0,
            WeightingFunction::Custom(f) => f(dist2, roi2),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WeightingFunction::Barnes => "barnes",
            WeightingFunction::Barnes2 => "barnes2",
            WeightingFunction::Cressman => "cressman",
            WeightingFunction::Nearest => "nearest",
            WeightingFunction::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for WeightingFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Radius-of-influence and weighting parameters.
#[derive(Debug, Clone)]
pub struct SmoothingParams {
    /// Scale of the height term
    pub h_factor: f64,
    /// Virtual beam width, degrees
    pub nb: f64,
    /// Virtual beam spacing multiplier
    pub bsp: f64,
    /// Floor for the radius of influence, meters
    pub min_radius: f64,
    pub weighting: WeightingFunction,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            h_factor: 1.0,
            nb: 1.5,
            bsp: 1.0,
            min_radius: 500.0,
            weighting: WeightingFunction::Barnes2,
        }
    }
}

impl SmoothingParams {
    /// Radius of influence for a point at height `z_m` and horizontal
    /// distance `horizontal_m` from the radar.
    pub fn radius_of_influence(&self, z_m: f64, horizontal_m: f64) -> f64 {
        let beam = horizontal_m * (self.nb * self.bsp).to_radians().tan();
        (self.h_factor * (z_m / 20.0) + beam).max(self.min_radius)
    }

    pub fn validate(&self) -> RadarResult<()> {
        let all_finite = [self.h_factor, self.nb, self.bsp, self.min_radius]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite || self.h_factor < 0.0 || self.nb < 0.0 || self.bsp < 0.0 {
            return Err(RadarError::InvalidGridSpec(format!(
                "smoothing parameters must be finite and non-negative: {self:?}"
            )));
        }
        if self.min_radius <= 0.0 {
            return Err(RadarError::InvalidGridSpec(format!(
                "min_radius must be positive, got {}",
                self.min_radius
            )));
        }
        Ok(())
    }
}

/// What to grid.
#[derive(Debug, Clone)]
pub struct GridRequest {
    pub field: String,
    /// Sweep indices; output layer `k` comes from `sweeps[k]`
    pub sweeps: Vec<usize>,
    pub grid: GridSpec,
    pub smoothing: SmoothingParams,
}

/// Gridder output: `[layer, row, col]`, mask `true` where no data.
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedField {
    pub data: Array3<f32>,
    pub mask: Array3<bool>,
}

impl GriddedField {
    pub fn layers(&self) -> usize {
        self.data.dim().0
    }

    pub fn layer(&self, index: usize) -> Option<MaskedGrid<f32>> {
        if index >= self.layers() {
            return None;
        }
        let values = self.data.index_axis(ndarray::Axis(0), index).to_owned();
        let mask = self.mask.index_axis(ndarray::Axis(0), index).to_owned();
        MaskedGrid::new(values, mask).ok()
    }

    pub fn first_layer(&self) -> Option<MaskedGrid<f32>> {
        self.layer(0)
    }
}

/// Maps a volume onto a Cartesian grid.
pub trait Gridder: Send + Sync {
    fn grid(&self, volume: &RadarVolume, request: &GridRequest) -> RadarResult<GriddedField>;
}

/// Height above the radar and ground distance of a gate.
pub fn beam_height_and_distance(range_m: f64, elevation_deg: f64) -> (f64, f64) {
    let re = EARTH_MEAN_RADIUS_M * 4.0 / 3.0;
    let el = elevation_deg.to_radians();
    let z = (range_m * range_m + re * re + 2.0 * range_m * re * el.sin()).sqrt() - re;
    let s = re * (range_m * el.cos() / (re + z)).asin();
    (z, s)
}

/// Reference gridder: cell-centric weighted average, rows in parallel.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedGateGridder;

/// Valid gates bucketed on a square lattice for neighborhood queries.
struct GateIndex {
    bucket_m: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
    x: Vec<f64>,
    y: Vec<f64>,
    value: Vec<f32>,
}

impl GateIndex {
    fn build(sweep: &Sweep, values: &Array2<f32>, bucket_m: f64) -> Self {
        let mut index = GateIndex {
            bucket_m,
            buckets: HashMap::new(),
            x: Vec::new(),
            y: Vec::new(),
            value: Vec::new(),
        };

        let ground: Vec<f64> = sweep
            .ranges_m
            .iter()
            .map(|r| beam_height_and_distance(*r, sweep.elevation_deg).1)
            .collect();

        for (ray, azimuth) in sweep.azimuths_deg.iter().enumerate() {
            let (sin_az, cos_az) = azimuth.to_radians().sin_cos();
            for (gate, s) in ground.iter().enumerate() {
                let v = values[[ray, gate]];
                if !v.is_finite() {
                    continue;
                }
                let (x, y) = (s * sin_az, s * cos_az);
                let id = index.value.len();
                index.x.push(x);
                index.y.push(y);
                index.value.push(v);
                let key = index.key(x, y);
                index.buckets.entry(key).or_default().push(id);
            }
        }

        index
    }

    fn key(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.bucket_m).floor() as i64,
            (y / self.bucket_m).floor() as i64,
        )
    }

    /// Interpolated value at (x, y), or `None` when no gate contributes.
    fn sample(&self, x: f64, y: f64, roi: f64, weighting: &WeightingFunction) -> Option<f32> {
        let roi2 = roi * roi;
        let (kx0, ky0) = self.key(x - roi, y - roi);
        let (kx1, ky1) = self.key(x + roi, y + roi);

        let mut sum = 0.0f64;
        let mut weights = 0.0f64;
        let mut nearest: Option<(f64, f32)> = None;

        for kx in kx0..=kx1 {
            for ky in ky0..=ky1 {
                let Some(ids) = self.buckets.get(&(kx, ky)) else {
                    continue;
                };
                for &id in ids {
                    let dx = self.x[id] - x;
                    let dy = self.y[id] - y;
                    let dist2 = dx * dx + dy * dy;
                    if dist2 > roi2 {
                        continue;
                    }
                    if let WeightingFunction::Nearest = weighting {
                        if nearest.map_or(true, |(d, _)| dist2 < d) {
                            nearest = Some((dist2, self.value[id]));
                        }
                        continue;
                    }
                    let w = weighting.weight(dist2, roi2);
                    sum += w * self.value[id] as f64;
                    weights += w;
                }
            }
        }

        match weighting {
            WeightingFunction::Nearest => nearest.map(|(_, v)| v),
            _ if weights > 0.0 => Some((sum / weights) as f32),
            _ => None,
        }
    }
}

impl WeightedGateGridder {
    fn grid_layer(
        &self,
        sweep: &Sweep,
        values: &Array2<f32>,
        grid: &GridSpec,
        smoothing: &SmoothingParams,
    ) -> Vec<Vec<Option<f32>>> {
        let bucket_m = (grid.resolution_m).max(smoothing.min_radius);
        let index = GateIndex::build(sweep, values, bucket_m);
        debug!(
            elevation = sweep.elevation_deg,
            gates = index.value.len(),
            "Indexed valid gates"
        );

        (0..grid.rows)
            .into_par_iter()
            .map(|row| {
                (0..grid.cols)
                    .map(|col| {
                        let (x, y) = grid.cell_center_m(row, col);
                        let horizontal = x.hypot(y);
                        let z = horizontal * sweep.elevation_deg.to_radians().tan();
                        let roi = smoothing.radius_of_influence(z, horizontal);
                        index.sample(x, y, roi, &smoothing.weighting)
                    })
                    .collect()
            })
            .collect()
    }
}

impl Gridder for WeightedGateGridder {
    fn grid(&self, volume: &RadarVolume, request: &GridRequest) -> RadarResult<GriddedField> {
        request.grid.validate()?;
        request.smoothing.validate()?;
        if request.sweeps.is_empty() {
            return Err(RadarError::EmptyGrid("no sweeps requested".to_string()));
        }

        let (rows, cols) = request.grid.shape();
        let layers = request.sweeps.len();
        let mut data = Array3::from_elem((layers, rows, cols), f32::NAN);
        let mut mask = Array3::from_elem((layers, rows, cols), true);

        for (layer, &sweep_index) in request.sweeps.iter().enumerate() {
            let sweep = volume.sweep(sweep_index).ok_or_else(|| {
                RadarError::EmptyGrid(format!(
                    "sweep {sweep_index} out of range, volume has {}",
                    volume.sweeps.len()
                ))
            })?;
            let values = sweep.field(&request.field).ok_or_else(|| {
                RadarError::EmptyGrid(format!(
                    "field '{}' not present in sweep {sweep_index}",
                    request.field
                ))
            })?;
            sweep.check_shapes().map_err(RadarError::EmptyGrid)?;

            let cells = self.grid_layer(sweep, values, &request.grid, &request.smoothing);
            for (row, line) in cells.into_iter().enumerate() {
                for (col, cell) in line.into_iter().enumerate() {
                    if let Some(v) = cell {
                        data[[layer, row, col]] = v;
                        mask[[layer, row, col]] = false;
                    }
                }
            }
        }

        Ok(GriddedField { data, mask })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, constant_field, gate_ranges, missing_field, uniform_azimuths};

    fn volume_with(field: &str, values: Array2<f32>) -> RadarVolume {
        let (rays, gates) = values.dim();
        let mut fields = HashMap::new();
        fields.insert(field.to_string(), values);
        RadarVolume {
            latitude: 35.333,
            longitude: -97.278,
            altitude_m: 370.0,
            sweeps: vec![Sweep {
                elevation_deg: 0.5,
                azimuths_deg: uniform_azimuths(rays),
                ranges_m: gate_ranges(gates, 125.0, 250.0),
                fields,
            }],
        }
    }

    fn request(field: &str, sweeps: Vec<usize>) -> GridRequest {
        GridRequest {
            field: field.to_string(),
            sweeps,
            grid: GridSpec::new(1000.0, 20, 20),
            smoothing: SmoothingParams::default(),
        }
    }

    // ========================================================================
    // Weighting and radius of influence
    // ========================================================================

    #[test]
    fn test_weights_at_center_and_edge() {
        let r2 = 100.0;
        assert_eq!(WeightingFunction::Barnes.weight(0.0, r2), 1.0);
        assert_eq!(WeightingFunction::Barnes2.weight(0.0, r2), 1.0);
        assert_eq!(WeightingFunction::Cressman.weight(0.0, r2), 1.0);
        assert_eq!(WeightingFunction::Cressman.weight(r2, r2), 0.0);
        assert_approx_eq!(WeightingFunction::Barnes.weight(r2, r2), (-0.5f64).exp(), 1e-12);
        assert_approx_eq!(WeightingFunction::Barnes2.weight(r2, r2), (-4.0f64).exp(), 1e-12);
    }

    #[test]
    fn test_custom_weighting() {
        let inverse = WeightingFunction::Custom(Arc::new(|d2: f64, _: f64| 1.0 / (1.0 + d2)));
        assert_eq!(inverse.weight(1.0, 4.0), 0.5);
        assert_eq!(format!("{inverse:?}"), "custom");
    }

    #[test]
    fn test_radius_of_influence_floor_and_growth() {
        let params = SmoothingParams::default();
        assert_eq!(params.radius_of_influence(0.0, 0.0), 500.0);
        let far = params.radius_of_influence(0.0, 100_000.0);
        assert_approx_eq!(far, 100_000.0 * 1.5f64.to_radians().tan(), 1e-6);
        assert!(far > params.radius_of_influence(0.0, 50_000.0));
    }

    #[test]
    fn test_smoothing_validation() {
        assert!(SmoothingParams::default().validate().is_ok());
        let bad = SmoothingParams {
            min_radius: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_beam_model_at_zero_elevation() {
        let (z, s) = beam_height_and_distance(100_000.0, 0.0);
        // Beam rises above the curved Earth, ground distance slightly shorter.
        assert!(z > 500.0 && z < 700.0, "z = {z}");
        assert!(s < 100_000.0 && s > 99_900.0, "s = {s}");
    }

    // ========================================================================
    // Gridding
    // ========================================================================

    #[test]
    fn test_constant_field_grids_to_constant() {
        let volume = volume_with("reflectivity", constant_field(360, 80, 42.0));
        let out = WeightedGateGridder
            .grid(&volume, &request("reflectivity", vec![0]))
            .unwrap();

        assert_eq!(out.data.dim(), (1, 20, 20));
        let layer = out.first_layer().unwrap();
        assert!(layer.valid_count() > 300);
        for (v, m) in layer.values().iter().zip(layer.mask().iter()) {
            if !m {
                assert_approx_eq!(*v, 42.0, 1e-3);
            }
        }
    }

    #[test]
    fn test_cells_beyond_range_are_masked() {
        // 20 gates of 250 m only reach 5 km; the grid spans 10 km each way.
        let volume = volume_with("reflectivity", constant_field(360, 20, 10.0));
        let out = WeightedGateGridder
            .grid(&volume, &request("reflectivity", vec![0]))
            .unwrap();
        let layer = out.first_layer().unwrap();
        assert!(layer.mask()[[0, 0]]);
        assert!(!layer.mask()[[10, 10]]);
    }

    #[test]
    fn test_missing_gates_masked() {
        let volume = volume_with("reflectivity", missing_field(360, 80));
        let out = WeightedGateGridder
            .grid(&volume, &request("reflectivity", vec![0]))
            .unwrap();
        assert_eq!(out.first_layer().unwrap().valid_count(), 0);
    }

    #[test]
    fn test_nearest_weighting() {
        let volume = volume_with("velocity", constant_field(360, 80, -7.5));
        let mut req = request("velocity", vec![0]);
        req.smoothing.weighting = WeightingFunction::Nearest;
        let layer = WeightedGateGridder.grid(&volume, &req).unwrap().first_layer().unwrap();
        assert_eq!(layer.values()[[10, 10]], -7.5);
    }

    #[test]
    fn test_unknown_field() {
        let volume = volume_with("reflectivity", constant_field(4, 4, 1.0));
        let err = WeightedGateGridder
            .grid(&volume, &request("spectrum_width", vec![0]))
            .unwrap_err();
        assert_eq!(err.kind(), "EmptyGridError");
    }

    #[test]
    fn test_sweep_out_of_range() {
        let volume = volume_with("reflectivity", constant_field(4, 4, 1.0));
        let err = WeightedGateGridder
            .grid(&volume, &request("reflectivity", vec![3]))
            .unwrap_err();
        assert!(matches!(err, RadarError::EmptyGrid(_)));
    }

    #[test]
    fn test_layer_per_requested_sweep() {
        let mut volume = volume_with("reflectivity", constant_field(90, 60, 5.0));
        let mut upper = volume.sweeps[0].clone();
        upper.elevation_deg = 1.5;
        upper
            .fields
            .insert("reflectivity".to_string(), constant_field(90, 60, 25.0));
        volume.sweeps.push(upper);

        let out = WeightedGateGridder
            .grid(&volume, &request("reflectivity", vec![1, 0]))
            .unwrap();
        assert_eq!(out.layers(), 2);
        assert_approx_eq!(out.layer(0).unwrap().values()[[10, 10]], 25.0, 1e-3);
        assert_approx_eq!(out.layer(1).unwrap().values()[[10, 10]], 5.0, 1e-3);
        assert!(out.layer(2).is_none());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut volume = volume_with("reflectivity", constant_field(4, 4, 1.0));
        volume.sweeps[0].ranges_m.pop();
        assert!(WeightedGateGridder
            .grid(&volume, &request("reflectivity", vec![0]))
            .is_err());
    }

    #[test]
    fn test_unconfigured_reader() {
        let err = UnconfiguredReader.read(Path::new("/tmp/x.ar2v")).unwrap_err();
        assert_eq!(err.kind(), "VolumeReadError");
    }
}
