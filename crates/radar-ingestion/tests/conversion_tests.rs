//! Conversion of local volumes to GeoTIFF, and the combined fetch + convert.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use radar_common::{compute_transform, GridSpec, RadarError, RadarResult};
use radar_ingestion::{
    Pipeline, PipelineStage, RadarVolume, SiteRegistry, SmoothingParams, StageLog, Sweep,
    VolumeReader,
};
use raster_writer::GeoTiffReader;
use test_utils::{
    constant_field, dir_entries, gate_ranges, ktlx, temp_test_dir, uniform_azimuths, MockArchive,
    SAMPLE_CATALOG_JSON,
};

/// Returns the same synthetic KTLX volume for any existing path.
struct SyntheticReader;

impl VolumeReader for SyntheticReader {
    fn read(&self, path: &Path) -> RadarResult<RadarVolume> {
        if !path.exists() {
            return Err(RadarError::VolumeRead {
                path: path.to_path_buf(),
                reason: "missing".to_string(),
            });
        }
        let mut fields = HashMap::new();
        fields.insert("reflectivity".to_string(), constant_field(360, 240, 30.0));
        Ok(RadarVolume {
            latitude: ktlx::LATITUDE,
            longitude: ktlx::LONGITUDE,
            altitude_m: ktlx::ALTITUDE_M,
            sweeps: vec![Sweep {
                elevation_deg: 0.5,
                azimuths_deg: uniform_azimuths(360),
                ranges_m: gate_ranges(240, 125.0, 250.0),
                fields,
            }],
        })
    }
}

fn pipeline(archive_root: Option<String>) -> Pipeline {
    let registry = SiteRegistry::from_json(SAMPLE_CATALOG_JSON).unwrap();
    let mut builder = Pipeline::builder()
        .registry(Arc::new(registry))
        .volume_reader(Arc::new(SyntheticReader));
    if let Some(root) = archive_root {
        builder = builder.archive_config(radar_ingestion::ArchiveConfig {
            archive_root: root,
            ..Default::default()
        });
    }
    builder.build().unwrap()
}

fn write_volume(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"AR2V0006.").unwrap();
    path
}

// ============================================================================
// convert_to_raster
// ============================================================================

#[test]
fn test_convert_writes_tagged_raster() {
    let dir = temp_test_dir();
    let volume = write_volume(dir.path(), "KTLX20240520_221402_V06.ar2v");
    let output = dir.path().join("rasters").join("ktlx.tif");
    let grid = GridSpec::new(1000.0, 40, 40);

    let pipeline = pipeline(None);
    let mut log = StageLog::new();
    let written = pipeline
        .convert_to_raster_logged(
            &volume,
            &output,
            "reflectivity",
            0,
            grid,
            SmoothingParams::default(),
            &mut log,
        )
        .unwrap();

    assert_eq!(written, output);
    assert_eq!(
        log.history(),
        &[
            PipelineStage::Validating,
            PipelineStage::Gridding,
            PipelineStage::Transforming,
            PipelineStage::Writing,
            PipelineStage::Done,
        ]
    );

    let band = GeoTiffReader::open(&output).unwrap();
    assert_eq!((band.width, band.height), (40, 40));
    assert_eq!(band.tags.field, "reflectivity");
    assert_eq!(band.tags.sweep, 0);
    assert_eq!(band.tags.resolution_m, 1000.0);
    assert_eq!(band.tags.source_filename, "KTLX20240520_221402_V06.ar2v");
    assert_eq!(band.tags.radar_latitude, ktlx::LATITUDE);

    let expected = compute_transform(ktlx::LATITUDE, ktlx::LONGITUDE, 20_000.0, (40, 40))
        .unwrap()
        .bounds();
    assert!(band.bounds().approx_eq(&expected, 1e-9));

    let center = band.value(20, 20).unwrap();
    assert!((center - 30.0).abs() < 1e-3, "center = {center}");
}

#[test]
fn test_convert_rejects_invalid_grid() {
    let dir = temp_test_dir();
    let volume = write_volume(dir.path(), "v.ar2v");

    for grid in [GridSpec::new(0.0, 10, 10), GridSpec::new(1000.0, 0, 10)] {
        let err = pipeline(None)
            .convert_to_raster(
                &volume,
                &dir.path().join("out.tif"),
                "reflectivity",
                0,
                grid,
                SmoothingParams::default(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidGridSpecError");
    }
    assert_eq!(dir_entries(dir.path()), vec!["v.ar2v"]);
}

#[test]
fn test_convert_unknown_field() {
    let dir = temp_test_dir();
    let volume = write_volume(dir.path(), "v.ar2v");

    let err = pipeline(None)
        .convert_to_raster(
            &volume,
            &dir.path().join("out.tif"),
            "differential_phase",
            0,
            GridSpec::new(1000.0, 10, 10),
            SmoothingParams::default(),
        )
        .unwrap_err();

    assert!(matches!(err, RadarError::EmptyGrid(_)));
    assert!(!dir.path().join("out.tif").exists());
}

#[test]
fn test_convert_missing_volume() {
    let dir = temp_test_dir();
    let err = pipeline(None)
        .convert_to_raster(
            &dir.path().join("absent.ar2v"),
            &dir.path().join("out.tif"),
            "reflectivity",
            0,
            GridSpec::new(1000.0, 10, 10),
            SmoothingParams::default(),
        )
        .unwrap_err();
    assert!(matches!(err, RadarError::MissingInput(_)));
}

// ============================================================================
// fetch_and_convert
// ============================================================================

#[tokio::test]
async fn test_fetch_and_convert() {
    let archive = MockArchive::builder()
        .station_listing("KTLX", &["file1.ar2v", "file2.ar2v"])
        .station_file("KTLX", "file2.ar2v", "data")
        .start()
        .await;
    let dir = temp_test_dir();

    let output = pipeline(Some(archive.root_url()))
        .fetch_and_convert("KTLX", dir.path(), "reflectivity", 0, GridSpec::new(2000.0, 20, 20))
        .await
        .unwrap();

    assert_eq!(output.volume_path, dir.path().join("file2.ar2v"));
    assert_eq!(
        output.raster_path,
        dir.path().join("file2_reflectivity_sweep0.tif")
    );
    let band = GeoTiffReader::open(&output.raster_path).unwrap();
    assert_eq!(band.tags.source_filename, "file2.ar2v");
    assert_eq!(band.tags.resolution_m, 2000.0);
}

#[tokio::test]
async fn test_fetch_and_convert_stage_sequence() {
    let archive = MockArchive::builder()
        .station_listing("KTLX", &["file2.ar2v"])
        .station_file("KTLX", "file2.ar2v", "data")
        .start()
        .await;
    let dir = temp_test_dir();
    let mut log = StageLog::new();

    pipeline(Some(archive.root_url()))
        .fetch_and_convert_logged(
            "KTLX",
            dir.path(),
            "reflectivity",
            0,
            GridSpec::new(2000.0, 10, 10),
            &mut log,
        )
        .await
        .unwrap();

    assert_eq!(
        log.history(),
        &[
            PipelineStage::Validating,
            PipelineStage::Listing,
            PipelineStage::Downloading,
            PipelineStage::Downloaded,
            PipelineStage::Gridding,
            PipelineStage::Transforming,
            PipelineStage::Writing,
            PipelineStage::Done,
        ]
    );
}

#[tokio::test]
async fn test_fetch_and_convert_rejects_grid_before_any_request() {
    let archive = MockArchive::builder()
        .station_listing("KTLX", &["file2.ar2v"])
        .station_file("KTLX", "file2.ar2v", "data")
        .start()
        .await;
    let dir = temp_test_dir();
    let mut log = StageLog::new();

    let err = pipeline(Some(archive.root_url()))
        .fetch_and_convert_logged(
            "KTLX",
            dir.path(),
            "reflectivity",
            0,
            GridSpec::new(-5.0, 10, 10),
            &mut log,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RadarError::InvalidGridSpec(_)), "{err:?}");
    assert_eq!(archive.request_count(), 0);
    assert!(dir_entries(dir.path()).is_empty());
    assert_eq!(log.history(), &[PipelineStage::Validating, PipelineStage::Failed]);
}

#[tokio::test]
async fn test_conversion_failure_keeps_volume() {
    let archive = MockArchive::builder()
        .station_listing("KTLX", &["file2.ar2v"])
        .station_file("KTLX", "file2.ar2v", "data")
        .start()
        .await;
    let dir = temp_test_dir();

    // No decoder configured, so reading the volume fails.
    let registry = SiteRegistry::from_json(SAMPLE_CATALOG_JSON).unwrap();
    let pipeline = Pipeline::builder()
        .registry(Arc::new(registry))
        .archive_config(radar_ingestion::ArchiveConfig {
            archive_root: archive.root_url(),
            ..Default::default()
        })
        .build()
        .unwrap();

    let mut log = StageLog::new();
    let err = pipeline
        .fetch_and_convert_logged(
            "KTLX",
            dir.path(),
            "reflectivity",
            0,
            GridSpec::new(1000.0, 10, 10),
            &mut log,
        )
        .await
        .unwrap_err();

    match &err {
        RadarError::Conversion { volume_path, source } => {
            assert_eq!(volume_path, &dir.path().join("file2.ar2v"));
            assert!(matches!(**source, RadarError::VolumeRead { .. }));
        }
        other => panic!("expected conversion error, got {other:?}"),
    }
    assert_eq!(err.kind(), "VolumeReadError");
    assert_eq!(dir_entries(dir.path()), vec!["file2.ar2v"]);
    assert_eq!(
        log.history(),
        &[
            PipelineStage::Validating,
            PipelineStage::Listing,
            PipelineStage::Downloading,
            PipelineStage::Downloaded,
            PipelineStage::Gridding,
            PipelineStage::Failed,
        ]
    );
}

#[tokio::test]
async fn test_fetch_failure_is_not_wrapped() {
    let archive = MockArchive::builder().station_status("KTLX", 503).start().await;
    let dir = temp_test_dir();

    let err = pipeline(Some(archive.root_url()))
        .fetch_and_convert("KTLX", dir.path(), "reflectivity", 0, GridSpec::new(1000.0, 10, 10))
        .await
        .unwrap_err();
    assert!(matches!(err, RadarError::Http { status: 503, .. }));
}
