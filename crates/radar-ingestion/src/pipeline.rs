//! End-to-end orchestration: latest volume for a station, then raster.
//!
//! ```text
//! Idle -> Validating -> Listing -> Downloading -> Downloaded
//!      -> Gridding -> Transforming -> Writing -> Done
//! ```
//!
//! `convert_to_raster` alone runs `Idle -> Validating -> Gridding -> ...`.
//! Any stage may move to `Failed`. Each invocation records its own stages in
//! a [`StageLog`], so concurrent invocations on one [`Pipeline`] never see
//! each other's progress. Work for one invocation is strictly sequential;
//! the only suspension points are the HTTP requests.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use radar_common::{compute_transform, GridSpec, RadarError, RadarResult, StationId};
use raster_writer::{GeoTiffWriter, RasterTags};
use tracing::{info, instrument, warn};

use crate::config::ArchiveConfig;
use crate::download::AtomicDownloader;
use crate::gridding::{
    GridRequest, Gridder, SmoothingParams, UnconfiguredReader, VolumeReader, WeightedGateGridder,
};
use crate::listing::{file_url, ArchiveClient};
use crate::sites::SiteRegistry;

/// Where an invocation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Validating,
    Listing,
    Downloading,
    Downloaded,
    Gridding,
    Transforming,
    Writing,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Validating => "validating",
            PipelineStage::Listing => "listing",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Downloaded => "downloaded",
            PipelineStage::Gridding => "gridding",
            PipelineStage::Transforming => "transforming",
            PipelineStage::Writing => "writing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Stages entered by one pipeline invocation, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageLog {
    history: Vec<PipelineStage>,
}

impl StageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest stage; `Idle` before the invocation starts.
    pub fn current(&self) -> PipelineStage {
        self.history.last().copied().unwrap_or(PipelineStage::Idle)
    }

    pub fn history(&self) -> &[PipelineStage] {
        &self.history
    }

    fn enter(&mut self, stage: PipelineStage) {
        info!(from = %self.current(), to = %stage, "Pipeline stage");
        self.history.push(stage);
    }

    fn track<T>(&mut self, result: RadarResult<T>) -> RadarResult<T> {
        if let Err(e) = &result {
            warn!(kind = e.kind(), error = %e, "Pipeline failed");
            self.enter(PipelineStage::Failed);
        }
        result
    }
}

/// Files produced by [`Pipeline::fetch_and_convert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAndConvertOutput {
    pub volume_path: PathBuf,
    pub raster_path: PathBuf,
}

struct PipelineInner {
    registry: Arc<SiteRegistry>,
    archive: ArchiveClient,
    downloader: AtomicDownloader,
    reader: Arc<dyn VolumeReader>,
    gridder: Arc<dyn Gridder>,
    writer: GeoTiffWriter,
}

/// Fetches and converts radar volumes. Cheap to clone; clones share
/// collaborators but no per-invocation state.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

/// Configures a [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    registry: Option<Arc<SiteRegistry>>,
    config: Option<ArchiveConfig>,
    reader: Option<Arc<dyn VolumeReader>>,
    gridder: Option<Arc<dyn Gridder>>,
}

impl PipelineBuilder {
    /// Site catalog; defaults to the bundled one.
    pub fn registry(mut self, registry: Arc<SiteRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn archive_config(mut self, config: ArchiveConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Level-II decoder; without one, conversion fails with a read error.
    pub fn volume_reader(mut self, reader: Arc<dyn VolumeReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Defaults to [`WeightedGateGridder`].
    pub fn gridder(mut self, gridder: Arc<dyn Gridder>) -> Self {
        self.gridder = Some(gridder);
        self
    }

    pub fn build(self) -> RadarResult<Pipeline> {
        let registry = match self.registry {
            Some(registry) => registry,
            None => SiteRegistry::bundled()?,
        };
        let archive = ArchiveClient::new(self.config.unwrap_or_default())?;
        let downloader = AtomicDownloader::new(archive.http().clone());

        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                registry,
                archive,
                downloader,
                reader: self.reader.unwrap_or_else(|| Arc::new(UnconfiguredReader)),
                gridder: self.gridder.unwrap_or_else(|| Arc::new(WeightedGateGridder)),
                writer: GeoTiffWriter::new(),
            }),
        })
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.inner.registry
    }

    pub fn archive(&self) -> &ArchiveClient {
        &self.inner.archive
    }

    /// Download the most recent volume for `station` into `output_dir`.
    ///
    /// The destination is checked before the station, so a bad directory is
    /// reported even when the station is also unknown.
    pub async fn fetch_latest(&self, station: &str, output_dir: &Path) -> RadarResult<PathBuf> {
        self.fetch_latest_logged(station, output_dir, &mut StageLog::new())
            .await
    }

    /// [`fetch_latest`](Self::fetch_latest), recording stages into `log`.
    #[instrument(skip(self, output_dir, log), fields(station = %station, dest = %output_dir.display()))]
    pub async fn fetch_latest_logged(
        &self,
        station: &str,
        output_dir: &Path,
        log: &mut StageLog,
    ) -> RadarResult<PathBuf> {
        let result = self.fetch_latest_inner(station, output_dir, log).await;
        log.track(result)
    }

    async fn fetch_latest_inner(
        &self,
        station: &str,
        output_dir: &Path,
        log: &mut StageLog,
    ) -> RadarResult<PathBuf> {
        log.enter(PipelineStage::Validating);
        let station = self.validate_fetch(station, output_dir).await?;
        self.download_latest(&station, output_dir, log).await
    }

    async fn validate_fetch(&self, station: &str, output_dir: &Path) -> RadarResult<StationId> {
        match tokio::fs::metadata(output_dir).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return Err(RadarError::Destination(output_dir.to_path_buf())),
        }
        self.inner.registry.validate(station)
    }

    /// `Listing -> Downloading -> Downloaded`
    async fn download_latest(
        &self,
        station: &StationId,
        output_dir: &Path,
        log: &mut StageLog,
    ) -> RadarResult<PathBuf> {
        log.enter(PipelineStage::Listing);
        let directory = self.inner.archive.directory_url_now(station);
        let latest = self.inner.archive.latest_file(&directory).await?;

        log.enter(PipelineStage::Downloading);
        let report = self
            .inner
            .downloader
            .download(&file_url(&directory, &latest), output_dir)
            .await?;

        log.enter(PipelineStage::Downloaded);
        Ok(report.path)
    }

    /// Grid one field of one sweep of a local volume and write it as a
    /// GeoTIFF at `output_path`.
    pub fn convert_to_raster(
        &self,
        volume_path: &Path,
        output_path: &Path,
        field: &str,
        sweep: usize,
        grid: GridSpec,
        smoothing: SmoothingParams,
    ) -> RadarResult<PathBuf> {
        let mut log = StageLog::new();
        self.convert_to_raster_logged(volume_path, output_path, field, sweep, grid, smoothing, &mut log)
    }

    /// [`convert_to_raster`](Self::convert_to_raster), recording stages
    /// into `log`.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, volume_path, output_path, grid, smoothing, log), fields(volume = %volume_path.display(), field = %field))]
    pub fn convert_to_raster_logged(
        &self,
        volume_path: &Path,
        output_path: &Path,
        field: &str,
        sweep: usize,
        grid: GridSpec,
        smoothing: SmoothingParams,
        log: &mut StageLog,
    ) -> RadarResult<PathBuf> {
        log.enter(PipelineStage::Validating);
        let result = grid
            .validate()
            .and_then(|_| self.grid_and_write(volume_path, output_path, field, sweep, grid, smoothing, log));
        log.track(result)
    }

    /// `Gridding -> Transforming -> Writing -> Done`
    #[allow(clippy::too_many_arguments)]
    fn grid_and_write(
        &self,
        volume_path: &Path,
        output_path: &Path,
        field: &str,
        sweep: usize,
        grid: GridSpec,
        smoothing: SmoothingParams,
        log: &mut StageLog,
    ) -> RadarResult<PathBuf> {
        if !volume_path.is_file() {
            return Err(RadarError::MissingInput(volume_path.to_path_buf()));
        }

        log.enter(PipelineStage::Gridding);
        let volume = self.inner.reader.read(volume_path)?;
        let request = GridRequest {
            field: field.to_string(),
            sweeps: vec![sweep],
            grid,
            smoothing,
        };
        let gridded = self.inner.gridder.grid(&volume, &request)?;
        let layer = gridded.first_layer().ok_or_else(|| {
            RadarError::EmptyGrid(format!("gridder returned no layers for '{field}'"))
        })?;
        if layer.dim() != grid.shape() {
            return Err(RadarError::EmptyGrid(format!(
                "gridder returned shape {:?}, requested {:?}",
                layer.dim(),
                grid.shape()
            )));
        }
        if layer.valid_count() == 0 {
            warn!(field = %field, sweep, "Gridded layer has no valid cells");
        }

        log.enter(PipelineStage::Transforming);
        let envelope = grid.plan_envelope();
        let transform = compute_transform(
            volume.latitude,
            volume.longitude,
            envelope.half_width_m,
            grid.shape(),
        )?;

        log.enter(PipelineStage::Writing);
        let tags = RasterTags {
            field: field.to_string(),
            sweep,
            radar_latitude: volume.latitude,
            radar_longitude: volume.longitude,
            source_filename: volume_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            resolution_m: grid.resolution_m,
            processed_at: Utc::now(),
        };
        let written = self
            .inner
            .writer
            .write(output_path, &layer, &transform, &tags)?;

        log.enter(PipelineStage::Done);
        Ok(written.path)
    }

    /// Fetch the latest volume and convert it with default smoothing.
    ///
    /// The raster is written to
    /// `<output_dir>/<volume stem>_<field>_sweep<N>.tif`. If conversion
    /// fails the downloaded volume is kept and its path is carried in
    /// [`RadarError::Conversion`].
    pub async fn fetch_and_convert(
        &self,
        station: &str,
        output_dir: &Path,
        field: &str,
        sweep: usize,
        grid: GridSpec,
    ) -> RadarResult<FetchAndConvertOutput> {
        self.fetch_and_convert_logged(station, output_dir, field, sweep, grid, &mut StageLog::new())
            .await
    }

    /// [`fetch_and_convert`](Self::fetch_and_convert), recording stages
    /// into `log`. Conversion continues from `Downloaded` straight into
    /// `Gridding`; the grid is validated up front, before any request.
    #[instrument(skip(self, output_dir, grid, log), fields(station = %station, dest = %output_dir.display(), field = %field))]
    pub async fn fetch_and_convert_logged(
        &self,
        station: &str,
        output_dir: &Path,
        field: &str,
        sweep: usize,
        grid: GridSpec,
        log: &mut StageLog,
    ) -> RadarResult<FetchAndConvertOutput> {
        let result = self
            .fetch_and_convert_inner(station, output_dir, field, sweep, grid, log)
            .await;
        log.track(result)
    }

    async fn fetch_and_convert_inner(
        &self,
        station: &str,
        output_dir: &Path,
        field: &str,
        sweep: usize,
        grid: GridSpec,
        log: &mut StageLog,
    ) -> RadarResult<FetchAndConvertOutput> {
        log.enter(PipelineStage::Validating);
        let station = self.validate_fetch(station, output_dir).await?;
        grid.validate()?;

        let volume_path = self.download_latest(&station, output_dir, log).await?;
        let raster_path = raster_path_for(&volume_path, output_dir, field, sweep);

        let this = self.clone();
        let task_volume = volume_path.clone();
        let task_raster = raster_path.clone();
        let field = field.to_string();
        let mut task_log = log.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let result = this.grid_and_write(
                &task_volume,
                &task_raster,
                &field,
                sweep,
                grid,
                SmoothingParams::default(),
                &mut task_log,
            );
            (result, task_log)
        })
        .await;

        let converted = match joined {
            Ok((result, task_log)) => {
                *log = task_log;
                result
            }
            Err(e) => Err(RadarError::raster_io(
                &raster_path,
                format!("conversion task failed: {e}"),
            )),
        };

        match converted {
            Ok(raster_path) => Ok(FetchAndConvertOutput {
                volume_path,
                raster_path,
            }),
            Err(source) => Err(RadarError::Conversion {
                volume_path,
                source: Box::new(source),
            }),
        }
    }
}

/// `<output_dir>/<volume stem>_<field>_sweep<N>.tif`
///
/// Characters of `field` outside `[A-Za-z0-9._-]` become `_`, so the raster
/// always lands directly in `output_dir`.
pub fn raster_path_for(volume_path: &Path, output_dir: &Path, field: &str, sweep: usize) -> PathBuf {
    let stem = volume_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "volume".to_string());
    let field: String = field
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    output_dir.join(format!("{stem}_{field}_sweep{sweep}.tif"))
}
