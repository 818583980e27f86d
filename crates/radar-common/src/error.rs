//! Error types shared by every stage of the radar pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using RadarError.
pub type RadarResult<T> = Result<T, RadarError>;

/// Primary error type for radar acquisition and conversion.
///
/// Every pipeline stage reports failure through one of these variants so the
/// caller can tell a bad station code from an empty archive directory from a
/// failed raster write without parsing messages.
#[derive(Debug, Error)]
pub enum RadarError {
    // === Configuration ===
    #[error("Station catalog unavailable: {0}")]
    Configuration(String),

    // === User input ===
    #[error("Invalid NEXRAD site: {0}")]
    InvalidStation(String),

    #[error("Invalid grid specification: {0}")]
    InvalidGridSpec(String),

    // === Filesystem preconditions ===
    #[error("Destination is not an existing directory: {}", .0.display())]
    Destination(PathBuf),

    #[error("Input volume file not found: {}", .0.display())]
    MissingInput(PathBuf),

    // === Remote archive ===
    #[error("No radar data files found.")]
    NoListing { url: String },

    #[error("No files with a recognized volume extension at {url}")]
    NoValidFiles { url: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("Download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    // === Conversion ===
    #[error("Failed to read volume {}: {reason}", .path.display())]
    VolumeRead { path: PathBuf, reason: String },

    #[error("Gridding produced no data: {0}")]
    EmptyGrid(String),

    #[error("Raster write failed for {}: {reason}", .path.display())]
    RasterIo { path: PathBuf, reason: String },

    /// Conversion failed after the raw volume was already downloaded.
    #[error("Conversion of {} failed: {source}", .volume_path.display())]
    Conversion {
        volume_path: PathBuf,
        #[source]
        source: Box<RadarError>,
    },
}

impl RadarError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            RadarError::Configuration(_) => "ConfigurationError",
            RadarError::InvalidStation(_) => "InvalidStationError",
            RadarError::InvalidGridSpec(_) => "InvalidGridSpecError",
            RadarError::Destination(_) => "DestinationError",
            RadarError::MissingInput(_) => "MissingInputError",
            RadarError::NoListing { .. } => "NoListingError",
            RadarError::NoValidFiles { .. } => "NoValidFilesError",
            RadarError::Http { .. } | RadarError::Download { .. } => "DownloadError",
            RadarError::VolumeRead { .. } => "VolumeReadError",
            RadarError::EmptyGrid(_) => "EmptyGridError",
            RadarError::RasterIo { .. } => "RasterIOError",
            RadarError::Conversion { source, .. } => source.kind(),
        }
    }

    /// Whether a caller-level retry (with backoff) could plausibly succeed.
    ///
    /// Nothing in this workspace retries internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            RadarError::NoListing { .. }
            | RadarError::NoValidFiles { .. }
            | RadarError::Http { .. }
            | RadarError::Download { .. } => true,
            RadarError::Conversion { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Create a Download error.
    pub fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        RadarError::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a RasterIo error.
    pub fn raster_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        RadarError::RasterIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
