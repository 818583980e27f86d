//! NEXRAD latest-volume acquisition and raster conversion.
//!
//! # Architecture
//!
//! - [`sites`]: registry of known radar sites
//! - [`listing`]: archive directory URLs, HTML index and S3 bucket listings,
//!   latest-file selection
//! - [`download`]: two-phase (temp file + rename) download
//! - [`gridding`]: volume reader and gridder contracts, reference gridder
//! - [`pipeline`]: orchestration of the above plus raster export
//! - [`config`]: archive settings from defaults, YAML and environment

pub mod config;
pub mod download;
pub mod gridding;
pub mod listing;
pub mod pipeline;
pub mod sites;

pub use config::{ArchiveConfig, ListingFormat};
pub use download::{write_stream_atomically, AtomicDownloader, DownloadReport};
pub use gridding::{
    GridRequest, GriddedField, Gridder, RadarVolume, SmoothingParams, Sweep, VolumeReader,
    WeightedGateGridder, WeightingFunction,
};
pub use listing::{
    build_directory_url, filter_candidates, parse_bucket_listing, parse_listing, select_latest,
    ArchiveClient, BucketPage,
};
pub use pipeline::{FetchAndConvertOutput, Pipeline, PipelineBuilder, PipelineStage, StageLog};
pub use sites::{SiteRecord, SiteRegistry};
