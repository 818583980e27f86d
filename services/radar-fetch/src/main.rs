//! NEXRAD latest-volume fetcher.
//!
//! Finds the newest Level-II volume scan for a radar site in the public
//! date-partitioned archive and downloads it atomically. Also lists a
//! station's files, prints the site catalog, and inspects exported rasters.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use radar_ingestion::{ArchiveClient, ListingFormat, Pipeline, SiteRegistry};
use raster_writer::GeoTiffReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(name = "radar-fetch")]
#[command(about = "Fetch the latest NEXRAD volume scan for a radar site", version)]
struct Args {
    /// Archive base URL
    #[arg(long, global = true)]
    archive_root: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Directory listing format: auto, html or s3
    #[arg(long, global = true)]
    listing_format: Option<ListingFormat>,

    /// YAML file with archive settings
    #[arg(long, global = true, env = "RADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the most recent volume for a station
    Fetch {
        /// Station id, e.g. KTLX
        station: String,

        /// Existing directory to download into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List a station's volume files for a day, newest last
    List {
        station: String,

        /// UTC date as YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the bundled site catalog
    Sites,
    /// Print tags and bounds of an exported GeoTIFF
    Inspect { path: PathBuf },
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, args.json_logs)?;

    let archive_config = config::resolve(&ConfigOverrides {
        config_file: args.config.as_deref(),
        archive_root: args.archive_root.as_deref(),
        timeout_secs: args.timeout_secs,
        listing_format: args.listing_format,
    })?;

    match args.command {
        Command::Fetch { station, output_dir } => {
            let pipeline = Pipeline::builder()
                .archive_config(archive_config)
                .build()
                .context("Failed to set up pipeline")?;

            info!(station = %station, dest = %output_dir.display(), "Fetching latest volume");
            let path = pipeline
                .fetch_latest(&station, &output_dir)
                .await
                .with_context(|| format!("Failed to fetch latest volume for {station}"))?;
            println!("{}", path.display());
        }
        Command::List { station, date } => {
            let registry = SiteRegistry::bundled()?;
            let station = registry.validate(&station)?;
            let client = ArchiveClient::new(archive_config)?;

            let url = match date {
                Some(day) => {
                    let midnight = day
                        .and_hms_opt(0, 0, 0)
                        .context("Invalid date")?;
                    client.directory_url(&station, Utc.from_utc_datetime(&midnight))
                }
                None => client.directory_url_now(&station),
            };

            for name in client.list_candidate_files(&url).await? {
                println!("{name}");
            }
        }
        Command::Sites => {
            let registry = SiteRegistry::bundled()?;
            for site in registry.records() {
                match site.location() {
                    Some((lat, lon)) => {
                        println!("{}\t{}\t{:.3}\t{:.3}", site.id, site.name, lat, lon)
                    }
                    None => println!("{}\t{}", site.id, site.name),
                }
            }
        }
        Command::Inspect { path } => {
            let band = GeoTiffReader::open(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let bounds = band.bounds();

            println!("size:       {} x {}", band.width, band.height);
            println!("dtype:      {}", band.data.dtype());
            if let Some(epsg) = band.epsg {
                println!("crs:        EPSG:{epsg}");
            }
            println!(
                "bounds:     west={:.6} south={:.6} east={:.6} north={:.6}",
                bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
            );
            for (name, value) in band.tags.to_items() {
                println!("{name:<11} {value}");
            }
        }
    }

    Ok(())
}
