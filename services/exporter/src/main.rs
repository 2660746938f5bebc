//! Sector exporter.
//!
//! Exports a selected sector of a tiled WMS source:
//! - Elevations as float GeoTIFF (or BIL) rasters, split to a pixel ceiling
//! - Imagery as JPEG/PNG/TIFF files with world files
//! - Point-sampled elevation profiles
//!
//! Every output cell is reported in `report.json`; the process exits
//! non-zero if any cell failed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use compositor::{
    CachingFetcher, ComposeOptions, ElevationFileFormat, ElevationSource, ElevationUnit,
    EncodeOptions, ImageFileFormat, InterpolationMethod, TileFetcher, DEFAULT_ELEVATION_CEILING,
    DEFAULT_IMAGE_CEILING,
};
use exporter::{
    spawn_export, CellStatus, ExportJob, ExportMode, HttpFetcherConfig, HttpTileFetcher,
    LayerKind, RetryPolicy, SourceConfig,
};
use sector_common::Sector;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Elevations,
    Image,
    Profile,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImageFormat {
    Jpeg,
    Png,
    Tiff,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ElevationFormat {
    Geotiff,
    Bil,
}

#[derive(Parser, Debug)]
#[command(name = "exporter")]
#[command(about = "Export a sector of a tiled WMS source as georeferenced rasters")]
struct Args {
    /// Source description (YAML)
    #[arg(short, long, env = "EXPORT_SOURCE")]
    source: PathBuf,

    /// Selected sector as a WMS bbox: minLon,minLat,maxLon,maxLat
    #[arg(long, allow_hyphen_values = true, value_parser = parse_sector)]
    sector: Sector,

    /// What to export (defaults to the source's layer kind)
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Maximum width or height of any output raster
    #[arg(long, env = "EXPORT_PIXEL_CEILING")]
    pixel_ceiling: Option<u32>,

    /// Pyramid level to compose from (default: finest)
    #[arg(long)]
    level: Option<u32>,

    /// Longest side of a profile grid, in samples
    #[arg(long, default_value = "512")]
    samples: u32,

    /// Directory for exported files
    #[arg(short, long, env = "EXPORT_OUTPUT_DIR", default_value = "export")]
    output_dir: PathBuf,

    /// Cells composed at once
    #[arg(long, default_value = "2")]
    cell_concurrency: usize,

    /// Tile fetches in flight per cell
    #[arg(long, default_value = "4")]
    tile_concurrency: usize,

    /// Fail a cell on its first unavailable tile
    #[arg(long)]
    abort_on_error: bool,

    /// Sample lookup: nearest or bilinear
    #[arg(long, default_value = "nearest")]
    interpolation: String,

    /// Sample elevations from individual pyramid tiles instead of one
    /// request per cell
    #[arg(long)]
    tile_mode: bool,

    #[arg(long, value_enum, default_value = "geotiff")]
    elevation_format: ElevationFormat,

    #[arg(long, value_enum, default_value = "jpeg")]
    image_format: ImageFormat,

    /// Write elevations in feet
    #[arg(long)]
    feet: bool,

    /// Maximum retry attempts per tile
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Tiles kept in memory across cells (0 disables the cache)
    #[arg(long, env = "EXPORT_TILE_CACHE", default_value = "0")]
    tile_cache: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log as JSON
    #[arg(long)]
    log_json: bool,
}

fn parse_sector(s: &str) -> Result<Sector, String> {
    Sector::from_wms_string(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_tracing(&args)?;

    let source = SourceConfig::load(&args.source)?;

    let mode = match (args.mode, source.kind) {
        (None, LayerKind::Elevation) | (Some(Mode::Elevations), _) => ExportMode::Elevations,
        (None, LayerKind::Imagery) | (Some(Mode::Image), _) => ExportMode::Image,
        (Some(Mode::Profile), _) => ExportMode::Profile {
            samples: args.samples,
        },
    };

    match (mode, source.kind) {
        (ExportMode::Image, LayerKind::Imagery) => {}
        (ExportMode::Image, LayerKind::Elevation) => {
            bail!("source {} serves elevations, not imagery", source.name)
        }
        (_, LayerKind::Imagery) => bail!("source {} serves imagery, not elevations", source.name),
        _ => {}
    }

    let job = ExportJob {
        sector: args.sector,
        mode,
        levels: source.level_set(),
        compose: compose_options(&args, mode),
        encode: encode_options(&args),
        output_dir: args.output_dir.clone(),
    };

    let http_config = HttpFetcherConfig {
        retry: RetryPolicy {
            max_retries: args.max_retries,
            ..RetryPolicy::default()
        },
        ..HttpFetcherConfig::default()
    };
    let http = HttpTileFetcher::for_source(&source, http_config)?;

    info!(
        source = %source.name,
        sector = %job.sector,
        mode = ?job.mode,
        request = %http.template().prefix(),
        "Starting export"
    );

    let fetcher: Arc<dyn TileFetcher> = if args.tile_cache > 0 {
        Arc::new(CachingFetcher::new(http, args.tile_cache))
    } else {
        Arc::new(http)
    };

    let handle = spawn_export(job, fetcher);

    // Handle Ctrl+C
    let token = handle.cancellation_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Received shutdown signal, cancelling export");
        token.cancel();
    });

    let report = handle.wait().await?;

    for cell in &report.cells {
        match &cell.status {
            CellStatus::Written { files } => println!("{}: written {:?}", cell.file_stem, files),
            CellStatus::ComposeFailed { error } => {
                println!("{}: compose failed: {}", cell.file_stem, error)
            }
            CellStatus::EncodeFailed { error } => {
                println!("{}: encode failed: {}", cell.file_stem, error)
            }
            CellStatus::Cancelled => println!("{}: cancelled", cell.file_stem),
        }
    }

    info!(
        written = report.written_count(),
        failed = report.failed_count(),
        output_dir = %args.output_dir.display(),
        "Export complete"
    );

    if !report.is_success() {
        bail!(
            "{} of {} cells failed",
            report.failed_count(),
            report.cells.len()
        );
    }

    Ok(())
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);

    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("Failed to install tracing subscriber")
}

fn compose_options(args: &Args, mode: ExportMode) -> ComposeOptions {
    let default_ceiling = match mode {
        ExportMode::Image => DEFAULT_IMAGE_CEILING,
        _ => DEFAULT_ELEVATION_CEILING,
    };

    ComposeOptions {
        pixel_ceiling: args.pixel_ceiling.unwrap_or(default_ceiling),
        level: args.level,
        interpolation: InterpolationMethod::from_str(&args.interpolation),
        elevation_source: if args.tile_mode {
            ElevationSource::Tiles
        } else {
            ElevationSource::Composition
        },
        abort_on_error: args.abort_on_error,
        cell_concurrency: args.cell_concurrency,
        tile_concurrency: args.tile_concurrency,
    }
}

fn encode_options(args: &Args) -> EncodeOptions {
    EncodeOptions {
        units: if args.feet {
            ElevationUnit::Feet
        } else {
            ElevationUnit::Meters
        },
        elevation_format: match args.elevation_format {
            ElevationFormat::Geotiff => ElevationFileFormat::GeoTiff,
            ElevationFormat::Bil => ElevationFileFormat::Bil,
        },
        image_format: match args.image_format {
            ImageFormat::Jpeg => ImageFileFormat::Jpeg,
            ImageFormat::Png => ImageFileFormat::Png,
            ImageFormat::Tiff => ImageFileFormat::Tiff,
        },
        ..EncodeOptions::default()
    }
}
