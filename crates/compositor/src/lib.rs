//! Sector composition: turning tiled pyramid sources into bounded rasters.
//!
//! Given a selected sector, the partitioner splits it into cells no larger
//! than a pixel ceiling, fetches the pyramid tiles each cell needs through a
//! [`TileFetcher`], and composes one [`OutputTile`] per cell:
//!
//! - **Elevations**: samples are looked up per output pixel; pixels without
//!   data keep [`MISSING_DATA_SENTINEL`].
//! - **Imagery**: tile pixels are area-averaged onto the cell canvas.
//!
//! # Architecture
//!
//! ```text
//! selected sector
//!      │
//!      ▼
//! plan_partition ──► n x n cells, each ≤ pixel ceiling
//!      │
//!      ├─► compose_partition ─► compose_cell (cells run concurrently)
//!      │        │
//!      │        ├─► tiles_covering / tile_at
//!      │        ├─► TileFetcher::fetch  (Ready | Unavailable | Fatal)
//!      │        └─► merge into the cell buffer
//!      │
//!      └─► on_cell, per cell as it finishes
//!               │
//!               ▼
//!          write_output (GeoTIFF / BIL / image + world file)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use compositor::{partition, write_output, ComposeOptions, EncodeOptions, PayloadKind};
//!
//! let result = partition(&sector, PayloadKind::Elevation, &levels, &fetcher,
//!     &ComposeOptions::default(), &cancel).await?;
//!
//! for cell in &result.cells {
//!     if let Ok(tile) = &cell.outcome {
//!         write_output(tile, out_dir, &EncodeOptions::default())?;
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod decode;
pub mod elevation;
pub mod encode;
pub mod fetch;
pub mod imagery;
pub mod interpolation;
pub mod partition;
pub mod types;

// Re-export commonly used types at crate root
pub use cache::{CacheStats, CachingFetcher};
pub use config::{
    ComposeOptions, ElevationFileFormat, ElevationSource, ElevationUnit, EncodeOptions,
    ImageFileFormat, DEFAULT_ELEVATION_CEILING, DEFAULT_IMAGE_CEILING,
};
pub use decode::{
    decode_bil, decode_elevation_png, decode_elevation_tiff, decode_image, ByteOrder, SampleType,
    TileFormat,
};
pub use elevation::{
    adjust_size, compose_elevation_raster, compose_elevations, compose_elevations_from_tiles,
    merge_samples, sample_elevations, sample_grid,
};
pub use encode::{encoder_for, write_output, RasterEncoder};
pub use fetch::{FetchOutcome, PayloadKind, TileFetcher, TileRequest};
pub use imagery::{compose_image, merge_tile_into_canvas};
pub use interpolation::InterpolationMethod;
pub use partition::{
    compose_cell, compose_partition, partition, plan_partition, CellResult, PartitionCell,
    PartitionPlan, PartitionResult,
};
pub use types::{FetchedTile, Georeference, OutputTile, Raster, TilePayload, MISSING_DATA_SENTINEL};
