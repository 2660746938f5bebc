//! Common types shared by the sector export crates.
//!
//! Geographic sectors, pyramid levels, tile addressing and the error
//! taxonomy used across composition and export.

pub mod crs;
pub mod error;
pub mod level;
pub mod sector;
pub mod tile;

pub use crs::{AxisOrder, CrsCode};
pub use error::{ExportError, ExportResult};
pub use level::{LevelSet, PyramidLevel};
pub use sector::{LatLon, Sector, SectorParseError};
pub use tile::{
    effective_level, tile_at, tiles_covering, tiles_covering_level, TileCell, TileGrid, TileKey,
    TileRange,
};
