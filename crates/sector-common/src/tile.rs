//! Tile addressing: mapping sectors to tile indices and back.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::{ExportError, ExportResult, LevelSet, PyramidLevel, Sector};

/// Address of one tile (level/row/column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub level: u32,
    /// Row, counted southward from the level origin
    pub row: u32,
    /// Column, counted eastward from the level origin
    pub col: u32,
}

impl TileKey {
    pub fn new(level: u32, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }

    /// Generate a cache key string.
    pub fn cache_key(&self) -> String {
        format!("{}/{}/{}", self.level, self.row, self.col)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.row, self.col)
    }
}

/// A tile address paired with its geographic extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCell {
    pub key: TileKey,
    pub sector: Sector,
}

/// The tiles covering a sector at one level.
///
/// Stored north-to-south: `rows[0]` is the northernmost row, and each row
/// runs west-to-east.
#[derive(Debug, Clone)]
pub struct TileGrid {
    /// Level actually used (may differ from the requested one)
    pub level: PyramidLevel,
    rows: Vec<Vec<TileCell>>,
}

impl TileGrid {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.num_rows() * self.num_cols()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&TileCell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn rows(&self) -> &[Vec<TileCell>] {
        &self.rows
    }

    /// All cells, north-to-south then west-to-east.
    pub fn iter(&self) -> impl Iterator<Item = &TileCell> {
        self.rows.iter().flatten()
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.iter().any(|cell| cell.key == *key)
    }

    /// Union of all tile sectors.
    pub fn covered_sector(&self) -> Option<Sector> {
        Sector::union_all(self.iter().map(|cell| &cell.sector))
    }

    /// Native pixel size of the whole grid (tiles times tile dimensions).
    pub fn native_pixel_size(&self) -> (u64, u64) {
        (
            self.num_cols() as u64 * self.level.tile_width as u64,
            self.num_rows() as u64 * self.level.tile_height as u64,
        )
    }
}

/// Inclusive row/column bounds of the tiles covering a sector at one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub level: u32,
    /// Northernmost row
    pub top_row: u32,
    /// Southernmost row
    pub bottom_row: u32,
    pub left_col: u32,
    pub right_col: u32,
}

impl TileRange {
    /// Compute the covering range without materialising the grid.
    ///
    /// The north and west edges are inclusive; the south and east edges are
    /// exclusive, so a sector whose edge lies on a tile boundary does not pull
    /// in the neighbouring tile.
    pub fn covering(sector: &Sector, level: &PyramidLevel) -> ExportResult<Self> {
        if sector.is_degenerate() {
            return Err(ExportError::invalid(format!(
                "degenerate sector {}",
                sector
            )));
        }
        if !(level.tile_delta_lat > 0.0 && level.tile_delta_lon > 0.0) {
            return Err(ExportError::invalid(format!(
                "level {} has a zero tile extent",
                level.level_number
            )));
        }

        let max_row = level.num_rows() as i64 - 1;
        let max_col = level.num_cols() as i64 - 1;

        let top_row = (level.row_position(sector.max_lat).floor() as i64).clamp(0, max_row);
        let bottom_row =
            ((level.row_position(sector.min_lat).ceil() as i64) - 1).clamp(top_row, max_row);

        let left_col = (level.col_position(sector.min_lon).floor() as i64).clamp(0, max_col);
        let right_col =
            ((level.col_position(sector.max_lon).ceil() as i64) - 1).clamp(left_col, max_col);

        Ok(Self {
            level: level.level_number,
            top_row: top_row as u32,
            bottom_row: bottom_row as u32,
            left_col: left_col as u32,
            right_col: right_col as u32,
        })
    }

    pub fn num_rows(&self) -> u32 {
        self.bottom_row - self.top_row + 1
    }

    pub fn num_cols(&self) -> u32 {
        self.right_col - self.left_col + 1
    }

    /// Union of the covered tile sectors.
    pub fn sector(&self, level: &PyramidLevel) -> Sector {
        let nw = level.tile_sector(self.top_row, self.left_col);
        let se = level.tile_sector(self.bottom_row, self.right_col);
        Sector {
            min_lat: se.min_lat,
            max_lat: nw.max_lat,
            min_lon: nw.min_lon,
            max_lon: se.max_lon,
        }
    }
}

/// Find the tiles covering `sector` at exactly `level`.
pub fn tiles_covering_level(sector: &Sector, level: &PyramidLevel) -> ExportResult<TileGrid> {
    let range = TileRange::covering(sector, level)?;

    let rows = (range.top_row..=range.bottom_row)
        .map(|row| {
            (range.left_col..=range.right_col)
                .map(|col| TileCell {
                    key: TileKey::new(level.level_number, row, col),
                    sector: level.tile_sector(row, col),
                })
                .collect()
        })
        .collect();

    Ok(TileGrid {
        level: level.clone(),
        rows,
    })
}

/// Find the tiles covering `sector`, starting from `requested` (or the finest
/// level when `None`).
///
/// Empty levels are skipped toward the nearest coarser non-empty level. The
/// level actually used is recorded in [`TileGrid::level`].
pub fn tiles_covering(
    sector: &Sector,
    levels: &LevelSet,
    requested: Option<u32>,
) -> ExportResult<TileGrid> {
    if sector.is_degenerate() {
        return Err(ExportError::invalid(format!(
            "degenerate sector {}",
            sector
        )));
    }

    let level = effective_level(levels, requested)?;
    tiles_covering_level(sector, level)
}

/// Level used for a request: clamped to the pyramid, then moved off empty
/// levels.
pub fn effective_level(levels: &LevelSet, requested: Option<u32>) -> ExportResult<&PyramidLevel> {
    let wanted = levels.clamp(requested);
    let level = levels
        .nearest_non_empty(wanted)
        .ok_or_else(|| ExportError::no_data("every level of the source is empty"))?;

    if level.level_number != wanted {
        debug!(
            requested = wanted,
            effective = level.level_number,
            "Requested level is empty, using nearest non-empty level"
        );
    }

    Ok(level)
}

/// Tile containing a point at the given level.
pub fn tile_at(level: &PyramidLevel, lat: f64, lon: f64) -> TileKey {
    let row = level.row_position(lat).floor().max(0.0) as u32;
    let col = level.col_position(lon).floor().max(0.0) as u32;
    TileKey::new(
        level.level_number,
        row.min(level.num_rows() - 1),
        col.min(level.num_cols() - 1),
    )
}
