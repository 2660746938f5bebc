//! Pyramid level definitions for quad-tree tiled sources.
//!
//! Level 0 is the coarsest tier. Each following level halves the tile extent
//! in both directions. Tiles are addressed from a fixed north-west origin:
//! row 0 is the northernmost row and rows increase southward, columns
//! increase eastward.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::Sector;

/// Tolerance used to snap a fractional tile index onto an exact boundary.
pub(crate) const INDEX_EPSILON: f64 = 1e-7;

/// One resolution tier of a tiled source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidLevel {
    pub level_number: u32,

    /// Tile extent in degrees of latitude
    pub tile_delta_lat: f64,

    /// Tile extent in degrees of longitude
    pub tile_delta_lon: f64,

    pub tile_width: u32,
    pub tile_height: u32,

    /// Latitude of the grid origin (north edge of row 0)
    pub origin_lat: f64,

    /// Longitude of the grid origin (west edge of column 0)
    pub origin_lon: f64,

    /// Cache namespace used by the retrieval layer
    pub cache_key: String,

    /// True when no data is published at this resolution
    pub empty: bool,
}

impl PyramidLevel {
    /// Sector of the tile at `(row, col)`.
    ///
    /// Computed directly from the indices and the origin so that adjacent
    /// tiles share bit-identical edges.
    pub fn tile_sector(&self, row: u32, col: u32) -> Sector {
        let max_lat = self.origin_lat - row as f64 * self.tile_delta_lat;
        let min_lat = self.origin_lat - (row as f64 + 1.0) * self.tile_delta_lat;
        let min_lon = self.origin_lon + col as f64 * self.tile_delta_lon;
        let max_lon = self.origin_lon + (col as f64 + 1.0) * self.tile_delta_lon;

        Sector {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Fractional row position of a latitude (0.0 at the origin).
    pub fn row_position(&self, lat: f64) -> f64 {
        snap((self.origin_lat - lat) / self.tile_delta_lat)
    }

    /// Fractional column position of a longitude (0.0 at the origin).
    pub fn col_position(&self, lon: f64) -> f64 {
        snap((lon - self.origin_lon) / self.tile_delta_lon)
    }

    /// Number of tile rows between the origin and the south pole.
    pub fn num_rows(&self) -> u32 {
        ((self.origin_lat + 90.0) / self.tile_delta_lat).ceil().max(1.0) as u32
    }

    /// Number of tile columns between the origin and the antimeridian.
    pub fn num_cols(&self) -> u32 {
        ((180.0 - self.origin_lon) / self.tile_delta_lon).ceil().max(1.0) as u32
    }
}

/// Snap values within `INDEX_EPSILON` of an integer onto that integer.
pub(crate) fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < INDEX_EPSILON {
        rounded
    } else {
        value
    }
}

/// The ordered set of levels published by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSet {
    levels: Vec<PyramidLevel>,
    coverage: Sector,
}

impl LevelSet {
    /// Build a quad-tree level set from its level-zero description.
    ///
    /// The first `num_empty_levels` levels are flagged empty.
    #[allow(clippy::too_many_arguments)]
    pub fn quad_tree(
        level_zero_delta_lat: f64,
        level_zero_delta_lon: f64,
        tile_width: u32,
        tile_height: u32,
        num_levels: u32,
        num_empty_levels: u32,
        origin: (f64, f64),
        coverage: Sector,
        cache_name: &str,
    ) -> Self {
        let levels = (0..num_levels.max(1))
            .map(|n| {
                let scale = 2f64.powi(n as i32);
                PyramidLevel {
                    level_number: n,
                    tile_delta_lat: level_zero_delta_lat / scale,
                    tile_delta_lon: level_zero_delta_lon / scale,
                    tile_width,
                    tile_height,
                    origin_lat: origin.0,
                    origin_lon: origin.1,
                    cache_key: format!("{}/{}", cache_name, n),
                    empty: n < num_empty_levels,
                }
            })
            .collect();

        Self { levels, coverage }
    }

    /// Wrap an explicit list of levels. Returns `None` for an empty list.
    pub fn from_levels(levels: Vec<PyramidLevel>, coverage: Sector) -> Option<Self> {
        if levels.is_empty() {
            return None;
        }
        Some(Self { levels, coverage })
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    /// Geographic extent where the source publishes data.
    pub fn coverage(&self) -> &Sector {
        &self.coverage
    }

    pub fn level(&self, n: u32) -> Option<&PyramidLevel> {
        self.levels.get(n as usize)
    }

    /// The finest level.
    pub fn last_level(&self) -> &PyramidLevel {
        // Construction guarantees at least one level.
        &self.levels[self.levels.len() - 1]
    }

    /// Turn an optional requested level into a valid level number.
    ///
    /// `None` means the finest level. Requests beyond the last level are
    /// clamped to it.
    pub fn clamp(&self, requested: Option<u32>) -> u32 {
        let last = self.last_level().level_number;
        match requested {
            None => last,
            Some(n) if n > last => {
                warn!(requested = n, last, "Requested level beyond last level, clamping");
                last
            }
            Some(n) => n,
        }
    }

    /// Nearest non-empty level to `n`, preferring coarser levels.
    ///
    /// Falls back to the nearest finer non-empty level when every coarser
    /// level is empty. Returns `None` when all levels are empty.
    pub fn nearest_non_empty(&self, n: u32) -> Option<&PyramidLevel> {
        let start = (n as usize).min(self.levels.len() - 1);

        self.levels[..=start]
            .iter()
            .rev()
            .find(|l| !l.empty)
            .or_else(|| self.levels[start..].iter().find(|l| !l.empty))
    }
}
