//! Sample lookup within a tile's sample grid.
//!
//! Tile samples are grid-point registered: the first and last columns lie on
//! the west and east edges of the tile sector, the first and last rows on
//! the north and south edges.

use sector_common::Sector;
use serde::{Deserialize, Serialize};

/// How a sample is looked up between grid points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Nearest grid point (exact source values).
    #[default]
    Nearest,
    /// Bilinear between the four surrounding grid points.
    Bilinear,
}

impl InterpolationMethod {
    /// Parse from string (case-insensitive). Unknown values fall back to nearest.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bilinear" | "linear" => Self::Bilinear,
            _ => Self::Nearest,
        }
    }
}

impl std::fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "nearest"),
            Self::Bilinear => write!(f, "bilinear"),
        }
    }
}

/// Fractional grid position `(x, y)` of a point inside a tile.
///
/// `x` runs west to east over `0..=width-1`, `y` north to south over
/// `0..=height-1`. Returns `None` for points outside the sector.
pub fn grid_position(
    sector: &Sector,
    width: u32,
    height: u32,
    lat: f64,
    lon: f64,
) -> Option<(f64, f64)> {
    if width == 0 || height == 0 || sector.is_degenerate() || !sector.contains(lat, lon) {
        return None;
    }

    let s_lon = (lon - sector.min_lon) / sector.delta_lon();
    let s_lat = (sector.max_lat - lat) / sector.delta_lat();

    Some((
        s_lon * (width - 1) as f64,
        s_lat * (height - 1) as f64,
    ))
}

/// Nearest neighbor interpolation.
///
/// Returns NaN outside the grid.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if x < 0.0 || y < 0.0 {
        return f32::NAN;
    }

    let col = x.round() as usize;
    let row = y.round() as usize;

    if col >= width || row >= height {
        return f32::NAN;
    }

    data.get(row * width + col).copied().unwrap_or(f32::NAN)
}

/// Bilinear interpolation.
///
/// Returns NaN when any contributing grid point is NaN.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    if x < 0.0 || y < 0.0 || width == 0 || height == 0 {
        return f32::NAN;
    }

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;

    if x0 >= width || y0 >= height || data.len() < width * height {
        return f32::NAN;
    }

    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

/// Look up one value at a fractional grid position.
pub fn interpolate(
    method: InterpolationMethod,
    data: &[f32],
    width: usize,
    height: usize,
    x: f64,
    y: f64,
) -> f32 {
    match method {
        InterpolationMethod::Nearest => nearest_interpolate(data, width, height, x, y),
        InterpolationMethod::Bilinear => bilinear_interpolate(data, width, height, x, y),
    }
}
