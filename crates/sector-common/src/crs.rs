//! Coordinate system tags and axis-order rules.
//!
//! Only geographic systems are handled. No reprojection happens anywhere in
//! the pipeline; the tag only decides how a bounding box is written into a
//! request.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate system tag as it appears in a `crs=` / `srs=` request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CrsCode {
    /// OGC CRS:84 (WGS84 with longitude first)
    Crs84,
    /// WGS84 Geographic with the EPSG (latitude first) axis definition
    Epsg4326,
    /// Any other tag, passed through verbatim
    Other(String),
}

impl CrsCode {
    /// Parse a tag from a request or config value.
    ///
    /// Accepts "CRS:84", "EPSG:4326" (any case); everything else is kept as-is.
    pub fn from_wms_string(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.to_uppercase().as_str() {
            "CRS:84" => CrsCode::Crs84,
            "EPSG:4326" => CrsCode::Epsg4326,
            _ => CrsCode::Other(trimmed.to_string()),
        }
    }

    /// True for the legacy CRS:84-equivalent tag, including any tag that
    /// merely contains "CRS:84" (e.g. "OGC:CRS:84").
    pub fn is_crs84(&self) -> bool {
        match self {
            CrsCode::Crs84 => true,
            CrsCode::Epsg4326 => false,
            CrsCode::Other(s) => s.to_uppercase().contains("CRS:84"),
        }
    }

    /// Bounding box axis order for a WMS 1.3.0 request.
    ///
    /// CRS:84 keeps longitude first; every other tag is written latitude first.
    pub fn axis_order_wms_1_3(&self) -> AxisOrder {
        if self.is_crs84() {
            AxisOrder::LonLat
        } else {
            AxisOrder::LatLon
        }
    }

    /// Get the axis order for WMS 1.1.1 and earlier (always lon, lat).
    pub fn axis_order_wms_1_1(&self) -> AxisOrder {
        AxisOrder::LonLat
    }
}

impl fmt::Display for CrsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsCode::Crs84 => write!(f, "CRS:84"),
            CrsCode::Epsg4326 => write!(f, "EPSG:4326"),
            CrsCode::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<String> for CrsCode {
    fn from(s: String) -> Self {
        CrsCode::from_wms_string(&s)
    }
}

impl From<CrsCode> for String {
    fn from(code: CrsCode) -> Self {
        code.to_string()
    }
}

/// Axis order for coordinate interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisOrder {
    /// Longitude first: minlon,minlat,maxlon,maxlat
    LonLat,
    /// Latitude first: minlat,minlon,maxlat,maxlon
    LatLon,
}
