//! OGC WMS request building for tiled sources.
//!
//! Supports GetMap requests for WMS 1.1.1 and 1.3.0 servers, including the
//! version- and CRS-dependent bounding box axis order.

pub mod getmap;

pub use getmap::{GetMapTemplate, LayerParams, WmsVersion, LEGACY_AXIS_VERSION, MAX_VERSION};
