//! WMS GetMap request building for tiled fetches.
//!
//! The layer-level part of a request (service, version, coordinate system,
//! layers, styles, format) is assembled once into a [`GetMapTemplate`]; each
//! tile then only appends its width, height and bounding box.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use sector_common::{AxisOrder, CrsCode, ExportError, ExportResult, Sector};

/// Highest protocol version spoken. Newer servers are addressed as 1.3.0.
pub const MAX_VERSION: WmsVersion = WmsVersion::new(1, 3, 0);

/// Last version using lon/lat bbox ordering for every coordinate system.
pub const LEGACY_AXIS_VERSION: WmsVersion = WmsVersion::new(1, 1, 1);

/// A dotted WMS version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WmsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl WmsVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse "1.3.0", "1.1" or "1"; missing components count as zero.
    pub fn parse(s: &str) -> ExportResult<Self> {
        let mut parts = [0u32; 3];
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ExportError::invalid("empty WMS version"));
        }

        for (i, part) in trimmed.split('.').enumerate() {
            if i >= parts.len() {
                return Err(ExportError::invalid(format!("invalid WMS version: {}", s)));
            }
            parts[i] = part
                .parse()
                .map_err(|_| ExportError::invalid(format!("invalid WMS version: {}", s)))?;
        }

        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl PartialOrd for WmsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WmsVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for WmsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Layer-level request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    /// GetMap endpoint, e.g. "https://host/wms?"
    pub service_url: String,

    /// Advertised version; `None` means the newest supported
    #[serde(default)]
    pub version: Option<String>,

    /// Comma-separated layer names
    pub layer_names: String,

    #[serde(default)]
    pub style_names: Option<String>,

    /// MIME type requested from the server
    pub image_format: String,

    /// Coordinate system tag; defaults depend on the version
    #[serde(default)]
    pub coordinate_system: Option<String>,
}

/// Immutable request prefix for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct GetMapTemplate {
    prefix: String,
    version: WmsVersion,
    crs: CrsCode,
    axis_order: AxisOrder,
}

impl GetMapTemplate {
    /// Build the shared prefix for every tile request of a layer.
    ///
    /// Versions at or above 1.3.0 (or no version) are sent as 1.3.0 with a
    /// `crs=` parameter defaulting to CRS:84. Older versions keep their
    /// number and use `srs=` defaulting to EPSG:4326.
    pub fn new(params: &LayerParams) -> ExportResult<Self> {
        let requested = params
            .version
            .as_deref()
            .map(WmsVersion::parse)
            .transpose()?;

        let (version, cs_key, default_cs) = match requested {
            Some(v) if v < MAX_VERSION => (v, "srs", "EPSG:4326"),
            _ => (MAX_VERSION, "crs", "CRS:84"),
        };

        let crs = CrsCode::from_wms_string(params.coordinate_system.as_deref().unwrap_or(default_cs));

        let axis_order = if version <= LEGACY_AXIS_VERSION {
            crs.axis_order_wms_1_1()
        } else {
            crs.axis_order_wms_1_3()
        };

        let mut prefix = params.service_url.clone();
        if !prefix.to_lowercase().contains("service=wms") {
            if !prefix.contains('?') {
                prefix.push('?');
            } else if !prefix.ends_with('?') && !prefix.ends_with('&') {
                prefix.push('&');
            }
            prefix.push_str("service=WMS");
        }
        prefix.push_str("&request=GetMap");
        prefix.push_str(&format!("&version={}", version));
        prefix.push_str(&format!("&{}={}", cs_key, crs));
        prefix.push_str(&format!("&layers={}", params.layer_names));
        prefix.push_str(&format!(
            "&styles={}",
            params.style_names.as_deref().unwrap_or("")
        ));
        prefix.push_str(&format!("&format={}", params.image_format));

        Ok(Self {
            prefix,
            version,
            crs,
            axis_order,
        })
    }

    /// Version actually sent to the server.
    pub fn version(&self) -> WmsVersion {
        self.version
    }

    pub fn crs(&self) -> &CrsCode {
        &self.crs
    }

    pub fn axis_order(&self) -> AxisOrder {
        self.axis_order
    }

    /// The shared prefix, without per-tile parameters.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full request string for one tile.
    ///
    /// Spaces are percent-encoded; nothing else is escaped.
    pub fn tile_request(&self, width: u32, height: u32, sector: &Sector) -> String {
        let bbox = match self.axis_order {
            AxisOrder::LonLat => format!(
                "{},{},{},{}",
                sector.min_lon, sector.min_lat, sector.max_lon, sector.max_lat
            ),
            AxisOrder::LatLon => format!(
                "{},{},{},{}",
                sector.min_lat, sector.min_lon, sector.max_lat, sector.max_lon
            ),
        };

        let request = format!(
            "{}&width={}&height={}&bbox={}&",
            self.prefix, width, height, bbox
        );
        request.replace(' ', "%20")
    }
}
