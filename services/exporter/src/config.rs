//! Source configuration loading.
//!
//! A source is one WMS layer served as a tiled pyramid, described in YAML:
//!
//! ```yaml
//! name: srtm
//! kind: elevation
//! service_url: "https://example.com/wms?"
//! version: "1.3.0"
//! layers: srtm30
//! formats: [application/bil16, image/png]
//! pyramid:
//!   level_zero_delta: 20.0
//!   tile_width: 150
//!   num_levels: 12
//! elevation:
//!   byte_order: big_endian
//!   missing_data_signal: -32768
//! ```
//!
//! Omitted fields fall back to the usual WMS elevation-model values: 20
//! degree level-zero tiles of 150 x 150 samples, 18 levels, none empty,
//! missing-data signal -9999, whole-globe coverage.

use std::path::Path;

use anyhow::{bail, Context, Result};
use compositor::{ByteOrder, PayloadKind, SampleType, TileFormat};
use sector_common::{LevelSet, Sector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wms_protocol::LayerParams;

/// Elevation formats in order of preference.
pub const ELEVATION_FORMAT_PREFERENCE: [&str; 6] = [
    "application/bil32",
    "application/bil16",
    "application/bil",
    "image/bil",
    "image/png",
    "image/tiff",
];

/// Image formats in order of preference.
pub const IMAGE_FORMAT_PREFERENCE: [&str; 3] = ["image/png", "image/jpeg", "image/tiff"];

/// What a source layer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    #[default]
    Elevation,
    Imagery,
}

impl LayerKind {
    pub fn payload_kind(&self) -> PayloadKind {
        match self {
            LayerKind::Elevation => PayloadKind::Elevation,
            LayerKind::Imagery => PayloadKind::Image,
        }
    }
}

/// Root configuration loaded from a source YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub kind: LayerKind,
    pub service_url: String,
    #[serde(default)]
    pub version: Option<String>,
    pub layers: String,
    #[serde(default)]
    pub styles: Option<String>,
    #[serde(default)]
    pub coordinate_system: Option<String>,
    /// Formats advertised by the server
    #[serde(default)]
    pub formats: Vec<String>,
    /// Explicit format, bypassing the preference list
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub pyramid: PyramidConfig,
    #[serde(default)]
    pub elevation: ElevationConfig,
    #[serde(default)]
    pub coverage: Option<BBox>,
}

/// Level structure of the tiled pyramid.
#[derive(Debug, Clone, Deserialize)]
pub struct PyramidConfig {
    #[serde(default = "default_level_zero_delta")]
    pub level_zero_delta: f64,
    /// Overrides `level_zero_delta` for longitude
    #[serde(default)]
    pub level_zero_delta_lon: Option<f64>,
    #[serde(default = "default_tile_size")]
    pub tile_width: u32,
    #[serde(default = "default_tile_size")]
    pub tile_height: u32,
    #[serde(default = "default_num_levels")]
    pub num_levels: u32,
    #[serde(default)]
    pub num_empty_levels: u32,
}

fn default_level_zero_delta() -> f64 {
    20.0
}

fn default_tile_size() -> u32 {
    150
}

fn default_num_levels() -> u32 {
    18
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            level_zero_delta: default_level_zero_delta(),
            level_zero_delta_lon: None,
            tile_width: default_tile_size(),
            tile_height: default_tile_size(),
            num_levels: default_num_levels(),
            num_empty_levels: 0,
        }
    }
}

/// How elevation tiles are laid out.
#[derive(Debug, Clone, Deserialize)]
pub struct ElevationConfig {
    /// Sample type; derived from the format when absent
    #[serde(default)]
    pub data_type: Option<SampleType>,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_missing_data_signal")]
    pub missing_data_signal: f64,
}

fn default_missing_data_signal() -> f64 {
    -9999.0
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            data_type: None,
            byte_order: ByteOrder::default(),
            missing_data_signal: default_missing_data_signal(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl SourceConfig {
    /// Load a source configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source config: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse source config: {}", path.display()))?;

        info!(source = %config.name, kind = ?config.kind, "Loaded source config");
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: SourceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let p = &self.pyramid;
        if !(p.level_zero_delta > 0.0) || p.level_zero_delta_lon.is_some_and(|d| !(d > 0.0)) {
            bail!("pyramid level-zero delta must be positive");
        }
        if p.tile_width == 0 || p.tile_height == 0 {
            bail!("pyramid tile size must be positive");
        }
        if p.num_levels == 0 {
            bail!("pyramid must have at least one level");
        }
        if self.layers.trim().is_empty() {
            bail!("no layer names configured");
        }
        Ok(())
    }

    /// Geographic extent served by the source.
    pub fn coverage(&self) -> Sector {
        match &self.coverage {
            Some(b) => Sector::new(b.min_lat, b.max_lat, b.min_lon, b.max_lon),
            None => Sector::full_sphere(),
        }
    }

    /// Pyramid levels with the tile origin at the north-west corner of the globe.
    pub fn level_set(&self) -> LevelSet {
        let p = &self.pyramid;
        LevelSet::quad_tree(
            p.level_zero_delta,
            p.level_zero_delta_lon.unwrap_or(p.level_zero_delta),
            p.tile_width,
            p.tile_height,
            p.num_levels,
            p.num_empty_levels,
            (90.0, -180.0),
            self.coverage(),
            &self.name,
        )
    }

    /// MIME type to request: the explicit format, else the first preferred
    /// format the server advertises, else the first advertised one.
    pub fn choose_format(&self) -> String {
        if let Some(format) = &self.format {
            return format.clone();
        }

        let preference: &[&str] = match self.kind {
            LayerKind::Elevation => &ELEVATION_FORMAT_PREFERENCE,
            LayerKind::Imagery => &IMAGE_FORMAT_PREFERENCE,
        };

        let chosen = preference
            .iter()
            .find(|p| self.formats.iter().any(|f| f.eq_ignore_ascii_case(p)))
            .map(|p| p.to_string())
            .or_else(|| self.formats.first().cloned())
            .unwrap_or_else(|| preference[0].to_string());

        debug!(format = %chosen, "Chose tile format");
        chosen
    }

    /// Sample type of elevation tiles: configured, else derived from the
    /// format (`bil32` float32, anything else int16).
    pub fn sample_type(&self) -> SampleType {
        if let Some(data_type) = self.elevation.data_type {
            return data_type;
        }
        if self.choose_format().to_lowercase().contains("bil32") {
            SampleType::Float32
        } else {
            SampleType::Int16
        }
    }

    /// Decoder for the fetched tile bytes.
    pub fn tile_format(&self) -> Result<TileFormat> {
        match self.kind {
            LayerKind::Elevation => {
                let format = self.choose_format();
                TileFormat::for_elevation(&format, self.sample_type(), self.elevation.byte_order)
                    .with_context(|| format!("Source {} cannot decode {}", self.name, format))
            }
            LayerKind::Imagery => Ok(TileFormat::Image),
        }
    }

    /// Source value meaning "no data", for elevation layers.
    pub fn missing_signal(&self) -> Option<f64> {
        match self.kind {
            LayerKind::Elevation => Some(self.elevation.missing_data_signal),
            LayerKind::Imagery => None,
        }
    }

    pub fn layer_params(&self) -> LayerParams {
        LayerParams {
            service_url: self.service_url.clone(),
            version: self.version.clone(),
            layer_names: self.layers.clone(),
            style_names: self.styles.clone(),
            image_format: self.choose_format(),
            coordinate_system: self.coordinate_system.clone(),
        }
    }
}
