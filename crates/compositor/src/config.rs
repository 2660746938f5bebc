//! Configuration for composition and encoding.

use serde::{Deserialize, Serialize};

use crate::decode::{ByteOrder, SampleType};
use crate::interpolation::InterpolationMethod;
use crate::types::MISSING_DATA_SENTINEL;

/// Default maximum output side for elevation rasters.
pub const DEFAULT_ELEVATION_CEILING: u32 = 2048;

/// Default maximum output side for image rasters.
pub const DEFAULT_IMAGE_CEILING: u32 = 8192;

/// Where elevation samples for a cell come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationSource {
    /// One request covering the whole cell at exactly the output size.
    #[default]
    Composition,
    /// The pyramid tiles covering the cell, sampled individually.
    Tiles,
}

/// Options controlling composition of a selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeOptions {
    /// Maximum width or height of any output raster, in pixels.
    pub pixel_ceiling: u32,

    /// Requested pyramid level; `None` uses the finest level.
    pub level: Option<u32>,

    /// Sample lookup method for elevations.
    pub interpolation: InterpolationMethod,

    pub elevation_source: ElevationSource,

    /// Fail an image cell on the first tile that cannot be fetched.
    pub abort_on_error: bool,

    /// Number of cells composed at once.
    pub cell_concurrency: usize,

    /// Number of tile fetches in flight per cell.
    pub tile_concurrency: usize,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            pixel_ceiling: DEFAULT_ELEVATION_CEILING,
            level: None,
            interpolation: InterpolationMethod::Nearest,
            elevation_source: ElevationSource::Composition,
            abort_on_error: false,
            cell_concurrency: 2,
            tile_concurrency: 8,
        }
    }
}

impl ComposeOptions {
    /// Defaults for image exports.
    pub fn imagery() -> Self {
        Self {
            pixel_ceiling: DEFAULT_IMAGE_CEILING,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.pixel_ceiling == 0 {
            return Err("pixel_ceiling must be > 0".to_string());
        }

        if self.cell_concurrency == 0 {
            return Err("cell_concurrency must be > 0".to_string());
        }

        if self.tile_concurrency == 0 {
            return Err("tile_concurrency must be > 0".to_string());
        }

        Ok(())
    }
}

/// Elevation unit recorded with encoded rasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationUnit {
    #[default]
    Meters,
    Feet,
}

impl ElevationUnit {
    /// Factor applied to metre samples when encoding.
    pub fn scale_from_meters(&self) -> f32 {
        match self {
            ElevationUnit::Meters => 1.0,
            ElevationUnit::Feet => 3.280_84,
        }
    }
}

/// Container used for elevation exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationFileFormat {
    /// Single-band float GeoTIFF with geokeys.
    #[default]
    GeoTiff,
    /// Raw band-interleaved samples with a header and world file.
    Bil,
}

impl ElevationFileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ElevationFileFormat::GeoTiff => "tif",
            ElevationFileFormat::Bil => "bil",
        }
    }
}

/// Container used for image exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFileFormat {
    #[default]
    Jpeg,
    Png,
    Tiff,
}

impl ImageFileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFileFormat::Jpeg => "jpg",
            ImageFileFormat::Png => "png",
            ImageFileFormat::Tiff => "tif",
        }
    }

    /// Extension of the matching world file.
    pub fn world_file_extension(&self) -> &'static str {
        match self {
            ImageFileFormat::Jpeg => "jgw",
            ImageFileFormat::Png => "pgw",
            ImageFileFormat::Tiff => "tfw",
        }
    }
}

/// Options for persisting output rasters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeOptions {
    /// Sample type of encoded elevations.
    pub sample_type: SampleType,

    /// Byte order of raw (BIL) elevation output.
    pub byte_order: ByteOrder,

    /// Value marking cells without data.
    pub missing_data_signal: f64,

    pub units: ElevationUnit,

    pub elevation_format: ElevationFileFormat,

    pub image_format: ImageFileFormat,

    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            sample_type: SampleType::Float32,
            byte_order: ByteOrder::BigEndian,
            missing_data_signal: MISSING_DATA_SENTINEL as f64,
            units: ElevationUnit::Meters,
            elevation_format: ElevationFileFormat::GeoTiff,
            image_format: ImageFileFormat::Jpeg,
            jpeg_quality: 90,
        }
    }
}

impl EncodeOptions {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be 1-100".to_string());
        }

        if self.sample_type == SampleType::Int16
            && (self.missing_data_signal < i16::MIN as f64
                || self.missing_data_signal > i16::MAX as f64)
        {
            return Err("missing_data_signal must fit in int16 output".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ComposeOptions::default();
        assert_eq!(config.pixel_ceiling, 2048);
        assert_eq!(config.interpolation, InterpolationMethod::Nearest);
        assert!(!config.abort_on_error);
        assert!(config.validate().is_ok());

        assert_eq!(ComposeOptions::imagery().pixel_ceiling, 8192);
    }

    #[test]
    fn test_validation() {
        let mut config = ComposeOptions::default();
        config.pixel_ceiling = 0;
        assert!(config.validate().is_err());

        let mut config = ComposeOptions::default();
        config.cell_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encode_defaults() {
        let options = EncodeOptions::default();
        assert_eq!(options.sample_type, SampleType::Float32);
        assert_eq!(options.byte_order, ByteOrder::BigEndian);
        assert_eq!(options.missing_data_signal, -32768.0);
        assert_eq!(options.units, ElevationUnit::Meters);
        assert_eq!(options.elevation_format, ElevationFileFormat::GeoTiff);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_encode_validation() {
        let options = EncodeOptions {
            sample_type: SampleType::Int16,
            missing_data_signal: -1.0e9,
            ..EncodeOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_world_file_extensions() {
        assert_eq!(ImageFileFormat::Jpeg.world_file_extension(), "jgw");
        assert_eq!(ImageFileFormat::Png.world_file_extension(), "pgw");
        assert_eq!(ImageFileFormat::Tiff.world_file_extension(), "tfw");
    }
}
