//! Persisting output rasters.
//!
//! Elevation tiles go to a float GeoTIFF (or raw BIL) and image tiles to a
//! picture file. Every format carries a georeference: GeoTIFF tags or an
//! ESRI world file next to the raster. Rows are always written top row
//! first.

mod bil;
mod geotiff;
mod image_file;
mod worldfile;

use std::path::{Path, PathBuf};

use sector_common::{ExportError, ExportResult};

use crate::config::{ElevationFileFormat, EncodeOptions};
use crate::types::{OutputTile, Raster, MISSING_DATA_SENTINEL};

pub use bil::{encode_samples, BilEncoder};
pub use geotiff::GeoTiffEncoder;
pub use image_file::ImageFileEncoder;
pub use worldfile::{world_file_contents, write_world_file};

/// Writes one output tile into a directory.
pub trait RasterEncoder: Send + Sync {
    /// Persist `tile` under `dir`, returning every file written.
    fn encode(&self, tile: &OutputTile, dir: &Path) -> ExportResult<Vec<PathBuf>>;
}

/// Pick the encoder for a tile's raster kind.
pub fn encoder_for(raster: &Raster, options: &EncodeOptions) -> Box<dyn RasterEncoder> {
    match raster {
        Raster::Elevation(_) => match options.elevation_format {
            ElevationFileFormat::GeoTiff => Box::new(GeoTiffEncoder::new(options.clone())),
            ElevationFileFormat::Bil => Box::new(BilEncoder::new(options.clone())),
        },
        Raster::Image(_) => Box::new(ImageFileEncoder::new(options.clone())),
    }
}

/// Persist `tile` with the encoder matching its raster.
pub fn write_output(
    tile: &OutputTile,
    dir: &Path,
    options: &EncodeOptions,
) -> ExportResult<Vec<PathBuf>> {
    options.validate().map_err(ExportError::InvalidArgument)?;
    encoder_for(&tile.raster, options).encode(tile, dir)
}

/// Elevation samples ready to encode: unit-scaled, with the sentinel
/// replaced by the configured missing-data signal.
pub(crate) fn elevation_values(tile: &OutputTile, options: &EncodeOptions) -> ExportResult<Vec<f32>> {
    let Raster::Elevation(values) = &tile.raster else {
        return Err(ExportError::invalid(format!(
            "{} holds an image, not elevations",
            tile.file_stem
        )));
    };

    let expected = tile.width as usize * tile.height as usize;
    if values.len() != expected {
        return Err(ExportError::EncodingFailure(format!(
            "{} has {} samples, expected {}x{}",
            tile.file_stem,
            values.len(),
            tile.width,
            tile.height
        )));
    }

    let scale = options.units.scale_from_meters();
    let signal = options.missing_data_signal as f32;

    Ok(values
        .iter()
        .map(|&v| {
            if v == MISSING_DATA_SENTINEL {
                signal
            } else {
                v * scale
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElevationUnit;
    use sector_common::Sector;

    fn elevation_tile(values: Vec<f32>) -> OutputTile {
        OutputTile::new(
            Sector::new(0.0, 1.0, 0.0, 1.0),
            values.len() as u32,
            1,
            "0_0".to_string(),
            Raster::Elevation(values),
        )
    }

    #[test]
    fn test_sentinel_mapped_to_signal() {
        let options = EncodeOptions {
            missing_data_signal: -9999.0,
            units: ElevationUnit::Feet,
            ..EncodeOptions::default()
        };
        let values =
            elevation_values(&elevation_tile(vec![100.0, MISSING_DATA_SENTINEL]), &options).unwrap();

        assert!((values[0] - 328.084).abs() < 1e-3);
        assert_eq!(values[1], -9999.0);
    }

    #[test]
    fn test_write_output_picks_format() {
        let dir = tempfile::tempdir().unwrap();
        let tile = elevation_tile(vec![1.0, 2.0]);

        let tif = write_output(&tile, dir.path(), &EncodeOptions::default()).unwrap();
        assert_eq!(tif, vec![dir.path().join("0_0.tif")]);

        let options = EncodeOptions {
            elevation_format: ElevationFileFormat::Bil,
            ..EncodeOptions::default()
        };
        let bil = write_output(&tile, dir.path(), &options).unwrap();
        assert_eq!(bil[0], dir.path().join("0_0.bil"));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = EncodeOptions {
            jpeg_quality: 0,
            ..EncodeOptions::default()
        };
        let result = write_output(&elevation_tile(vec![1.0]), dir.path(), &options);
        assert!(matches!(result, Err(ExportError::InvalidArgument(_))));
    }
}
