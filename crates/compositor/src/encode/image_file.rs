//! Image output: one picture per cell plus a world file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use sector_common::{ExportError, ExportResult};
use tracing::debug;

use super::worldfile::write_world_file;
use super::RasterEncoder;
use crate::config::{EncodeOptions, ImageFileFormat};
use crate::types::{OutputTile, Raster};

/// Writes `{stem}.jpg` / `.png` / `.tif` and the matching world file.
#[derive(Debug, Clone, Default)]
pub struct ImageFileEncoder {
    options: EncodeOptions,
}

impl ImageFileEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }

    fn write_image(&self, image: &RgbImage, path: &Path) -> ExportResult<()> {
        let encoding_failure =
            |e: image::ImageError| ExportError::EncodingFailure(format!("{}: {}", path.display(), e));

        match self.options.image_format {
            ImageFileFormat::Jpeg => {
                let file = File::create(path)?;
                let mut writer = BufWriter::new(file);
                JpegEncoder::new_with_quality(&mut writer, self.options.jpeg_quality)
                    .encode_image(image)
                    .map_err(encoding_failure)?;
                writer.flush()?;
            }
            ImageFileFormat::Png => image
                .save_with_format(path, ImageFormat::Png)
                .map_err(encoding_failure)?,
            ImageFileFormat::Tiff => image
                .save_with_format(path, ImageFormat::Tiff)
                .map_err(encoding_failure)?,
        }

        Ok(())
    }
}

impl RasterEncoder for ImageFileEncoder {
    fn encode(&self, tile: &OutputTile, dir: &Path) -> ExportResult<Vec<PathBuf>> {
        let Raster::Image(image) = &tile.raster else {
            return Err(ExportError::invalid(format!(
                "{} holds elevations, not an image",
                tile.file_stem
            )));
        };

        let format = self.options.image_format;
        let image_path = dir.join(format!("{}.{}", tile.file_stem, format.extension()));
        let world_path = dir.join(format!(
            "{}.{}",
            tile.file_stem,
            format.world_file_extension()
        ));

        self.write_image(image, &image_path)?;
        write_world_file(&world_path, &tile.georeference)?;

        debug!(path = %image_path.display(), "Wrote image");
        Ok(vec![image_path, world_path])
    }
}
