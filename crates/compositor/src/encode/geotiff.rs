//! Single-band float GeoTIFF output for elevation rasters.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use sector_common::{ExportError, ExportResult};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tracing::debug;

use super::{elevation_values, RasterEncoder};
use crate::config::EncodeOptions;
use crate::types::{Georeference, OutputTile};

// GeoTIFF tag ids
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// GeoKey ids and values
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const GCS_WGS84: u16 = 4326;

/// Local wrapper so `?` works on tiff results before mapping to
/// [`ExportError::EncodingFailure`].
struct EncodeError(String);

impl From<tiff::TiffError> for EncodeError {
    fn from(e: tiff::TiffError) -> Self {
        EncodeError(e.to_string())
    }
}

impl From<EncodeError> for ExportError {
    fn from(e: EncodeError) -> Self {
        ExportError::EncodingFailure(e.0)
    }
}

/// Writes elevation rasters as `{stem}.tif`.
#[derive(Debug, Clone, Default)]
pub struct GeoTiffEncoder {
    options: EncodeOptions,
}

impl GeoTiffEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }

    /// Encode `tile` into any seekable writer.
    pub fn write_to<W: Write + Seek>(&self, tile: &OutputTile, writer: W) -> ExportResult<()> {
        let values = elevation_values(tile, &self.options)?;
        write_geotiff(
            writer,
            tile.width,
            tile.height,
            &values,
            &tile.georeference,
            self.options.missing_data_signal,
        )?;
        Ok(())
    }
}

impl RasterEncoder for GeoTiffEncoder {
    fn encode(&self, tile: &OutputTile, dir: &Path) -> ExportResult<Vec<PathBuf>> {
        let path = dir.join(format!("{}.tif", tile.file_stem));
        let file = File::create(&path).map_err(|e| {
            ExportError::EncodingFailure(format!("{}: {}", path.display(), e))
        })?;

        let mut writer = BufWriter::new(file);
        self.write_to(tile, &mut writer)?;
        writer.flush()?;
        debug!(path = %path.display(), "Wrote GeoTIFF");

        Ok(vec![path])
    }
}

fn write_geotiff<W: Write + Seek>(
    writer: W,
    width: u32,
    height: u32,
    values: &[f32],
    geo: &Georeference,
    nodata: f64,
) -> Result<(), EncodeError> {
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<Gray32Float>(width, height)?;
    write_geo_tags(image.encoder(), geo, nodata)?;
    image.write_data(values)?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    geo: &Georeference,
    nodata: f64,
) -> Result<(), EncodeError> {
    let pixel_scale = [geo.pixel_size_lon, -geo.pixel_size_lat, 0.0];
    dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), pixel_scale.as_slice())?;

    // Raster (0, 0) is tied to the top-left corner.
    let tiepoint = [0.0, 0.0, 0.0, geo.origin_lon, geo.origin_lat, 0.0];
    dir.write_tag(Tag::Unknown(MODEL_TIEPOINT), tiepoint.as_slice())?;

    #[rustfmt::skip]
    let geokeys: [u16; 16] = [
        1, 1, 0, 3,
        GT_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        GEOGRAPHIC_TYPE, 0, 1, GCS_WGS84,
    ];
    dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), geokeys.as_slice())?;

    let nodata = format!("{}", nodata);
    dir.write_tag(Tag::Unknown(GDAL_NODATA), nodata.as_str())?;

    Ok(())
}
