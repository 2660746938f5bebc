//! Raw band-interleaved (BIL) elevation output with an ESRI header.

use std::path::{Path, PathBuf};

use sector_common::ExportResult;
use tracing::debug;

use super::worldfile::write_world_file;
use super::{elevation_values, RasterEncoder};
use crate::config::EncodeOptions;
use crate::decode::{ByteOrder, SampleType};
use crate::types::OutputTile;

/// Writes `{stem}.bil`, `{stem}.hdr` and `{stem}.blw`.
#[derive(Debug, Clone, Default)]
pub struct BilEncoder {
    options: EncodeOptions,
}

impl BilEncoder {
    pub fn new(options: EncodeOptions) -> Self {
        Self { options }
    }
}

/// Serialize samples with the given type and byte order.
pub fn encode_samples(values: &[f32], sample_type: SampleType, byte_order: ByteOrder) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * sample_type.bytes_per_sample());

    for &v in values {
        match (sample_type, byte_order) {
            (SampleType::Float32, ByteOrder::LittleEndian) => bytes.extend(v.to_le_bytes()),
            (SampleType::Float32, ByteOrder::BigEndian) => bytes.extend(v.to_be_bytes()),
            (SampleType::Int16, order) => {
                let s = v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                match order {
                    ByteOrder::LittleEndian => bytes.extend(s.to_le_bytes()),
                    ByteOrder::BigEndian => bytes.extend(s.to_be_bytes()),
                }
            }
        }
    }

    bytes
}

fn header_contents(tile: &OutputTile, options: &EncodeOptions) -> String {
    let geo = &tile.georeference;
    let (nbits, pixel_type) = match options.sample_type {
        SampleType::Int16 => (16, "SIGNEDINT"),
        SampleType::Float32 => (32, "FLOAT"),
    };
    let byte_order = match options.byte_order {
        ByteOrder::LittleEndian => "I",
        ByteOrder::BigEndian => "M",
    };

    // ULXMAP/ULYMAP name the centre of the top-left pixel.
    format!(
        "BYTEORDER {}\nLAYOUT BIL\nNROWS {}\nNCOLS {}\nNBANDS 1\nNBITS {}\nPIXELTYPE {}\n\
         NODATA {}\nULXMAP {:.15}\nULYMAP {:.15}\nXDIM {:.17}\nYDIM {:.17}\n",
        byte_order,
        tile.height,
        tile.width,
        nbits,
        pixel_type,
        options.missing_data_signal,
        geo.origin_lon + geo.pixel_size_lon / 2.0,
        geo.origin_lat + geo.pixel_size_lat / 2.0,
        geo.pixel_size_lon,
        -geo.pixel_size_lat,
    )
}

impl RasterEncoder for BilEncoder {
    fn encode(&self, tile: &OutputTile, dir: &Path) -> ExportResult<Vec<PathBuf>> {
        let values = elevation_values(tile, &self.options)?;

        let bil = dir.join(format!("{}.bil", tile.file_stem));
        let hdr = dir.join(format!("{}.hdr", tile.file_stem));
        let blw = dir.join(format!("{}.blw", tile.file_stem));

        std::fs::write(
            &bil,
            encode_samples(&values, self.options.sample_type, self.options.byte_order),
        )?;
        std::fs::write(&hdr, header_contents(tile, &self.options))?;
        write_world_file(&blw, &tile.georeference)?;

        debug!(path = %bil.display(), "Wrote BIL");
        Ok(vec![bil, hdr, blw])
    }
}
