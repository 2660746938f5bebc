//! Decoding of fetched tile bytes into tile payloads.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use sector_common::{ExportError, ExportResult};
use tiff::decoder::{Decoder, DecodingResult};

/// Scalar type of raw elevation samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    #[default]
    Int16,
    Float32,
}

impl SampleType {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::Int16 => 2,
            SampleType::Float32 => 4,
        }
    }
}

/// Byte order of raw elevation samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// How the bytes of a tile are laid out.
#[derive(Debug, Clone, PartialEq)]
pub enum TileFormat {
    /// Raw band-interleaved samples, no header.
    Bil {
        sample_type: SampleType,
        byte_order: ByteOrder,
    },
    /// Single-band TIFF holding elevation samples.
    ElevationTiff,
    /// 8 or 16-bit grayscale PNG holding elevation samples.
    ElevationPng {
        sample_type: SampleType,
    },
    /// PNG, JPEG, TIFF or anything else the `image` crate can read.
    Image,
}

impl TileFormat {
    /// Pick the decoder for an elevation MIME type.
    ///
    /// `bil32` always means float32 and `bil16` int16; plain `bil` uses the
    /// configured sample type. PNG samples are read as int16 when the
    /// configured type is int16. Any other MIME type is rejected with
    /// `InvalidArgument`.
    pub fn for_elevation(
        mime: &str,
        sample_type: SampleType,
        byte_order: ByteOrder,
    ) -> ExportResult<Self> {
        let mime = mime.to_lowercase();
        let format = if mime.contains("bil32") {
            TileFormat::Bil {
                sample_type: SampleType::Float32,
                byte_order,
            }
        } else if mime.contains("bil16") {
            TileFormat::Bil {
                sample_type: SampleType::Int16,
                byte_order,
            }
        } else if mime.contains("bil") {
            TileFormat::Bil {
                sample_type,
                byte_order,
            }
        } else if mime.contains("tif") {
            TileFormat::ElevationTiff
        } else if mime.contains("png") {
            TileFormat::ElevationPng { sample_type }
        } else {
            return Err(ExportError::invalid(format!(
                "unsupported elevation format: {}",
                mime
            )));
        };
        Ok(format)
    }
}

/// Decode raw BIL samples into elevations.
///
/// Samples equal to `missing_signal` become NaN.
pub fn decode_bil(
    bytes: &[u8],
    width: u32,
    height: u32,
    sample_type: SampleType,
    byte_order: ByteOrder,
    missing_signal: Option<f64>,
) -> ExportResult<Vec<f32>> {
    let count = width as usize * height as usize;
    let expected = count * sample_type.bytes_per_sample();
    if bytes.len() < expected {
        return Err(ExportError::Decode(format!(
            "BIL payload has {} bytes, expected {} for {}x{} {:?}",
            bytes.len(),
            expected,
            width,
            height,
            sample_type
        )));
    }

    let samples: Vec<f32> = match sample_type {
        SampleType::Int16 => bytes[..expected]
            .chunks_exact(2)
            .map(|b| {
                let raw = [b[0], b[1]];
                let v = match byte_order {
                    ByteOrder::LittleEndian => i16::from_le_bytes(raw),
                    ByteOrder::BigEndian => i16::from_be_bytes(raw),
                };
                v as f32
            })
            .collect(),
        SampleType::Float32 => bytes[..expected]
            .chunks_exact(4)
            .map(|b| {
                let raw = [b[0], b[1], b[2], b[3]];
                match byte_order {
                    ByteOrder::LittleEndian => f32::from_le_bytes(raw),
                    ByteOrder::BigEndian => f32::from_be_bytes(raw),
                }
            })
            .collect(),
    };

    Ok(mask_missing(samples, missing_signal))
}

/// Decode a single-band TIFF into elevations, returning `(width, height, samples)`.
pub fn decode_elevation_tiff(
    bytes: &[u8],
    missing_signal: Option<f64>,
) -> ExportResult<(u32, u32, Vec<f32>)> {
    let mut decoder =
        Decoder::new(Cursor::new(bytes)).map_err(|e| ExportError::Decode(e.to_string()))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| ExportError::Decode(e.to_string()))?;

    let samples: Vec<f32> = match decoder
        .read_image()
        .map_err(|e| ExportError::Decode(e.to_string()))?
    {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    };

    if samples.len() != width as usize * height as usize {
        return Err(ExportError::Decode(format!(
            "TIFF has {} samples for {}x{}; only single-band elevation is supported",
            samples.len(),
            width,
            height
        )));
    }

    Ok((width, height, mask_missing(samples, missing_signal)))
}

/// Decode a grayscale PNG into elevations, returning `(width, height, samples)`.
///
/// 16-bit samples are two's complement when `sample_type` is int16 and
/// unsigned otherwise. 8-bit samples are widened as they are.
pub fn decode_elevation_png(
    bytes: &[u8],
    sample_type: SampleType,
    missing_signal: Option<f64>,
) -> ExportResult<(u32, u32, Vec<f32>)> {
    let decoded = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map_err(|e| ExportError::Decode(e.to_string()))?;
    let (width, height) = (decoded.width(), decoded.height());

    let samples: Vec<f32> = match decoded {
        image::DynamicImage::ImageLuma16(buf) => match sample_type {
            SampleType::Int16 => buf.into_raw().into_iter().map(|v| v as i16 as f32).collect(),
            SampleType::Float32 => buf.into_raw().into_iter().map(|v| v as f32).collect(),
        },
        image::DynamicImage::ImageLuma8(buf) => {
            buf.into_raw().into_iter().map(|v| v as f32).collect()
        }
        other => {
            return Err(ExportError::Decode(format!(
                "PNG elevation tile has color type {:?}; only grayscale is supported",
                other.color()
            )))
        }
    };

    Ok((width, height, mask_missing(samples, missing_signal)))
}

/// Decode an image tile to RGB.
pub fn decode_image(bytes: &[u8]) -> ExportResult<image::RgbImage> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| ExportError::Decode(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

fn mask_missing(mut samples: Vec<f32>, missing_signal: Option<f64>) -> Vec<f32> {
    if let Some(signal) = missing_signal {
        let signal = signal as f32;
        for v in samples.iter_mut().filter(|v| **v == signal) {
            *v = f32::NAN;
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bil16_little_endian() {
        let bytes: Vec<u8> = [100i16, -5, -9999, 32767]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let samples = decode_bil(
            &bytes,
            2,
            2,
            SampleType::Int16,
            ByteOrder::LittleEndian,
            Some(-9999.0),
        )
        .unwrap();

        assert_eq!(samples[0], 100.0);
        assert_eq!(samples[1], -5.0);
        assert!(samples[2].is_nan());
        assert_eq!(samples[3], 32767.0);
    }

    #[test]
    fn test_decode_bil32_big_endian() {
        let bytes: Vec<u8> = [1.5f32, -2.25]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();

        let samples =
            decode_bil(&bytes, 2, 1, SampleType::Float32, ByteOrder::BigEndian, None).unwrap();
        assert_eq!(samples, vec![1.5, -2.25]);
    }

    #[test]
    fn test_decode_bil_short_payload() {
        let result = decode_bil(&[0u8; 6], 2, 2, SampleType::Int16, ByteOrder::LittleEndian, None);
        assert!(matches!(result, Err(ExportError::Decode(_))));
    }

    #[test]
    fn test_format_for_elevation() {
        assert_eq!(
            TileFormat::for_elevation("application/bil32", SampleType::Int16, ByteOrder::BigEndian)
                .unwrap(),
            TileFormat::Bil {
                sample_type: SampleType::Float32,
                byte_order: ByteOrder::BigEndian
            }
        );
        assert_eq!(
            TileFormat::for_elevation("image/bil", SampleType::Float32, ByteOrder::LittleEndian)
                .unwrap(),
            TileFormat::Bil {
                sample_type: SampleType::Float32,
                byte_order: ByteOrder::LittleEndian
            }
        );
        assert_eq!(
            TileFormat::for_elevation("image/tiff", SampleType::Int16, ByteOrder::LittleEndian)
                .unwrap(),
            TileFormat::ElevationTiff
        );
        assert_eq!(
            TileFormat::for_elevation("image/png", SampleType::Int16, ByteOrder::LittleEndian)
                .unwrap(),
            TileFormat::ElevationPng {
                sample_type: SampleType::Int16
            }
        );
    }

    #[test]
    fn test_format_for_unknown_elevation_mime() {
        let result =
            TileFormat::for_elevation("image/jpeg", SampleType::Int16, ByteOrder::LittleEndian);
        assert!(matches!(result, Err(ExportError::InvalidArgument(_))));
    }

    fn gray16_png(width: u32, height: u32, value: u16) -> Vec<u8> {
        let img = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_pixel(
            width,
            height,
            image::Luma([value]),
        );
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma16(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_elevation_png16() {
        let bytes = gray16_png(4, 4, 1234);

        let (width, height, samples) =
            decode_elevation_png(&bytes, SampleType::Int16, None).unwrap();
        assert_eq!((width, height), (4, 4));
        assert_eq!(samples, vec![1234.0; 16]);
    }

    #[test]
    fn test_decode_elevation_png16_signed_and_missing() {
        // -100 and -9999 stored as two's complement.
        let below_sea = gray16_png(2, 1, (-100i16) as u16);
        let (_, _, samples) = decode_elevation_png(&below_sea, SampleType::Int16, None).unwrap();
        assert_eq!(samples, vec![-100.0, -100.0]);

        let missing = gray16_png(2, 1, (-9999i16) as u16);
        let (_, _, samples) =
            decode_elevation_png(&missing, SampleType::Int16, Some(-9999.0)).unwrap();
        assert!(samples.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_decode_elevation_png_rejects_color() {
        let img = image::RgbImage::new(2, 2);
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let result = decode_elevation_png(&bytes, SampleType::Int16, None);
        assert!(matches!(result, Err(ExportError::Decode(_))));
    }

    #[test]
    fn test_decode_image_png() {
        let mut img = image::RgbImage::new(3, 2);
        img.put_pixel(1, 1, image::Rgb([10, 20, 30]));

        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(1, 1), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_image_garbage() {
        assert!(matches!(decode_image(b"not an image"), Err(ExportError::Decode(_))));
    }
}
