//! Core types for tile composition.

use image::RgbImage;
use sector_common::{ExportError, ExportResult, Sector, TileKey};

/// Value written into output elevation rasters where no sample is available.
pub const MISSING_DATA_SENTINEL: f32 = i16::MIN as f32;

/// Pixel data carried by a fetched tile.
#[derive(Debug, Clone)]
pub enum TilePayload {
    /// Elevation samples, row-major, north to south. Missing samples are NaN.
    Elevation(Vec<f32>),
    /// Decoded RGB pixels, top row first.
    Image(RgbImage),
}

/// A tile whose payload has been fetched and decoded.
///
/// Owned by the compositor that requested it and dropped once the cell it
/// belongs to has been composed.
#[derive(Debug, Clone)]
pub struct FetchedTile {
    pub key: TileKey,
    pub sector: Sector,
    pub width: u32,
    pub height: u32,
    pub payload: TilePayload,
}

impl FetchedTile {
    /// Create an elevation tile, checking the sample count.
    pub fn elevation(
        key: TileKey,
        sector: Sector,
        width: u32,
        height: u32,
        samples: Vec<f32>,
    ) -> ExportResult<Self> {
        let expected = width as usize * height as usize;
        if samples.len() != expected {
            return Err(ExportError::Decode(format!(
                "tile {} has {} samples, expected {}x{}",
                key,
                samples.len(),
                width,
                height
            )));
        }

        Ok(Self {
            key,
            sector,
            width,
            height,
            payload: TilePayload::Elevation(samples),
        })
    }

    /// Create an image tile; the dimensions come from the image itself.
    pub fn image(key: TileKey, sector: Sector, image: RgbImage) -> Self {
        Self {
            key,
            sector,
            width: image.width(),
            height: image.height(),
            payload: TilePayload::Image(image),
        }
    }

    pub fn elevation_samples(&self) -> Option<&[f32]> {
        match &self.payload {
            TilePayload::Elevation(samples) => Some(samples),
            TilePayload::Image(_) => None,
        }
    }

    pub fn pixels(&self) -> Option<&RgbImage> {
        match &self.payload {
            TilePayload::Image(image) => Some(image),
            TilePayload::Elevation(_) => None,
        }
    }
}

/// Pixel data of a composed output raster.
#[derive(Debug, Clone)]
pub enum Raster {
    /// Elevations, row-major, top row first. Missing cells hold
    /// [`MISSING_DATA_SENTINEL`].
    Elevation(Vec<f32>),
    /// RGB pixels, top row first.
    Image(RgbImage),
}

impl Raster {
    pub fn is_elevation(&self) -> bool {
        matches!(self, Raster::Elevation(_))
    }
}

/// Placement of a raster on the map, in world-file terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georeference {
    /// Degrees of longitude per pixel column (positive)
    pub pixel_size_lon: f64,
    /// Degrees of latitude per pixel row (negative: rows run north to south)
    pub pixel_size_lat: f64,
    /// Longitude of the top-left corner
    pub origin_lon: f64,
    /// Latitude of the top-left corner
    pub origin_lat: f64,
}

impl Georeference {
    /// Georeference for a `width x height` raster exactly covering `sector`.
    pub fn for_sector(sector: &Sector, width: u32, height: u32) -> Self {
        Self {
            pixel_size_lon: sector.delta_lon() / width.max(1) as f64,
            pixel_size_lat: -(sector.delta_lat() / height.max(1) as f64),
            origin_lon: sector.min_lon,
            origin_lat: sector.max_lat,
        }
    }
}

/// One composed raster, ready to be persisted.
#[derive(Debug, Clone)]
pub struct OutputTile {
    pub sector: Sector,
    pub width: u32,
    pub height: u32,
    /// Deterministic name derived from the partition cell, without extension
    pub file_stem: String,
    pub raster: Raster,
    pub georeference: Georeference,
}

impl OutputTile {
    pub fn new(sector: Sector, width: u32, height: u32, file_stem: String, raster: Raster) -> Self {
        Self {
            sector,
            width,
            height,
            file_stem,
            georeference: Georeference::for_sector(&sector, width, height),
            raster,
        }
    }

    /// Number of elevation cells still holding the missing-data sentinel.
    pub fn missing_count(&self) -> usize {
        match &self.raster {
            Raster::Elevation(values) => values
                .iter()
                .filter(|v| **v == MISSING_DATA_SENTINEL)
                .count(),
            Raster::Image(_) => 0,
        }
    }
}
