//! Synthetic tile payloads with predictable values.
//!
//! Elevation tiles sample an analytic surface, so a test can compute the
//! value expected at any point without knowing which tile supplied it.

use compositor::FetchedTile;
use image::{Rgb, RgbImage};
use sector_common::{Sector, TileKey};

/// Analytic elevation surface used by the synthetic tiles: `100 * lat + lon`.
pub fn plane_elevation(lat: f64, lon: f64) -> f32 {
    (100.0 * lat + lon) as f32
}

/// Samples of [`plane_elevation`] on a grid-point registered
/// `width x height` grid over `sector`, north row first.
pub fn create_plane_samples(sector: &Sector, width: u32, height: u32) -> Vec<f32> {
    let d_lat = if height > 1 {
        sector.delta_lat() / (height - 1) as f64
    } else {
        0.0
    };
    let d_lon = if width > 1 {
        sector.delta_lon() / (width - 1) as f64
    } else {
        0.0
    };

    let mut data = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let lat = sector.max_lat - y as f64 * d_lat;
        for x in 0..width {
            let lon = sector.min_lon + x as f64 * d_lon;
            data.push(plane_elevation(lat, lon));
        }
    }
    data
}

/// An elevation tile sampling [`plane_elevation`].
pub fn create_elevation_tile(key: TileKey, sector: Sector, width: u32, height: u32) -> FetchedTile {
    let samples = create_plane_samples(&sector, width, height);
    FetchedTile::elevation(key, sector, width, height, samples)
        .expect("plane samples match tile size")
}

/// A solid-colour image tile.
pub fn create_image_tile(key: TileKey, sector: Sector, width: u32, height: u32, color: [u8; 3]) -> FetchedTile {
    FetchedTile::image(key, sector, RgbImage::from_pixel(width, height, Rgb(color)))
}
