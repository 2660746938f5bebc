//! Elevation composition: sampling fetched elevation tiles at arbitrary
//! points and filling destination buffers.

use futures::stream::{self, StreamExt};
use metrics::counter;
use rayon::prelude::*;
use sector_common::{
    effective_level, tile_at, tiles_covering, ExportError, ExportResult, LatLon, LevelSet, Sector,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::{ComposeOptions, ElevationSource};
use crate::fetch::{FetchOutcome, PayloadKind, TileFetcher, TileRequest};
use crate::interpolation::{grid_position, interpolate, InterpolationMethod};
use crate::types::{FetchedTile, MISSING_DATA_SENTINEL};

/// Point count above which sampling is spread over the rayon pool.
const PARALLEL_SAMPLE_THRESHOLD: usize = 16 * 1024;

/// Sample one elevation tile at each point.
///
/// Points outside the tile sector, and points whose nearest samples are
/// missing, yield `None`.
pub fn sample_elevations(
    points: &[LatLon],
    tile: &FetchedTile,
    method: InterpolationMethod,
) -> Vec<Option<f32>> {
    let Some(samples) = tile.elevation_samples() else {
        return vec![None; points.len()];
    };

    let width = tile.width as usize;
    let height = tile.height as usize;

    let lookup = |p: &LatLon| -> Option<f32> {
        let (x, y) = grid_position(&tile.sector, tile.width, tile.height, p.lat, p.lon)?;
        let value = interpolate(method, samples, width, height, x, y);
        (!value.is_nan()).then_some(value)
    };

    if points.len() >= PARALLEL_SAMPLE_THRESHOLD {
        points.par_iter().map(lookup).collect()
    } else {
        points.iter().map(lookup).collect()
    }
}

/// Write samples from `tiles` into `dest`, one slot per point.
///
/// Only slots with an available sample are written; everything else keeps
/// its previous content. Returns the number of slots written.
pub fn merge_samples(
    points: &[LatLon],
    tiles: &[FetchedTile],
    dest: &mut [f32],
    method: InterpolationMethod,
) -> usize {
    let mut written = 0;

    for tile in tiles {
        let values = sample_elevations(points, tile, method);
        for (slot, value) in dest.iter_mut().zip(values) {
            if let Some(v) = value {
                *slot = v;
                written += 1;
            }
        }
    }

    written
}

/// Fill `dest` with elevations at `points` from a single composition tile.
///
/// The points are treated as a grid `row_stride` samples wide. One tile
/// covering `sector` at the finest non-empty level, sized
/// `row_stride x points.len() / row_stride`, is fetched and sampled. Slots
/// without data are left untouched, so callers should pre-fill `dest` with
/// [`MISSING_DATA_SENTINEL`].
///
/// An unavailable tile is not an error: nothing is written and `Ok(0)` is
/// returned. Returns the number of slots written.
#[instrument(skip(fetcher, levels, points, dest), fields(points = points.len()))]
pub async fn compose_elevations<F: TileFetcher + ?Sized>(
    fetcher: &F,
    levels: &LevelSet,
    sector: &Sector,
    points: &[LatLon],
    row_stride: usize,
    dest: &mut [f32],
    method: InterpolationMethod,
) -> ExportResult<usize> {
    if sector.is_degenerate() {
        return Err(ExportError::invalid(format!("degenerate sector {}", sector)));
    }
    if dest.len() < points.len() {
        return Err(ExportError::invalid(format!(
            "destination holds {} values but {} points were given",
            dest.len(),
            points.len()
        )));
    }
    if row_stride == 0 || row_stride > points.len() {
        return Err(ExportError::invalid(format!(
            "row stride {} is not within 1..={}",
            row_stride,
            points.len()
        )));
    }

    let level = effective_level(levels, None)?;
    let width = row_stride as u32;
    let height = (points.len() / row_stride) as u32;
    let key = tile_at(level, sector.max_lat, sector.min_lon);

    let request = TileRequest::new(key, *sector, width, height, PayloadKind::Elevation);

    match fetcher.fetch(&request).await {
        FetchOutcome::Ready(tile) => {
            let written = merge_samples(points, std::slice::from_ref(&tile), dest, method);
            debug!(written, "Composed elevations");
            Ok(written)
        }
        FetchOutcome::Unavailable { key, reason } => {
            warn!(tile = %key, reason = %reason, "Elevation tile unavailable");
            Ok(0)
        }
        FetchOutcome::Fatal(err) => Err(err),
    }
}

/// Fill `dest` from the pyramid tiles covering `sector`.
///
/// Tiles are fetched concurrently. Unavailable tiles leave their points
/// untouched. Returns the number of slots written.
#[allow(clippy::too_many_arguments)]
pub async fn compose_elevations_from_tiles<F: TileFetcher + ?Sized>(
    fetcher: &F,
    levels: &LevelSet,
    sector: &Sector,
    points: &[LatLon],
    dest: &mut [f32],
    options: &ComposeOptions,
    cancel: &CancellationToken,
) -> ExportResult<usize> {
    if dest.len() < points.len() {
        return Err(ExportError::invalid(format!(
            "destination holds {} values but {} points were given",
            dest.len(),
            points.len()
        )));
    }

    let grid = tiles_covering(sector, levels, options.level)?;
    let level = grid.level.clone();

    let requests: Vec<TileRequest> = grid
        .iter()
        .map(|cell| {
            TileRequest::new(
                cell.key,
                cell.sector,
                level.tile_width,
                level.tile_height,
                PayloadKind::Elevation,
            )
        })
        .collect();

    let outcomes: Vec<FetchOutcome> = stream::iter(0..requests.len())
        .map(|i| {
            let request = &requests[i];
            async move {
                if cancel.is_cancelled() {
                    return FetchOutcome::Fatal(ExportError::Cancelled);
                }
                fetcher.fetch(request).await
            }
        })
        .buffered(options.tile_concurrency.max(1))
        .collect()
        .await;

    let mut tiles = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            FetchOutcome::Ready(tile) => tiles.push(tile),
            FetchOutcome::Unavailable { key, reason } => {
                warn!(tile = %key, reason = %reason, "Elevation tile unavailable");
                counter!("export_tiles_unavailable_total").increment(1);
            }
            FetchOutcome::Fatal(err) => return Err(err),
        }
    }

    Ok(merge_samples(points, &tiles, dest, options.interpolation))
}

/// Compose a `width x height` elevation raster for `sector`.
///
/// Rows run north to south. Cells without data hold
/// [`MISSING_DATA_SENTINEL`].
pub async fn compose_elevation_raster<F: TileFetcher + ?Sized>(
    fetcher: &F,
    levels: &LevelSet,
    sector: &Sector,
    width: u32,
    height: u32,
    options: &ComposeOptions,
    cancel: &CancellationToken,
) -> ExportResult<Vec<f32>> {
    let points = sample_grid(sector, width, height)?;
    let mut dest = vec![MISSING_DATA_SENTINEL; points.len()];

    match options.elevation_source {
        ElevationSource::Composition => {
            compose_elevations(
                fetcher,
                levels,
                sector,
                &points,
                width as usize,
                &mut dest,
                options.interpolation,
            )
            .await?;
        }
        ElevationSource::Tiles => {
            compose_elevations_from_tiles(
                fetcher, levels, sector, &points, &mut dest, options, cancel,
            )
            .await?;
        }
    }

    Ok(dest)
}

/// Raster size whose longest side is `desired` samples.
///
/// The shorter side is scaled by the ratio of the great-circle extents of
/// the sector: north-south along the west edge, east-west along the
/// centroid parallel. A zero extent keeps `desired` on both sides.
pub fn adjust_size(sector: &Sector, desired: u32) -> (u32, u32) {
    if desired == 0 {
        return (0, 0);
    }

    let centroid = sector.centroid();
    let d_lat = LatLon::new(sector.min_lat, sector.min_lon)
        .great_circle_distance(&LatLon::new(sector.max_lat, sector.min_lon));
    let d_lon = LatLon::new(centroid.lat, sector.min_lon)
        .great_circle_distance(&LatLon::new(centroid.lat, sector.max_lon));

    let max = d_lat.max(d_lon);
    let min = d_lat.min(d_lon);

    let min_size = if min == 0.0 {
        desired
    } else {
        ((desired as f64 * min / max) as u32).max(1)
    };

    if d_lon > d_lat {
        (desired, min_size)
    } else {
        (min_size, desired)
    }
}

/// Row-major sample points covering `sector`, north row first.
///
/// The first and last columns lie on the west and east edges, the first and
/// last rows on the north and south edges. A single row or column is placed
/// on the centre line.
pub fn sample_grid(sector: &Sector, width: u32, height: u32) -> ExportResult<Vec<LatLon>> {
    if width == 0 || height == 0 {
        return Err(ExportError::invalid(format!(
            "sample grid must be at least 1x1, got {}x{}",
            width, height
        )));
    }

    let centroid = sector.centroid();
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

    let mut points = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let lat = if height == 1 {
            centroid.lat
        } else if y == height - 1 {
            sector.min_lat
        } else {
            sector.max_lat - y as f64 * d_lat
        };

        for x in 0..width {
            let lon = if width == 1 {
                centroid.lon
            } else if x == width - 1 {
                sector.max_lon
            } else {
                sector.min_lon + x as f64 * d_lon
            };
            points.push(LatLon::new(lat, lon));
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sector_common::TileKey;

    fn ramp_tile(sector: Sector, width: u32, height: u32) -> FetchedTile {
        let samples = (0..width * height).map(|i| i as f32).collect();
        FetchedTile::elevation(TileKey::new(0, 0, 0), sector, width, height, samples).unwrap()
    }

    #[test]
    fn test_sample_outside_is_missing() {
        let tile = ramp_tile(Sector::new(0.0, 1.0, 0.0, 1.0), 3, 3);
        let values = sample_elevations(
            &[LatLon::new(0.5, 0.5), LatLon::new(2.0, 0.5)],
            &tile,
            InterpolationMethod::Nearest,
        );
        assert_eq!(values, vec![Some(4.0), None]);
    }

    #[test]
    fn test_sample_corners() {
        let tile = ramp_tile(Sector::new(0.0, 1.0, 0.0, 1.0), 3, 3);
        let values = sample_elevations(
            &[
                LatLon::new(1.0, 0.0),
                LatLon::new(1.0, 1.0),
                LatLon::new(0.0, 0.0),
                LatLon::new(0.0, 1.0),
            ],
            &tile,
            InterpolationMethod::Nearest,
        );
        assert_eq!(values, vec![Some(0.0), Some(2.0), Some(6.0), Some(8.0)]);
    }

    #[test]
    fn test_missing_samples_not_written() {
        let mut tile = ramp_tile(Sector::new(0.0, 1.0, 0.0, 1.0), 2, 2);
        if let crate::types::TilePayload::Elevation(samples) = &mut tile.payload {
            samples[0] = f32::NAN;
        }

        let points = [LatLon::new(1.0, 0.0), LatLon::new(1.0, 1.0)];
        let mut dest = [MISSING_DATA_SENTINEL; 2];
        let written = merge_samples(&points, &[tile], &mut dest, InterpolationMethod::Nearest);

        assert_eq!(written, 1);
        assert_eq!(dest, [MISSING_DATA_SENTINEL, 1.0]);
    }

    #[test]
    fn test_sample_grid_north_first_with_snapped_edges() {
        let sector = Sector::new(10.0, 20.0, 30.0, 33.0);
        let points = sample_grid(&sector, 4, 3).unwrap();

        assert_eq!(points.len(), 12);
        assert_eq!(points[0], LatLon::new(20.0, 30.0));
        assert_eq!(points[3], LatLon::new(20.0, 33.0));
        assert_eq!(points[4].lat, 15.0);
        assert_eq!(points[11], LatLon::new(10.0, 33.0));
    }

    #[test]
    fn test_sample_grid_rejects_empty() {
        let sector = Sector::new(10.0, 20.0, 30.0, 33.0);
        assert!(matches!(
            sample_grid(&sector, 0, 3),
            Err(ExportError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_adjust_size_wide_sector() {
        // Twice as wide as tall at the equator.
        let (w, h) = adjust_size(&Sector::new(-1.0, 1.0, -2.0, 2.0), 512);
        assert_eq!(w, 512);
        assert!((255..=256).contains(&h), "height {}", h);
    }

    #[test]
    fn test_adjust_size_tall_sector() {
        let (w, h) = adjust_size(&Sector::new(0.0, 4.0, 0.0, 1.0), 512);
        assert_eq!(h, 512);
        assert!((127..=128).contains(&w), "width {}", w);
    }

    #[test]
    fn test_adjust_size_zero_extent() {
        assert_eq!(adjust_size(&Sector::new(0.0, 0.0, 0.0, 1.0), 512), (512, 512));
    }
}
