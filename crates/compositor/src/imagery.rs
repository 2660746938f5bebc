//! Image composition: merging fetched image tiles into a canvas.

use futures::stream::{self, StreamExt};
use image::RgbImage;
use metrics::counter;
use rayon::prelude::*;
use sector_common::{tiles_covering, ExportError, ExportResult, LevelSet, Sector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::ComposeOptions;
use crate::fetch::{FetchOutcome, PayloadKind, TileFetcher, TileRequest};
use crate::types::FetchedTile;

/// Merge one image tile into a canvas covering `canvas_sector`.
///
/// The tile is placed with a linear map in both latitude and longitude.
/// A canvas pixel is owned by the tile containing its centre and receives
/// the area-weighted mean of the tile pixels under its footprint, so merge
/// order does not matter. Tiles outside the canvas are ignored. Returns the
/// number of canvas pixels written.
pub fn merge_tile_into_canvas(canvas_sector: &Sector, canvas: &mut RgbImage, tile: &FetchedTile) -> usize {
    let Some(source) = tile.pixels() else {
        return 0;
    };
    if canvas_sector.is_degenerate()
        || tile.sector.is_degenerate()
        || source.width() == 0
        || source.height() == 0
        || canvas_sector.intersection(&tile.sector).is_none()
    {
        return 0;
    }

    let canvas_width = canvas.width() as usize;
    let canvas_height = canvas.height() as usize;
    if canvas_width == 0 || canvas_height == 0 {
        return 0;
    }

    let px_lon = canvas_sector.delta_lon() / canvas_width as f64;
    let px_lat = canvas_sector.delta_lat() / canvas_height as f64;

    // Canvas pixel span touched by the tile.
    let x0 = (((tile.sector.min_lon - canvas_sector.min_lon) / px_lon).floor().max(0.0) as usize)
        .min(canvas_width);
    let x1 = (((tile.sector.max_lon - canvas_sector.min_lon) / px_lon).ceil().max(0.0) as usize)
        .min(canvas_width);
    let y0 = (((canvas_sector.max_lat - tile.sector.max_lat) / px_lat).floor().max(0.0) as usize)
        .min(canvas_height);
    let y1 = (((canvas_sector.max_lat - tile.sector.min_lat) / px_lat).ceil().max(0.0) as usize)
        .min(canvas_height);

    if x0 >= x1 || y0 >= y1 {
        return 0;
    }

    let src_w = source.width() as f64;
    let src_h = source.height() as f64;
    let src_px_lon = tile.sector.delta_lon() / src_w;
    let src_px_lat = tile.sector.delta_lat() / src_h;

    let row_bytes = canvas_width * 3;
    let buffer: &mut [u8] = canvas;

    buffer
        .par_chunks_mut(row_bytes)
        .enumerate()
        .skip(y0)
        .take(y1 - y0)
        .map(|(cy, row)| {
            let lat_top = canvas_sector.max_lat - cy as f64 * px_lat;
            let lat_bottom = lat_top - px_lat;
            let lat_center = lat_top - px_lat / 2.0;
            if !(lat_center <= tile.sector.max_lat && lat_center > tile.sector.min_lat) {
                return 0;
            }

            // Source rows under the clipped footprint.
            let sy0 = ((tile.sector.max_lat - lat_top.min(tile.sector.max_lat)) / src_px_lat).max(0.0);
            let sy1 = ((tile.sector.max_lat - lat_bottom.max(tile.sector.min_lat)) / src_px_lat).min(src_h);

            let mut written = 0;
            for cx in x0..x1 {
                let lon_left = canvas_sector.min_lon + cx as f64 * px_lon;
                let lon_right = lon_left + px_lon;
                let lon_center = lon_left + px_lon / 2.0;
                if !(lon_center >= tile.sector.min_lon && lon_center < tile.sector.max_lon) {
                    continue;
                }

                let sx0 = ((lon_left.max(tile.sector.min_lon) - tile.sector.min_lon) / src_px_lon).max(0.0);
                let sx1 = ((lon_right.min(tile.sector.max_lon) - tile.sector.min_lon) / src_px_lon).min(src_w);

                if let Some(rgb) = area_mean(source, sx0, sx1, sy0, sy1) {
                    row[cx * 3..cx * 3 + 3].copy_from_slice(&rgb);
                    written += 1;
                }
            }
            written
        })
        .sum()
}

/// Area-weighted mean of the source pixels covering `[sx0, sx1) x [sy0, sy1)`.
fn area_mean(source: &RgbImage, sx0: f64, sx1: f64, sy0: f64, sy1: f64) -> Option<[u8; 3]> {
    if sx1 <= sx0 || sy1 <= sy0 {
        return None;
    }

    let max_x = source.width() as usize - 1;
    let max_y = source.height() as usize - 1;
    let ix0 = (sx0.floor() as usize).min(max_x);
    let ix1 = ((sx1.ceil() as usize).max(ix0 + 1) - 1).min(max_x);
    let iy0 = (sy0.floor() as usize).min(max_y);
    let iy1 = ((sy1.ceil() as usize).max(iy0 + 1) - 1).min(max_y);

    let mut sum = [0.0f64; 3];
    let mut total = 0.0;

    for iy in iy0..=iy1 {
        let wy = (sy1.min(iy as f64 + 1.0) - sy0.max(iy as f64)).max(0.0);
        if wy == 0.0 {
            continue;
        }
        for ix in ix0..=ix1 {
            let wx = (sx1.min(ix as f64 + 1.0) - sx0.max(ix as f64)).max(0.0);
            let w = wx * wy;
            if w == 0.0 {
                continue;
            }
            let p = source.get_pixel(ix as u32, iy as u32);
            for (acc, channel) in sum.iter_mut().zip(p.0) {
                *acc += channel as f64 * w;
            }
            total += w;
        }
    }

    if total == 0.0 {
        // Footprint smaller than rounding; take the pixel it falls in.
        return Some(source.get_pixel(ix0 as u32, iy0 as u32).0);
    }

    Some(sum.map(|s| (s / total).round().clamp(0.0, 255.0) as u8))
}

/// Compose a `width x height` image of `sector` from the source pyramid.
///
/// Tiles are fetched concurrently and merged in grid order (north to south,
/// west to east). An unavailable tile leaves its region at the background
/// colour, unless `abort_on_error` is set, in which case the whole canvas
/// fails.
#[instrument(skip(fetcher, levels, options, cancel), fields(level = ?options.level))]
pub async fn compose_image<F: TileFetcher + ?Sized>(
    fetcher: &F,
    levels: &LevelSet,
    sector: &Sector,
    width: u32,
    height: u32,
    options: &ComposeOptions,
    cancel: &CancellationToken,
) -> ExportResult<RgbImage> {
    if width == 0 || height == 0 {
        return Err(ExportError::invalid(format!(
            "canvas must be at least 1x1, got {}x{}",
            width, height
        )));
    }

    let mut canvas = RgbImage::new(width, height);

    let Some(intersection) = levels.coverage().intersection(sector) else {
        warn!(sector = %sector, "Canvas lies outside source coverage");
        return Ok(canvas);
    };

    let grid = tiles_covering(&intersection, levels, options.level)?;
    if grid.is_empty() {
        warn!(sector = %sector, "No images available");
        return Ok(canvas);
    }

    let level = grid.level.clone();
    let requests: Vec<TileRequest> = grid
        .iter()
        .map(|cell| {
            TileRequest::new(
                cell.key,
                cell.sector,
                level.tile_width,
                level.tile_height,
                PayloadKind::Image,
            )
        })
        .collect();

    let mut outcomes = stream::iter(0..requests.len())
        .map(|i| {
            let request = &requests[i];
            async move {
                if cancel.is_cancelled() {
                    return FetchOutcome::Fatal(ExportError::Cancelled);
                }
                fetcher.fetch(request).await
            }
        })
        .buffered(options.tile_concurrency.max(1));

    let mut merged = 0usize;
    while let Some(outcome) = outcomes.next().await {
        match outcome {
            FetchOutcome::Ready(tile) => {
                merge_tile_into_canvas(sector, &mut canvas, &tile);
                merged += 1;
            }
            FetchOutcome::Unavailable { key, reason } => {
                counter!("export_tiles_unavailable_total").increment(1);
                if options.abort_on_error {
                    return Err(ExportError::tile_failure(key, reason));
                }
                warn!(tile = %key, reason = %reason, "Image tile unavailable, leaving region empty");
            }
            FetchOutcome::Fatal(err) => return Err(err),
        }
    }

    debug!(merged, total = requests.len(), "Composed image");
    Ok(canvas)
}
