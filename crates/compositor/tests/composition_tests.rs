//! Elevation and image composition against the in-memory fetcher.

use std::sync::Arc;

use compositor::{
    compose_elevation_raster, compose_elevations, compose_image, sample_grid, CachingFetcher,
    ComposeOptions, ElevationSource, InterpolationMethod, MISSING_DATA_SENTINEL,
};
use sector_common::{ExportError, LatLon, Sector, TileKey};
use test_utils::{assert_approx_eq, plane_elevation, sectors, single_level, MemoryFetcher};
use tokio_util::sync::CancellationToken;

/// Centre tile of the 3 x 3 grid covering `sectors::three_by_three()` at 1 degree.
const CENTRE: TileKey = TileKey {
    level: 0,
    row: 78,
    col: 201,
};

#[tokio::test]
async fn test_failed_image_tile_leaves_region_empty() {
    let levels = single_level(1.0, 8);
    let fetcher = MemoryFetcher::new().with_unavailable(CENTRE);

    let image = compose_image(
        &fetcher,
        &levels,
        &sectors::three_by_three(),
        24,
        24,
        &ComposeOptions::imagery(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(fetcher.request_count(), 9);

    // 8 canvas pixels per degree; the centre tile spans pixels 8..16.
    for y in 0..24 {
        for x in 0..24 {
            let in_centre = (8..16).contains(&x) && (8..16).contains(&y);
            let expected = if in_centre { [0, 0, 0] } else { fetcher.color() };
            assert_eq!(image.get_pixel(x, y).0, expected, "pixel ({x}, {y})");
        }
    }
}

#[tokio::test]
async fn test_abort_on_error_fails_image() {
    let levels = single_level(1.0, 8);
    let fetcher = MemoryFetcher::new().with_unavailable(CENTRE);

    let options = ComposeOptions {
        abort_on_error: true,
        ..ComposeOptions::imagery()
    };
    let result = compose_image(
        &fetcher,
        &levels,
        &sectors::three_by_three(),
        24,
        24,
        &options,
        &CancellationToken::new(),
    )
    .await;

    match result {
        Err(ExportError::TileFetchFailure { key, .. }) => assert_eq!(key, CENTRE),
        other => panic!("expected tile failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_tile_mode_isolates_failed_tile() {
    let levels = single_level(1.0, 8);
    let fetcher = MemoryFetcher::new().with_unavailable(CENTRE);
    let sector = sectors::three_by_three();

    let options = ComposeOptions {
        elevation_source: ElevationSource::Tiles,
        interpolation: InterpolationMethod::Bilinear,
        ..ComposeOptions::default()
    };
    let raster = compose_elevation_raster(
        &fetcher,
        &levels,
        &sector,
        24,
        24,
        &options,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let points = sample_grid(&sector, 24, 24).unwrap();
    let centre = Sector::new(11.0, 12.0, 21.0, 22.0);

    for (point, value) in points.iter().zip(&raster) {
        let strictly_inside = point.lat > centre.min_lat
            && point.lat < centre.max_lat
            && point.lon > centre.min_lon
            && point.lon < centre.max_lon;

        if strictly_inside {
            assert_eq!(*value, MISSING_DATA_SENTINEL);
        } else {
            // Bilinear lookup on a linear surface is exact.
            assert_approx_eq!(*value, plane_elevation(point.lat, point.lon), 0.05);
        }
    }
}

#[tokio::test]
async fn test_composition_tile_matches_surface() {
    let levels = single_level(1.0, 8);
    let fetcher = MemoryFetcher::new();
    let sector = Sector::new(10.0, 11.5, 20.0, 21.5);

    let raster = compose_elevation_raster(
        &fetcher,
        &levels,
        &sector,
        12,
        12,
        &ComposeOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    // One composition request sized to the output, keyed by the north-west corner.
    let requests = fetcher.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].key, TileKey::new(0, 78, 200));
    assert_eq!((requests[0].width, requests[0].height), (12, 12));

    let points = sample_grid(&sector, 12, 12).unwrap();
    for (point, value) in points.iter().zip(&raster) {
        assert_approx_eq!(*value, plane_elevation(point.lat, point.lon), 1e-3);
    }
}

#[tokio::test]
async fn test_unavailable_composition_tile_is_all_sentinel() {
    let levels = single_level(1.0, 8);
    let fetcher = MemoryFetcher::new().offline();

    let raster = compose_elevation_raster(
        &fetcher,
        &levels,
        &Sector::new(10.0, 11.0, 20.0, 21.0),
        6,
        4,
        &ComposeOptions::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(raster.len(), 24);
    assert!(raster.iter().all(|v| *v == MISSING_DATA_SENTINEL));
}

#[tokio::test]
async fn test_compose_elevations_sparse_overwrite() {
    let levels = single_level(1.0, 8);
    let sector = Sector::new(10.0, 11.0, 20.0, 21.0);
    let points = vec![
        LatLon::new(11.0, 20.0),
        LatLon::new(11.0, 21.0),
        LatLon::new(10.0, 20.0),
        LatLon::new(10.0, 21.0),
    ];

    // Prefilled values survive when the tile is unavailable.
    let mut dest = vec![7.0; 4];
    let written = compose_elevations(
        &MemoryFetcher::new().offline(),
        &levels,
        &sector,
        &points,
        2,
        &mut dest,
        InterpolationMethod::Nearest,
    )
    .await
    .unwrap();
    assert_eq!(written, 0);
    assert_eq!(dest, vec![7.0; 4]);

    let written = compose_elevations(
        &MemoryFetcher::new(),
        &levels,
        &sector,
        &points,
        2,
        &mut dest,
        InterpolationMethod::Nearest,
    )
    .await
    .unwrap();
    assert_eq!(written, 4);
    assert_approx_eq!(dest[3], plane_elevation(10.0, 21.0), 1e-3);
}

#[tokio::test]
async fn test_compose_elevations_rejects_bad_arguments() {
    let levels = single_level(1.0, 8);
    let points = vec![LatLon::new(10.5, 20.5); 4];
    let mut short = vec![0.0; 3];

    let result = compose_elevations(
        &MemoryFetcher::new(),
        &levels,
        &Sector::new(10.0, 11.0, 20.0, 21.0),
        &points,
        2,
        &mut short,
        InterpolationMethod::Nearest,
    )
    .await;
    assert!(matches!(result, Err(ExportError::InvalidArgument(_))));

    let mut dest = vec![0.0; 4];
    let result = compose_elevations(
        &MemoryFetcher::new(),
        &levels,
        &Sector::new(10.0, 10.0, 20.0, 21.0),
        &points,
        2,
        &mut dest,
        InterpolationMethod::Nearest,
    )
    .await;
    assert!(matches!(result, Err(ExportError::InvalidArgument(_))));
}

#[tokio::test]
async fn test_cache_serves_repeated_tiles() {
    let levels = single_level(1.0, 8);
    let fetcher = Arc::new(CachingFetcher::new(MemoryFetcher::new(), 64));
    let options = ComposeOptions::imagery();
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        compose_image(
            &fetcher,
            &levels,
            &sectors::three_by_three(),
            24,
            24,
            &options,
            &cancel,
        )
        .await
        .unwrap();
    }

    assert_eq!(fetcher.inner().request_count(), 9);
    let stats = fetcher.stats().await;
    assert_eq!((stats.hits, stats.misses), (9, 9));
}
