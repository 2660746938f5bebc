//! HTTP fetcher against a scripted local server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compositor::{
    ByteOrder, FetchOutcome, PayloadKind, SampleType, TileFetcher, TileFormat, TileRequest,
};
use exporter::{HttpFetcherConfig, HttpTileFetcher, RetryPolicy};
use sector_common::{Sector, TileKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wms_protocol::{GetMapTemplate, LayerParams};

/// One canned response.
#[derive(Clone)]
struct Reply {
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn ok(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: "200 OK",
            content_type,
            body,
        }
    }

    fn status(status: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: b"error".to_vec(),
        }
    }
}

/// Serve `replies` in order (the last one repeats), counting requests.
async fn serve(replies: Vec<Reply>) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let reply = replies[n.min(replies.len() - 1)].clone();

            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    reply.content_type,
                    reply.body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&reply.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, hits)
}

fn fetcher(addr: SocketAddr, format: TileFormat, missing_signal: Option<f64>) -> HttpTileFetcher {
    let template = GetMapTemplate::new(&LayerParams {
        service_url: format!("http://{}/wms", addr),
        version: Some("1.3.0".to_string()),
        layer_names: "dem".to_string(),
        style_names: None,
        image_format: "application/bil16".to_string(),
        coordinate_system: None,
    })
    .unwrap();

    let config = HttpFetcherConfig {
        connect_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
    };
    HttpTileFetcher::new(template, format, missing_signal, config).unwrap()
}

fn bil16() -> TileFormat {
    TileFormat::Bil {
        sample_type: SampleType::Int16,
        byte_order: ByteOrder::LittleEndian,
    }
}

fn request(kind: PayloadKind) -> TileRequest {
    TileRequest::new(
        TileKey::new(2, 1, 3),
        Sector::new(10.0, 11.0, 20.0, 21.0),
        2,
        2,
        kind,
    )
}

fn bil_body(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[tokio::test]
async fn test_bil_tile_decoded() {
    let (addr, hits) = serve(vec![Reply::ok(
        "application/bil16",
        bil_body(&[1, 2, 3, -9999]),
    )])
    .await;

    let outcome = fetcher(addr, bil16(), Some(-9999.0))
        .fetch(&request(PayloadKind::Elevation))
        .await;

    let tile = match outcome {
        FetchOutcome::Ready(tile) => tile,
        other => panic!("expected a tile, got {other:?}"),
    };
    let samples = tile.elevation_samples().unwrap();
    assert_eq!(&samples[..3], &[1.0, 2.0, 3.0]);
    assert!(samples[3].is_nan());
    assert_eq!(tile.key, TileKey::new(2, 1, 3));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_retried() {
    let (addr, hits) = serve(vec![
        Reply::status("500 Internal Server Error"),
        Reply::status("503 Service Unavailable"),
        Reply::ok("application/bil16", bil_body(&[5, 6, 7, 8])),
    ])
    .await;

    let outcome = fetcher(addr, bil16(), None)
        .fetch(&request(PayloadKind::Elevation))
        .await;

    assert!(outcome.is_ready());
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_exhausted_is_unavailable() {
    let (addr, hits) = serve(vec![Reply::status("502 Bad Gateway")]).await;

    let outcome = fetcher(addr, bil16(), None)
        .fetch(&request(PayloadKind::Elevation))
        .await;

    match outcome {
        FetchOutcome::Unavailable { key, .. } => assert_eq!(key, TileKey::new(2, 1, 3)),
        other => panic!("expected unavailable, got {other:?}"),
    }
    // First attempt plus two retries.
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_not_found_not_retried() {
    let (addr, hits) = serve(vec![Reply::status("404 Not Found")]).await;

    let outcome = fetcher(addr, bil16(), None)
        .fetch(&request(PayloadKind::Elevation))
        .await;

    assert!(matches!(outcome, FetchOutcome::Unavailable { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_service_exception_is_unavailable() {
    let (addr, hits) = serve(vec![Reply::ok(
        "application/vnd.ogc.se_xml",
        b"<ServiceExceptionReport><ServiceException>LayerNotDefined</ServiceException></ServiceExceptionReport>".to_vec(),
    )])
    .await;

    let outcome = fetcher(addr, bil16(), None)
        .fetch(&request(PayloadKind::Elevation))
        .await;

    match outcome {
        FetchOutcome::Unavailable { reason, .. } => assert!(reason.contains("LayerNotDefined")),
        other => panic!("expected unavailable, got {other:?}"),
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_short_payload_is_unavailable() {
    let (addr, _) = serve(vec![Reply::ok("application/bil16", vec![0u8; 3])]).await;

    let outcome = fetcher(addr, bil16(), None)
        .fetch(&request(PayloadKind::Elevation))
        .await;

    assert!(matches!(outcome, FetchOutcome::Unavailable { .. }));
}

#[tokio::test]
async fn test_png_image_tile() {
    let image = image::RgbImage::from_pixel(2, 2, image::Rgb([10, 20, 30]));
    let mut png = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
        .unwrap();

    let (addr, _) = serve(vec![Reply::ok("image/png", png)]).await;

    let outcome = fetcher(addr, TileFormat::Image, None)
        .fetch(&request(PayloadKind::Image))
        .await;

    let tile = match outcome {
        FetchOutcome::Ready(tile) => tile,
        other => panic!("expected a tile, got {other:?}"),
    };
    assert_eq!(tile.pixels().unwrap().get_pixel(1, 1).0, [10, 20, 30]);
}

fn gray16(values: [u16; 4], format: image::ImageOutputFormat) -> Vec<u8> {
    let image = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_raw(2, 2, values.to_vec())
        .unwrap();
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma16(image)
        .write_to(&mut std::io::Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_png_elevation_tile_decoded() {
    let values = [1234u16, 1234, (-20i16) as u16, (-9999i16) as u16];
    let (addr, _) = serve(vec![Reply::ok(
        "image/png",
        gray16(values, image::ImageOutputFormat::Png),
    )])
    .await;

    let format = TileFormat::ElevationPng {
        sample_type: SampleType::Int16,
    };
    let outcome = fetcher(addr, format, Some(-9999.0))
        .fetch(&request(PayloadKind::Elevation))
        .await;

    let tile = match outcome {
        FetchOutcome::Ready(tile) => tile,
        other => panic!("expected a tile, got {other:?}"),
    };
    let samples = tile.elevation_samples().unwrap();
    assert_eq!(&samples[..3], &[1234.0, 1234.0, -20.0]);
    assert!(samples[3].is_nan());
}

#[tokio::test]
async fn test_tiff_elevation_tile_decoded() {
    let (addr, _) = serve(vec![Reply::ok(
        "image/tiff",
        gray16([0, 150, 3000, 8848], image::ImageOutputFormat::Tiff),
    )])
    .await;

    let outcome = fetcher(addr, TileFormat::ElevationTiff, Some(-9999.0))
        .fetch(&request(PayloadKind::Elevation))
        .await;

    let tile = match outcome {
        FetchOutcome::Ready(tile) => tile,
        other => panic!("expected a tile, got {other:?}"),
    };
    assert_eq!(tile.elevation_samples().unwrap(), &[0.0, 150.0, 3000.0, 8848.0]);
}

#[tokio::test]
async fn test_png_mime_selects_png_decoder() {
    let png = gray16([1234; 4], image::ImageOutputFormat::Png);
    let (addr, _) = serve(vec![Reply::ok("image/png", png)]).await;

    let format = TileFormat::for_elevation("image/png", SampleType::Int16, ByteOrder::LittleEndian)
        .unwrap();
    let outcome = fetcher(addr, format, None)
        .fetch(&request(PayloadKind::Elevation))
        .await;

    let tile = match outcome {
        FetchOutcome::Ready(tile) => tile,
        other => panic!("expected a tile, got {other:?}"),
    };
    assert_eq!(tile.elevation_samples().unwrap(), &[1234.0; 4]);
}
