//! Common test fixtures: pyramid sources and an in-memory tile fetcher.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use compositor::{FetchOutcome, PayloadKind, TileFetcher, TileRequest};
use sector_common::{ExportError, LevelSet, Sector, TileKey};

use crate::generators::{create_elevation_tile, create_image_tile};

/// Common sectors for testing.
pub mod sectors {
    use sector_common::Sector;

    /// 0.05 x 0.05 degrees over San Francisco, aligned to 0.025 degree tiles
    pub fn bay() -> Sector {
        Sector::new(37.75, 37.80, -122.45, -122.40)
    }

    /// 3 x 3 tiles of a 1 degree level, south-west corner at (10, 20)
    pub fn three_by_three() -> Sector {
        Sector::new(10.0, 13.0, 20.0, 23.0)
    }
}

/// A single-level source of `tile_size` px tiles, `delta` degrees on a side.
pub fn single_level(delta: f64, tile_size: u32) -> LevelSet {
    LevelSet::quad_tree(
        delta,
        delta,
        tile_size,
        tile_size,
        1,
        0,
        (90.0, -180.0),
        Sector::full_sphere(),
        "single",
    )
}

/// In-memory [`TileFetcher`] producing synthetic tiles.
///
/// Elevation requests are answered with samples of
/// [`plane_elevation`](crate::plane_elevation); image requests with a solid
/// colour. Individual keys can be scripted to come back unavailable or
/// fatal, and every request is recorded.
pub struct MemoryFetcher {
    color: [u8; 3],
    unavailable: HashSet<TileKey>,
    fatal: HashSet<TileKey>,
    unavailable_all: bool,
    delay: Option<Duration>,
    requests: Mutex<Vec<TileRequest>>,
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self {
            color: [200, 100, 50],
            unavailable: HashSet::new(),
            fatal: HashSet::new(),
            unavailable_all: false,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_unavailable(mut self, key: TileKey) -> Self {
        self.unavailable.insert(key);
        self
    }

    pub fn with_fatal(mut self, key: TileKey) -> Self {
        self.fatal.insert(key);
        self
    }

    /// Every request comes back unavailable.
    pub fn offline(mut self) -> Self {
        self.unavailable_all = true;
        self
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    /// Requests seen so far, in arrival order.
    pub fn requests(&self) -> Vec<TileRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl TileFetcher for MemoryFetcher {
    async fn fetch(&self, request: &TileRequest) -> FetchOutcome {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.fatal.contains(&request.key) {
            return FetchOutcome::Fatal(ExportError::invalid(format!(
                "scripted fatal failure for {}",
                request.key
            )));
        }
        if self.unavailable_all || self.unavailable.contains(&request.key) {
            return FetchOutcome::unavailable(request.key, "scripted unavailable tile");
        }

        let tile = match request.kind {
            PayloadKind::Elevation => {
                create_elevation_tile(request.key, request.sector, request.width, request.height)
            }
            PayloadKind::Image => create_image_tile(
                request.key,
                request.sector,
                request.width,
                request.height,
                self.color,
            ),
        };
        FetchOutcome::Ready(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: TileKey, kind: PayloadKind) -> TileRequest {
        TileRequest::new(key, Sector::new(0.0, 1.0, 0.0, 1.0), 4, 4, kind)
    }

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let bad = TileKey::new(1, 2, 3);
        let worse = TileKey::new(1, 2, 4);
        let fetcher = MemoryFetcher::new().with_unavailable(bad).with_fatal(worse);

        assert!(fetcher
            .fetch(&request(TileKey::new(1, 0, 0), PayloadKind::Elevation))
            .await
            .is_ready());
        assert!(matches!(
            fetcher.fetch(&request(bad, PayloadKind::Image)).await,
            FetchOutcome::Unavailable { .. }
        ));
        assert!(matches!(
            fetcher.fetch(&request(worse, PayloadKind::Image)).await,
            FetchOutcome::Fatal(_)
        ));
        assert_eq!(fetcher.request_count(), 3);
    }
}
