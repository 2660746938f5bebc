//! In-memory LRU cache of fetched tiles.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use sector_common::TileKey;
use tokio::sync::Mutex;

use crate::fetch::{FetchOutcome, PayloadKind, TileFetcher, TileRequest};
use crate::types::FetchedTile;

/// Cache key: tile address, requested size and payload kind.
type CacheKey = (TileKey, u32, u32, PayloadKind);

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// A [`TileFetcher`] that remembers decoded tiles.
///
/// Only `Ready` outcomes are stored, so an unavailable tile is retried the
/// next time it is requested. Adjacent cells of a partition often share
/// edge tiles in tile mode; those are fetched once.
pub struct CachingFetcher<F> {
    inner: F,
    cache: Mutex<LruCache<CacheKey, FetchedTile>>,
    stats: Mutex<CacheStats>,
}

impl<F: TileFetcher> CachingFetcher<F> {
    /// Wrap `inner`, keeping at most `capacity` tiles (minimum 1).
    pub fn new(inner: F, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

#[async_trait]
impl<F: TileFetcher> TileFetcher for CachingFetcher<F> {
    async fn fetch(&self, request: &TileRequest) -> FetchOutcome {
        let key = (request.key, request.width, request.height, request.kind);

        if let Some(tile) = self.cache.lock().await.get(&key) {
            self.stats.lock().await.hits += 1;
            counter!("export_tile_cache_hits_total").increment(1);
            return FetchOutcome::Ready(tile.clone());
        }

        self.stats.lock().await.misses += 1;
        counter!("export_tile_cache_misses_total").increment(1);

        let outcome = self.inner.fetch(request).await;
        if let FetchOutcome::Ready(tile) = &outcome {
            let mut cache = self.cache.lock().await;
            if cache.len() >= cache.cap().get() && !cache.contains(&key) {
                self.stats.lock().await.evictions += 1;
            }
            cache.put(key, tile.clone());
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sector_common::Sector;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TileFetcher for CountingFetcher {
        async fn fetch(&self, request: &TileRequest) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return FetchOutcome::unavailable(request.key, "offline");
            }
            let samples = vec![1.0; (request.width * request.height) as usize];
            match FetchedTile::elevation(
                request.key,
                request.sector,
                request.width,
                request.height,
                samples,
            ) {
                Ok(tile) => FetchOutcome::Ready(tile),
                Err(e) => FetchOutcome::Fatal(e),
            }
        }
    }

    fn request(col: u32) -> TileRequest {
        TileRequest::new(
            TileKey::new(1, 0, col),
            Sector::new(0.0, 1.0, col as f64, col as f64 + 1.0),
            4,
            4,
            PayloadKind::Elevation,
        )
    }

    #[tokio::test]
    async fn test_repeat_fetch_hits_cache() {
        let fetcher = CachingFetcher::new(
            CountingFetcher {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            8,
        );

        assert!(fetcher.fetch(&request(0)).await.is_ready());
        assert!(fetcher.fetch(&request(0)).await.is_ready());

        assert_eq!(fetcher.inner().calls.load(Ordering::SeqCst), 1);
        let stats = fetcher.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_unavailable_not_cached() {
        let fetcher = CachingFetcher::new(
            CountingFetcher {
                calls: AtomicUsize::new(0),
                fail: true,
            },
            8,
        );

        assert!(!fetcher.fetch(&request(0)).await.is_ready());
        assert!(!fetcher.fetch(&request(0)).await.is_ready());

        assert_eq!(fetcher.inner().calls.load(Ordering::SeqCst), 2);
        assert!(fetcher.is_empty().await);
    }

    #[tokio::test]
    async fn test_eviction_at_capacity() {
        let fetcher = CachingFetcher::new(
            CountingFetcher {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            2,
        );

        for col in 0..3 {
            fetcher.fetch(&request(col)).await;
        }

        assert_eq!(fetcher.len().await, 2);
        assert_eq!(fetcher.stats().await.evictions, 1);
    }
}
