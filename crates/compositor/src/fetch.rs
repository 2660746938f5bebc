//! Tile fetch contract.
//!
//! Composition never talks to the network directly. It hands a
//! [`TileRequest`] to a [`TileFetcher`] and reacts to the [`FetchOutcome`]:
//! `Unavailable` tiles leave their region empty, `Fatal` outcomes abort the
//! cell being composed.

use async_trait::async_trait;
use sector_common::{ExportError, Sector, TileKey};

use crate::types::FetchedTile;

/// What kind of payload a request expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Elevation,
    Image,
}

/// One tile to fetch: its address, its extent and the pixel size to request.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub key: TileKey,
    pub sector: Sector,
    pub width: u32,
    pub height: u32,
    pub kind: PayloadKind,
}

impl TileRequest {
    pub fn new(key: TileKey, sector: Sector, width: u32, height: u32, kind: PayloadKind) -> Self {
        Self {
            key,
            sector,
            width,
            height,
            kind,
        }
    }
}

/// Result of fetching one tile.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Tile fetched and decoded.
    Ready(FetchedTile),
    /// No data for this tile (timeout, HTTP error, undecodable payload).
    Unavailable { key: TileKey, reason: String },
    /// The fetch could not be attempted at all; composition should stop.
    Fatal(ExportError),
}

impl FetchOutcome {
    pub fn unavailable(key: TileKey, reason: impl Into<String>) -> Self {
        FetchOutcome::Unavailable {
            key,
            reason: reason.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, FetchOutcome::Ready(_))
    }

    /// Convert to a `Result`, treating `Unavailable` as a tile failure.
    pub fn into_result(self) -> Result<FetchedTile, ExportError> {
        match self {
            FetchOutcome::Ready(tile) => Ok(tile),
            FetchOutcome::Unavailable { key, reason } => {
                Err(ExportError::tile_failure(key, reason))
            }
            FetchOutcome::Fatal(err) => Err(err),
        }
    }
}

/// Source of tile payloads.
///
/// Implementations own timeouts and retries; a returned outcome is final.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch and decode one tile.
    async fn fetch(&self, request: &TileRequest) -> FetchOutcome;
}

#[async_trait]
impl<T: TileFetcher + ?Sized> TileFetcher for std::sync::Arc<T> {
    async fn fetch(&self, request: &TileRequest) -> FetchOutcome {
        (**self).fetch(request).await
    }
}
