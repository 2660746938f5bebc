//! Error types for sector export.

use thiserror::Error;

use crate::tile::TileKey;

/// Result type alias using ExportError.
pub type ExportResult<T> = Result<T, ExportError>;

/// Primary error type for composition and export.
#[derive(Debug, Error)]
pub enum ExportError {
    // === Request Errors ===
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No data available: {0}")]
    NoDataAvailable(String),

    // === Tile Errors ===
    #[error("Failed to fetch tile {key}: {reason}")]
    TileFetchFailure { key: TileKey, reason: String },

    #[error("Failed to decode tile payload: {0}")]
    Decode(String),

    // === Output Errors ===
    #[error("Encoding failed: {0}")]
    EncodingFailure(String),

    // === Control ===
    #[error("Export cancelled")]
    Cancelled,
}

impl ExportError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ExportError::InvalidArgument(message.into())
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        ExportError::NoDataAvailable(message.into())
    }

    pub fn tile_failure(key: TileKey, reason: impl Into<String>) -> Self {
        ExportError::TileFetchFailure {
            key,
            reason: reason.into(),
        }
    }

    /// Short machine-readable label, used for log fields and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::InvalidArgument(_) => "invalid_argument",
            ExportError::NoDataAvailable(_) => "no_data",
            ExportError::TileFetchFailure { .. } => "tile_fetch",
            ExportError::Decode(_) => "decode",
            ExportError::EncodingFailure(_) => "encoding",
            ExportError::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::EncodingFailure(err.to_string())
    }
}

impl From<crate::sector::SectorParseError> for ExportError {
    fn from(err: crate::sector::SectorParseError) -> Self {
        ExportError::InvalidArgument(err.to_string())
    }
}
