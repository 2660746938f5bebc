//! HTTP tile fetcher for WMS sources.
//!
//! Each tile is a GetMap request built from the source's request template.
//! Transport errors and retryable statuses (5xx, 408, 429) are retried with
//! exponential backoff; after the last attempt, or on any other failure, the
//! tile is reported unavailable so composition can carry on without it.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use compositor::{
    decode_bil, decode_elevation_png, decode_elevation_tiff, decode_image, FetchOutcome,
    FetchedTile, PayloadKind, TileFetcher, TileFormat, TileRequest,
};
use metrics::counter;
use reqwest::{header, Client, StatusCode};
use sector_common::ExportResult;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use wms_protocol::GetMapTemplate;

use crate::config::SourceConfig;

/// Backoff schedule for one tile.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (doubles each retry)
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub connect_timeout: Duration,
    /// Whole-request timeout, including reading the body
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a single GetMap attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("HTTP {0}")]
    Status(StatusCode),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned an exception report: {0}")]
    ServiceException(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Status(status) => is_retryable_status(*status),
            AttemptError::Transport(_) => true,
            AttemptError::ServiceException(_) => false,
        }
    }
}

/// Statuses worth another attempt: server errors, 408 and 429.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Fetches tiles of one source over HTTP.
pub struct HttpTileFetcher {
    client: Client,
    template: GetMapTemplate,
    format: TileFormat,
    missing_signal: Option<f64>,
    retry: RetryPolicy,
}

impl HttpTileFetcher {
    pub fn new(
        template: GetMapTemplate,
        format: TileFormat,
        missing_signal: Option<f64>,
        config: HttpFetcherConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            template,
            format,
            missing_signal,
            retry: config.retry,
        })
    }

    /// Build a fetcher for the layer described by `source`.
    pub fn for_source(source: &SourceConfig, config: HttpFetcherConfig) -> Result<Self> {
        let template = GetMapTemplate::new(&source.layer_params())
            .with_context(|| format!("Invalid request parameters for source {}", source.name))?;

        Self::new(template, source.tile_format()?, source.missing_signal(), config)
    }

    pub fn template(&self) -> &GetMapTemplate {
        &self.template
    }

    /// GET `url`, retrying per the policy.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let mut retry_count = 0;
        let mut delay = self.retry.initial_delay;

        loop {
            match self.attempt(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && retry_count < self.retry.max_retries => {
                    retry_count += 1;
                    warn!(
                        error = %e,
                        retry = retry_count,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Tile request failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.retry.max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }

        // WMS servers report errors as XML with a 200 status.
        let is_xml = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("xml"));

        let body = response.bytes().await?;
        if is_xml {
            let text = String::from_utf8_lossy(&body);
            return Err(AttemptError::ServiceException(text.chars().take(200).collect()));
        }

        Ok(body.to_vec())
    }

    fn decode(&self, request: &TileRequest, bytes: &[u8]) -> ExportResult<FetchedTile> {
        match (request.kind, &self.format) {
            (PayloadKind::Elevation, TileFormat::Bil { sample_type, byte_order }) => {
                let samples = decode_bil(
                    bytes,
                    request.width,
                    request.height,
                    *sample_type,
                    *byte_order,
                    self.missing_signal,
                )?;
                FetchedTile::elevation(request.key, request.sector, request.width, request.height, samples)
            }
            (PayloadKind::Elevation, TileFormat::ElevationTiff) => {
                let (width, height, samples) = decode_elevation_tiff(bytes, self.missing_signal)?;
                FetchedTile::elevation(request.key, request.sector, width, height, samples)
            }
            (PayloadKind::Elevation, TileFormat::ElevationPng { sample_type }) => {
                let (width, height, samples) =
                    decode_elevation_png(bytes, *sample_type, self.missing_signal)?;
                FetchedTile::elevation(request.key, request.sector, width, height, samples)
            }
            (PayloadKind::Elevation, TileFormat::Image) => Err(sector_common::ExportError::Decode(
                "elevation tiles cannot be read from an image format".to_string(),
            )),
            (PayloadKind::Image, _) => {
                let image = decode_image(bytes)?;
                Ok(FetchedTile::image(request.key, request.sector, image))
            }
        }
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    #[instrument(skip(self, request), fields(tile = %request.key))]
    async fn fetch(&self, request: &TileRequest) -> FetchOutcome {
        let url = self
            .template
            .tile_request(request.width, request.height, &request.sector);
        debug!(url = %url, "Fetching tile");

        let bytes = match self.fetch_bytes(&url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                counter!("export_tiles_failed_total").increment(1);
                warn!(error = %e, "Tile unavailable");
                return FetchOutcome::unavailable(request.key, e.to_string());
            }
        };

        match self.decode(request, &bytes) {
            Ok(tile) => {
                counter!("export_tiles_fetched_total").increment(1);
                FetchOutcome::Ready(tile)
            }
            Err(e) => {
                counter!("export_tiles_failed_total").increment(1);
                warn!(error = %e, bytes = bytes.len(), "Tile payload could not be decoded");
                FetchOutcome::unavailable(request.key, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_default_policy() {
        let config = HttpFetcherConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_service_exception_not_retried() {
        let err = AttemptError::ServiceException("LayerNotDefined".to_string());
        assert!(!err.is_retryable());
        assert!(AttemptError::Status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
    }
}
