//! Sector export service library.
//!
//! Loads a WMS source description, fetches its tiles over HTTP and runs
//! export jobs that write georeferenced rasters for a selected sector.

pub mod config;
pub mod fetch;
pub mod worker;

pub use config::{LayerKind, SourceConfig};
pub use fetch::{HttpFetcherConfig, HttpTileFetcher, RetryPolicy};
pub use worker::{
    run_export, spawn_export, CellReport, CellStatus, ExportHandle, ExportJob, ExportMode,
    ExportReport,
};
