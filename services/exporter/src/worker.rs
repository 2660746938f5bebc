//! Export worker.
//!
//! Runs one export job off the caller's task: partitions the selection,
//! composes each cell, writes it to the output directory as soon as it is
//! ready and records what happened to every cell in an [`ExportReport`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use compositor::{
    adjust_size, compose_elevations, compose_partition, plan_partition, sample_grid,
    ComposeOptions, EncodeOptions, OutputTile, PartitionCell, PayloadKind, Raster, TileFetcher,
    MISSING_DATA_SENTINEL,
};
use sector_common::{effective_level, ExportError, ExportResult, LevelSet, Sector};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// File name of the report written next to the outputs.
pub const REPORT_FILE: &str = "report.json";

/// What to export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Partitioned elevation rasters
    Elevations,
    /// Partitioned image files with world files
    Image,
    /// A single point-sampled elevation grid whose longest side has
    /// `samples` points
    Profile { samples: u32 },
}

/// A fully resolved export request.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub sector: Sector,
    pub mode: ExportMode,
    pub levels: LevelSet,
    pub compose: ComposeOptions,
    pub encode: EncodeOptions,
    pub output_dir: PathBuf,
}

/// Final state of one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CellStatus {
    Written { files: Vec<PathBuf> },
    ComposeFailed { error: String },
    EncodeFailed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CellReport {
    pub file_stem: String,
    pub row: usize,
    pub col: usize,
    pub sector: Sector,
    pub width: u32,
    pub height: u32,
    /// Elevation samples left without data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_samples: Option<usize>,
    #[serde(flatten)]
    pub status: CellStatus,
}

/// Per-cell outcome of an export job.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub sector: Sector,
    pub level: Option<u32>,
    pub num_parts: usize,
    pub cells: Vec<CellReport>,
}

impl ExportReport {
    pub fn is_success(&self) -> bool {
        self.cells
            .iter()
            .all(|c| matches!(c.status, CellStatus::Written { .. }))
    }

    pub fn written_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| matches!(c.status, CellStatus::Written { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.cells.len() - self.written_count()
    }

    /// Every file written, in cell order.
    pub fn files(&self) -> Vec<&Path> {
        self.cells
            .iter()
            .filter_map(|c| match &c.status {
                CellStatus::Written { files } => Some(files.iter().map(PathBuf::as_path)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Write the report as JSON into `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize export report")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}

/// Run `job` to completion on the current task.
///
/// Errors are reserved for failures of the job as a whole (bad options, no
/// data, unwritable output directory); per-cell failures land in the report.
#[instrument(skip(job, fetcher, cancel), fields(sector = %job.sector, mode = ?job.mode))]
pub async fn run_export<F: TileFetcher + ?Sized>(
    job: &ExportJob,
    fetcher: &F,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    job.compose
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid compose options")?;
    job.encode
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid encode options")?;

    tokio::fs::create_dir_all(&job.output_dir)
        .await
        .with_context(|| format!("Failed to create output directory: {}", job.output_dir.display()))?;

    let report = match job.mode {
        ExportMode::Elevations => export_partition(job, PayloadKind::Elevation, fetcher, cancel).await?,
        ExportMode::Image => export_partition(job, PayloadKind::Image, fetcher, cancel).await?,
        ExportMode::Profile { samples } => export_profile(job, samples, fetcher, cancel).await?,
    };

    report.write(&job.output_dir)?;

    info!(
        written = report.written_count(),
        failed = report.failed_count(),
        "Export finished"
    );
    Ok(report)
}

async fn export_partition<F: TileFetcher + ?Sized>(
    job: &ExportJob,
    kind: PayloadKind,
    fetcher: &F,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    let plan = plan_partition(&job.sector, &job.levels, job.compose.pixel_ceiling, job.compose.level)
        .context("Failed to plan export")?;

    let cells = compose_partition(
        &plan,
        kind,
        &job.levels,
        fetcher,
        &job.compose,
        cancel,
        |cell, outcome| export_cell(job, cell, outcome),
    )
    .await;

    Ok(ExportReport {
        sector: plan.sector,
        level: Some(plan.level.level_number),
        num_parts: plan.num_parts,
        cells,
    })
}

/// Write out one composed cell; the flag is set when encoding failed.
async fn export_cell(
    job: &ExportJob,
    cell: PartitionCell,
    outcome: ExportResult<OutputTile>,
) -> (CellReport, bool) {
    let mut report = CellReport {
        file_stem: cell.file_stem(),
        row: cell.row,
        col: cell.col,
        sector: cell.sector,
        width: cell.width,
        height: cell.height,
        missing_samples: None,
        status: CellStatus::Cancelled,
    };

    let tile = match outcome {
        Ok(tile) => tile,
        Err(ExportError::Cancelled) => return (report, false),
        Err(e) => {
            report.status = CellStatus::ComposeFailed {
                error: e.to_string(),
            };
            return (report, false);
        }
    };

    if tile.raster.is_elevation() {
        report.missing_samples = Some(tile.missing_count());
    }

    report.status = write_tile(tile, &job.output_dir, &job.encode).await;
    let failed = matches!(report.status, CellStatus::EncodeFailed { .. });
    (report, failed)
}

/// Encode on the blocking pool.
async fn write_tile(tile: OutputTile, dir: &Path, options: &EncodeOptions) -> CellStatus {
    let stem = tile.file_stem.clone();
    let dir = dir.to_path_buf();
    let options = options.clone();

    let result = tokio::task::spawn_blocking(move || compositor::write_output(&tile, &dir, &options)).await;

    match result {
        Ok(Ok(files)) => {
            info!(cell = %stem, files = files.len(), "Cell written");
            CellStatus::Written { files }
        }
        Ok(Err(e)) => {
            warn!(cell = %stem, error = %e, "Cell encoding failed");
            CellStatus::EncodeFailed {
                error: e.to_string(),
            }
        }
        Err(e) => {
            warn!(cell = %stem, error = %e, "Encoding task failed");
            CellStatus::EncodeFailed {
                error: e.to_string(),
            }
        }
    }
}

/// Point-sample the selection into one elevation grid.
async fn export_profile<F: TileFetcher + ?Sized>(
    job: &ExportJob,
    samples: u32,
    fetcher: &F,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    if samples == 0 {
        bail!("profile sample count must be > 0");
    }

    let (width, height) = adjust_size(&job.sector, samples);
    let points = sample_grid(&job.sector, width, height).context("Failed to build sample grid")?;
    let level = effective_level(&job.levels, None).ok().map(|l| l.level_number);

    let mut report = CellReport {
        file_stem: "profile".to_string(),
        row: 0,
        col: 0,
        sector: job.sector,
        width,
        height,
        missing_samples: None,
        status: CellStatus::Cancelled,
    };

    if !cancel.is_cancelled() {
        let mut dest = vec![MISSING_DATA_SENTINEL; points.len()];
        match compose_elevations(
            fetcher,
            &job.levels,
            &job.sector,
            &points,
            width as usize,
            &mut dest,
            job.compose.interpolation,
        )
        .await
        {
            Ok(written) => {
                info!(width, height, written, "Profile sampled");
                let tile = OutputTile::new(
                    job.sector,
                    width,
                    height,
                    report.file_stem.clone(),
                    Raster::Elevation(dest),
                );
                report.missing_samples = Some(tile.missing_count());
                report.status = write_tile(tile, &job.output_dir, &job.encode).await;
            }
            Err(e) => {
                warn!(error = %e, "Profile sampling failed");
                report.status = CellStatus::ComposeFailed {
                    error: e.to_string(),
                };
            }
        }
    }

    Ok(ExportReport {
        sector: job.sector,
        level,
        num_parts: 1,
        cells: vec![report],
    })
}

/// A running export job.
pub struct ExportHandle {
    handle: JoinHandle<Result<ExportReport>>,
    cancel: CancellationToken,
}

impl ExportHandle {
    /// Stop starting new cells and tile fetches. Cells already written stay
    /// on disk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<ExportReport> {
        self.handle.await.context("Export task panicked")?
    }
}

/// Run `job` on its own task.
pub fn spawn_export<F>(job: ExportJob, fetcher: Arc<F>) -> ExportHandle
where
    F: TileFetcher + ?Sized + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move { run_export(&job, fetcher.as_ref(), &token).await });

    ExportHandle { handle, cancel }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(stem: &str, status: CellStatus) -> CellReport {
        CellReport {
            file_stem: stem.to_string(),
            row: 0,
            col: 0,
            sector: Sector::new(0.0, 1.0, 0.0, 1.0),
            width: 4,
            height: 4,
            missing_samples: Some(0),
            status,
        }
    }

    #[test]
    fn test_report_counts() {
        let report = ExportReport {
            sector: Sector::new(0.0, 1.0, 0.0, 1.0),
            level: Some(3),
            num_parts: 2,
            cells: vec![
                cell(
                    "0_0",
                    CellStatus::Written {
                        files: vec![PathBuf::from("0_0.jpg"), PathBuf::from("0_0.jgw")],
                    },
                ),
                cell(
                    "0_1",
                    CellStatus::ComposeFailed {
                        error: "boom".to_string(),
                    },
                ),
                cell("1_0", CellStatus::Cancelled),
            ],
        };

        assert!(!report.is_success());
        assert_eq!(report.written_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.files(), vec![Path::new("0_0.jpg"), Path::new("0_0.jgw")]);
    }

    #[test]
    fn test_report_json_shape() {
        let value = serde_json::to_value(cell("0_1", CellStatus::Cancelled)).unwrap();
        assert_eq!(value["status"], "cancelled");
        assert_eq!(value["file_stem"], "0_1");

        let value = serde_json::to_value(cell(
            "0_0",
            CellStatus::EncodeFailed {
                error: "disk full".to_string(),
            },
        ))
        .unwrap();
        assert_eq!(value["status"], "encode_failed");
        assert_eq!(value["error"], "disk full");
    }
}
