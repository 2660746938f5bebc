//! Output partitioning: splitting a selection into bounded-size rasters.
//!
//! The selection (clipped to the source coverage) is cut into an
//! `n x n` grid of cells of equal angular size, where `n` is the smallest
//! count keeping every cell's width and height within the pixel ceiling.
//! Each cell is composed independently and becomes one [`OutputTile`].

use std::future::Future;

use futures::future;
use futures::stream::{self, StreamExt};
use metrics::counter;
use sector_common::{effective_level, ExportError, ExportResult, LevelSet, PyramidLevel, Sector, TileRange};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ComposeOptions;
use crate::elevation::compose_elevation_raster;
use crate::fetch::{PayloadKind, TileFetcher};
use crate::imagery::compose_image;
use crate::types::{OutputTile, Raster};

/// How a selection will be split.
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    /// Selection clipped to the source coverage
    pub sector: Sector,
    /// Level whose resolution sizes the output
    pub level: PyramidLevel,
    /// Pixel size of the whole selection at that level
    pub sector_width: u32,
    pub sector_height: u32,
    /// Cells per side
    pub num_parts: usize,
    /// Pixel size of every cell
    pub cell_width: u32,
    pub cell_height: u32,
}

/// One cell of a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionCell {
    /// Row index, 0 at the south edge of the selection
    pub row: usize,
    /// Column index, 0 at the west edge of the selection
    pub col: usize,
    pub sector: Sector,
    pub width: u32,
    pub height: u32,
}

impl PartitionCell {
    /// Deterministic file stem, `"{row}_{col}"`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.row, self.col)
    }
}

impl PartitionPlan {
    /// Cells in row-major order, south row first.
    pub fn cells(&self) -> Vec<PartitionCell> {
        let n = self.num_parts;
        (0..n)
            .flat_map(|row| (0..n).map(move |col| (row, col)))
            .map(|(row, col)| PartitionCell {
                row,
                col,
                sector: self.sector.subdivide(n, row, col),
                width: self.cell_width,
                height: self.cell_height,
            })
            .collect()
    }

    pub fn num_cells(&self) -> usize {
        self.num_parts * self.num_parts
    }
}

/// Compute the partition of `selected` for a source.
///
/// Fails with `NoDataAvailable` when the selection does not intersect the
/// source coverage and `InvalidArgument` for a degenerate selection or a
/// zero ceiling.
pub fn plan_partition(
    selected: &Sector,
    levels: &LevelSet,
    pixel_ceiling: u32,
    requested_level: Option<u32>,
) -> ExportResult<PartitionPlan> {
    if selected.is_degenerate() {
        return Err(ExportError::invalid(format!("degenerate sector {}", selected)));
    }
    if pixel_ceiling == 0 {
        return Err(ExportError::invalid("pixel ceiling must be > 0"));
    }

    let sector = levels.coverage().intersection(selected).ok_or_else(|| {
        ExportError::no_data(format!(
            "selection {} does not intersect source coverage {}",
            selected,
            levels.coverage()
        ))
    })?;

    let level = effective_level(levels, requested_level)?.clone();
    let range = TileRange::covering(&sector, &level)?;
    let covered = range.sector(&level);

    let native_width = range.num_cols() as f64 * level.tile_width as f64;
    let native_height = range.num_rows() as f64 * level.tile_height as f64;

    let sector_width = (sector.delta_lon() / covered.delta_lon() * native_width).round().max(1.0);
    let sector_height = (sector.delta_lat() / covered.delta_lat() * native_height).round().max(1.0);

    if sector_width > u32::MAX as f64 || sector_height > u32::MAX as f64 {
        return Err(ExportError::invalid(format!(
            "selection is {}x{} pixels at level {}; choose a coarser level",
            sector_width, sector_height, level.level_number
        )));
    }
    let sector_width = sector_width as u32;
    let sector_height = sector_height as u32;

    let max_side = sector_width.max(sector_height);
    let num_parts = max_side.div_ceil(pixel_ceiling).max(1) as usize;

    let cell_width = (sector_width / num_parts as u32).max(1);
    let cell_height = (sector_height / num_parts as u32).max(1);

    debug!(
        level = level.level_number,
        sector_width, sector_height, num_parts, cell_width, cell_height, "Planned partition"
    );

    Ok(PartitionPlan {
        sector,
        level,
        sector_width,
        sector_height,
        num_parts,
        cell_width,
        cell_height,
    })
}

/// Compose the raster of one partition cell.
#[instrument(skip(fetcher, levels, options, cancel), fields(cell = %cell.file_stem()))]
pub async fn compose_cell<F: TileFetcher + ?Sized>(
    cell: &PartitionCell,
    kind: PayloadKind,
    levels: &LevelSet,
    fetcher: &F,
    options: &ComposeOptions,
    cancel: &CancellationToken,
) -> ExportResult<OutputTile> {
    if cancel.is_cancelled() {
        return Err(ExportError::Cancelled);
    }

    let raster = match kind {
        PayloadKind::Elevation => Raster::Elevation(
            compose_elevation_raster(
                fetcher,
                levels,
                &cell.sector,
                cell.width,
                cell.height,
                options,
                cancel,
            )
            .await?,
        ),
        PayloadKind::Image => Raster::Image(
            compose_image(
                fetcher,
                levels,
                &cell.sector,
                cell.width,
                cell.height,
                options,
                cancel,
            )
            .await?,
        ),
    };

    Ok(OutputTile::new(
        cell.sector,
        cell.width,
        cell.height,
        cell.file_stem(),
        raster,
    ))
}

/// Outcome of composing one cell.
#[derive(Debug)]
pub struct CellResult {
    pub cell: PartitionCell,
    pub outcome: ExportResult<OutputTile>,
}

/// All cells of a partition, in row-major order.
#[derive(Debug)]
pub struct PartitionResult {
    pub plan: PartitionPlan,
    pub cells: Vec<CellResult>,
}

impl PartitionResult {
    /// One entry per cell; `None` marks a cell that failed.
    pub fn tiles(&self) -> Vec<Option<&OutputTile>> {
        self.cells.iter().map(|c| c.outcome.as_ref().ok()).collect()
    }

    pub fn failed(&self) -> impl Iterator<Item = &CellResult> {
        self.cells.iter().filter(|c| c.outcome.is_err())
    }

    pub fn is_complete(&self) -> bool {
        self.cells.iter().all(|c| c.outcome.is_ok())
    }
}

/// Compose every cell of `plan`, handing each outcome to `on_cell` as soon
/// as it is ready.
///
/// Up to `cell_concurrency` cells are composed at once. `on_cell` returns
/// its value for the cell and whether it failed the cell after composition.
/// With `abort_on_error`, any failure cancels the cells not yet started,
/// which reach `on_cell` as `Err(Cancelled)`. Values come back in row-major
/// order.
pub async fn compose_partition<F, H, Fut, T>(
    plan: &PartitionPlan,
    kind: PayloadKind,
    levels: &LevelSet,
    fetcher: &F,
    options: &ComposeOptions,
    cancel: &CancellationToken,
    on_cell: H,
) -> Vec<T>
where
    F: TileFetcher + ?Sized,
    H: Fn(PartitionCell, ExportResult<OutputTile>) -> Fut,
    Fut: Future<Output = (T, bool)>,
{
    info!(
        cells = plan.num_cells(),
        width = plan.cell_width,
        height = plan.cell_height,
        level = plan.level.level_number,
        "Composing partition"
    );

    let abort = cancel.child_token();

    let mut values: Vec<((usize, usize), T)> = stream::iter(plan.cells())
        .map(|cell| {
            let abort = &abort;
            let on_cell = &on_cell;
            async move {
                let position = (cell.row, cell.col);
                let outcome = compose_cell(&cell, kind, levels, fetcher, options, abort).await;

                let compose_failed = match &outcome {
                    Ok(_) => {
                        counter!("export_cells_composed_total").increment(1);
                        false
                    }
                    Err(ExportError::Cancelled) => false,
                    Err(e) => {
                        counter!("export_cells_failed_total").increment(1);
                        warn!(cell = %cell.file_stem(), error = %e, "Cell composition failed");
                        true
                    }
                };

                let (value, handler_failed) = on_cell(cell, outcome).await;
                if options.abort_on_error && (compose_failed || handler_failed) {
                    abort.cancel();
                }
                (position, value)
            }
        })
        .buffer_unordered(options.cell_concurrency)
        .collect()
        .await;

    values.sort_by_key(|(position, _)| *position);
    values.into_iter().map(|(_, value)| value).collect()
}

/// Partition `selected` and compose every cell.
///
/// A failed cell does not stop its siblings unless `abort_on_error` is
/// set, in which case cells not yet started are reported as cancelled.
#[instrument(skip(levels, fetcher, options, cancel), fields(selected = %selected))]
pub async fn partition<F: TileFetcher + ?Sized>(
    selected: &Sector,
    kind: PayloadKind,
    levels: &LevelSet,
    fetcher: &F,
    options: &ComposeOptions,
    cancel: &CancellationToken,
) -> ExportResult<PartitionResult> {
    options.validate().map_err(ExportError::InvalidArgument)?;

    let plan = plan_partition(selected, levels, options.pixel_ceiling, options.level)?;

    let cells = compose_partition(&plan, kind, levels, fetcher, options, cancel, |cell, outcome| {
        future::ready((CellResult { cell, outcome }, false))
    })
    .await;

    Ok(PartitionResult { plan, cells })
}
