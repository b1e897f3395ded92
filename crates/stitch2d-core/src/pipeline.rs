//! Row-major stitching driver.
//!
//! Grid construction and per-zone detrending are independent per zone and
//! may run in parallel (feature `rayon`). Stitching and accumulation are
//! strictly sequential: each zone is aligned to the most recently stitched
//! zone of its row, or to the first zone of the previous row.

use std::fmt;

use crate::accumulate::{zone_increments, Placement};
use crate::stitch::{stitch_zone, StitchCorrection, StitchDirection, StitchMasters};
use crate::{
    build_zone_grid, finalize, process_single_zone, FinalCalibration, GridAccumulator, GridLayout,
    RawMeasurement, SlopeModel, StitchError, ZoneConfig, ZoneGrid, ZoneMetadata, ZoneSpread,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Zone layout of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchPlan {
    pub rows: usize,
    pub cols: usize,
    /// Full travel `[min, max]` of the scan axis, pre-sizing the grid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_ax1: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_ax2: Option<[f64; 2]>,
}

impl StitchPlan {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            travel_ax1: None,
            travel_ax2: None,
        }
    }

    pub fn with_travel(mut self, ax1: [f64; 2], ax2: [f64; 2]) -> Self {
        self.travel_ax1 = Some(ax1);
        self.travel_ax2 = Some(ax2);
        self
    }

    pub fn zone_count(&self) -> usize {
        self.rows * self.cols
    }

    /// `(row, col)` of the `index`-th zone in row-major order.
    pub fn position(&self, index: usize) -> (usize, usize) {
        (index / self.cols.max(1), index % self.cols.max(1))
    }

    /// Check the layout itself, before any zone is loaded.
    pub fn validate(&self) -> Result<(), StitchError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(StitchError::EmptyPlan {
                rows: self.rows,
                cols: self.cols,
            });
        }
        for (axis, travel) in [(1u8, self.travel_ax1), (2u8, self.travel_ax2)] {
            if let Some([min, max]) = travel {
                if !(max > min) {
                    return Err(StitchError::InvalidTravel { axis, min, max });
                }
            }
        }
        Ok(())
    }

    /// Check the layout against the number of supplied zones.
    pub fn validate_zones(&self, zones: usize) -> Result<(), StitchError> {
        self.validate()?;
        if zones != self.zone_count() {
            return Err(StitchError::ZoneCountMismatch {
                rows: self.rows,
                cols: self.cols,
                expected: self.zone_count(),
                actual: zones,
            });
        }
        Ok(())
    }
}

/// One zone as handed to the engine.
#[derive(Clone, Debug)]
pub struct ZoneInput {
    /// Caller-side identifier, usually the file name.
    pub id: String,
    pub config: ZoneConfig,
    pub measurement: RawMeasurement,
}

/// Zone grid with its own slopes removed, ready for stitching.
#[derive(Clone, Debug)]
pub struct PreparedZone {
    pub id: String,
    pub config: ZoneConfig,
    pub layout: GridLayout,
    pub unfilled_cells: usize,
    /// Slope model of the raw grid.
    pub slopes: SlopeModel,
    /// Single-zone accuracy of the detrended, zero-referenced grid.
    pub accuracy: ZoneSpread,
    /// Detrended grid; the absolute error level is kept.
    pub grid: ZoneGrid,
}

/// Build and detrend one zone's grid.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip(input), fields(zone = %input.id)))]
pub fn prepare_zone(input: &ZoneInput) -> Result<PreparedZone, StitchError> {
    let wrap = |e: StitchError| e.in_zone(input.id.as_str());
    let build = build_zone_grid(&input.measurement).map_err(wrap)?;
    let single = process_single_zone(&build.grid).map_err(wrap)?;
    let grid = single.slopes.detrend(&build.grid);
    debug!(
        "zone {}: pk ax1 {:.4}, pk ax2 {:.4}, std vector {:.4}",
        input.id, single.pk_ax1, single.pk_ax2, single.std_vector
    );
    Ok(PreparedZone {
        id: input.id.clone(),
        config: input.config.clone(),
        layout: build.layout,
        unfilled_cells: build.unfilled_cells,
        accuracy: single.stats(),
        slopes: single.slopes,
        grid,
    })
}

/// [`prepare_zone`] over every input, in input order.
#[cfg(not(feature = "rayon"))]
pub fn prepare_zones(inputs: &[ZoneInput]) -> Result<Vec<PreparedZone>, StitchError> {
    inputs.iter().map(prepare_zone).collect()
}

/// [`prepare_zone`] over every input, in input order.
#[cfg(feature = "rayon")]
pub fn prepare_zones(inputs: &[ZoneInput]) -> Result<Vec<PreparedZone>, StitchError> {
    inputs.par_iter().map(prepare_zone).collect()
}

/// Tolerated per-zone condition; the run continues.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StitchWarning {
    /// No overlap with the master: the zone was accumulated uncorrected.
    MissingOverlap {
        zone: String,
        row: usize,
        col: usize,
        direction: StitchDirection,
    },
    /// Interpolation left grid cells undefined.
    UnfilledCells { zone: String, count: usize },
}

impl fmt::Display for StitchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StitchWarning::MissingOverlap {
                zone,
                row,
                col,
                direction,
            } => write!(
                f,
                "zone {zone} (row {}, col {}): no {direction:?} overlap with its master, not aligned",
                row + 1,
                col + 1
            ),
            StitchWarning::UnfilledCells { zone, count } => {
                write!(f, "zone {zone}: {count} grid cells undefined after interpolation")
            }
        }
    }
}

/// What happened to one zone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneReport {
    pub id: String,
    pub row: usize,
    pub col: usize,
    /// `None` for the first zone, which anchors the map.
    pub direction: Option<StitchDirection>,
    pub layout: GridLayout,
    pub unfilled_cells: usize,
    pub slopes: SlopeModel,
    pub accuracy: ZoneSpread,
    /// Header fields of the zone file (operator, temperatures, comment).
    pub metadata: ZoneMetadata,
    pub correction: Option<StitchCorrection>,
    /// Top-left accumulator cell covered by the zone.
    pub placement: [usize; 2],
}

/// Incremental form of [`run_stitching`]: push prepared zones in row-major
/// order, then [`finish`](Self::finish).
#[derive(Debug)]
pub struct ZoneStitcher {
    plan: StitchPlan,
    masters: StitchMasters,
    acc: Option<GridAccumulator>,
    system: Option<ZoneConfig>,
    reports: Vec<ZoneReport>,
    warnings: Vec<StitchWarning>,
}

impl ZoneStitcher {
    pub fn new(plan: StitchPlan) -> Result<Self, StitchError> {
        plan.validate()?;
        Ok(Self {
            plan,
            masters: StitchMasters::new(),
            acc: None,
            system: None,
            reports: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Zones pushed so far.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn accumulator(&self) -> Option<&GridAccumulator> {
        self.acc.as_ref()
    }

    pub fn warnings(&self) -> &[StitchWarning] {
        &self.warnings
    }

    /// Stitch the next zone and add it to the accumulator.
    pub fn push(&mut self, zone: PreparedZone) -> Result<&ZoneReport, StitchError> {
        let index = self.reports.len();
        if index >= self.plan.zone_count() {
            return Err(StitchError::ZoneCountMismatch {
                rows: self.plan.rows,
                cols: self.plan.cols,
                expected: self.plan.zone_count(),
                actual: index + 1,
            });
        }
        let (row, col) = self.plan.position(index);
        info!("zone {} (row {}, col {}): {}", index + 1, row + 1, col + 1, zone.id);

        if zone.unfilled_cells > 0 {
            self.warnings.push(StitchWarning::UnfilledCells {
                zone: zone.id.clone(),
                count: zone.unfilled_cells,
            });
        }

        let (stitched, direction, correction) = match self.masters.master_for(row, col) {
            Some((master, direction)) => {
                let outcome = stitch_zone(master, &zone.grid, direction)
                    .map_err(|e| e.in_zone(zone.id.as_str()))?;
                if outcome.correction.is_none() {
                    warn!("zone {}: no {direction:?} overlap, accumulated uncorrected", zone.id);
                    self.warnings.push(StitchWarning::MissingOverlap {
                        zone: zone.id.clone(),
                        row,
                        col,
                        direction,
                    });
                }
                (outcome.zone, Some(direction), outcome.correction)
            }
            None => (zone.grid, None, None),
        };

        let acc = match self.acc.take() {
            Some(acc) => acc,
            None => self.new_accumulator(&stitched).map_err(|e| e.in_zone(zone.id.as_str()))?,
        };
        let acc = self.acc.insert(acc);
        let Placement { row: pr, col: pc, .. } = acc.place(&stitched);

        self.masters = std::mem::take(&mut self.masters).advance(col, &stitched);
        let metadata = zone.config.metadata.clone();
        if self.system.is_none() {
            self.system = Some(zone.config);
        }
        self.reports.push(ZoneReport {
            id: zone.id,
            row,
            col,
            direction,
            layout: zone.layout,
            unfilled_cells: zone.unfilled_cells,
            slopes: zone.slopes,
            accuracy: zone.accuracy,
            metadata,
            correction,
            placement: [pr, pc],
        });
        Ok(&self.reports[index])
    }

    fn new_accumulator(&self, first: &ZoneGrid) -> Result<GridAccumulator, StitchError> {
        let inc = zone_increments(first);
        match (self.plan.travel_ax1, self.plan.travel_ax2) {
            (Some(ax1), Some(ax2)) => GridAccumulator::with_travel(inc, ax1, ax2),
            (ax1, ax2) => {
                let [x0, y0] = first.origin();
                let origin = [ax1.map_or(x0, |t| t[0]), ax2.map_or(y0, |t| t[0])];
                GridAccumulator::new(origin, inc)
            }
        }
    }

    /// Finalize the accumulated map. All planned zones must have been pushed.
    pub fn finish(self) -> Result<StitchRun, StitchError> {
        let expected = self.plan.zone_count();
        let (Some(acc), Some(system)) = (self.acc, self.system) else {
            return Err(StitchError::ZoneCountMismatch {
                rows: self.plan.rows,
                cols: self.plan.cols,
                expected,
                actual: 0,
            });
        };
        if self.reports.len() != expected {
            return Err(StitchError::ZoneCountMismatch {
                rows: self.plan.rows,
                cols: self.plan.cols,
                expected,
                actual: self.reports.len(),
            });
        }
        let calibration = finalize(&acc, [system.ax1.sign, system.ax2.sign])?;
        Ok(StitchRun {
            calibration,
            zones: self.reports,
            warnings: self.warnings,
            system,
            zone_count: expected,
        })
    }
}

/// Result of a full stitching run.
#[derive(Clone, Debug)]
pub struct StitchRun {
    pub calibration: FinalCalibration,
    pub zones: Vec<ZoneReport>,
    pub warnings: Vec<StitchWarning>,
    /// Configuration of the first zone; axis numbers, signs and units of the
    /// output tables come from here.
    pub system: ZoneConfig,
    pub zone_count: usize,
}

impl StitchRun {
    pub fn missing_overlaps(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, StitchWarning::MissingOverlap { .. }))
            .count()
    }
}

/// Prepare, stitch, accumulate and finalize `zones` (row-major) per `plan`.
///
/// Any error aborts the whole run; nothing partial is returned.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(plan, zones), fields(rows = plan.rows, cols = plan.cols))
)]
pub fn run_stitching(plan: &StitchPlan, zones: &[ZoneInput]) -> Result<StitchRun, StitchError> {
    plan.validate_zones(zones.len())?;
    let prepared = prepare_zones(zones)?;
    let mut stitcher = ZoneStitcher::new(plan.clone())?;
    for zone in prepared {
        stitcher.push(zone)?;
    }
    let run = stitcher.finish()?;
    info!(
        "stitched {} zones into a {}x{} grid ({} warnings)",
        run.zone_count,
        run.calibration.rows(),
        run.calibration.cols(),
        run.warnings.len()
    );
    Ok(run)
}
