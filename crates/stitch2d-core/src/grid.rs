//! Regular position/error grid of one zone.
//!
//! Rows follow the step axis (axis 2), columns follow the scan axis
//! (axis 1). Complete rectangular scans are reshaped directly so the grid
//! reproduces the measured values bit for bit; anything else goes through
//! scattered linear interpolation onto the same target grid.

use crate::interp::ScatteredLinear;
use crate::{Matrix, RawMeasurement, StitchError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Position and error matrices of one zone, all of shape `(rows, cols)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneGrid {
    /// Scan-axis position, varies by column.
    pub x: Matrix,
    /// Step-axis position, varies by row.
    pub y: Matrix,
    /// Scan-axis error.
    pub ax1_err: Matrix,
    /// Step-axis error.
    pub ax2_err: Matrix,
}

impl ZoneGrid {
    /// Build a grid from matrices that must all share one shape.
    pub fn new(
        x: Matrix,
        y: Matrix,
        ax1_err: Matrix,
        ax2_err: Matrix,
    ) -> Result<Self, StitchError> {
        let expected = x.shape();
        for m in [&y, &ax1_err, &ax2_err] {
            if m.shape() != expected {
                return Err(StitchError::ShapeMismatch {
                    expected,
                    actual: m.shape(),
                });
            }
        }
        Ok(Self {
            x,
            y,
            ax1_err,
            ax2_err,
        })
    }

    /// Outer product of scan positions (columns) and step positions (rows),
    /// with zeroed errors.
    pub fn from_axes(ax1_pos: &[f64], ax2_pos: &[f64]) -> Self {
        let (rows, cols) = (ax2_pos.len(), ax1_pos.len());
        Self {
            x: Matrix::from_fn(rows, cols, |_, c| ax1_pos[c]),
            y: Matrix::from_fn(rows, cols, |r, _| ax2_pos[r]),
            ax1_err: Matrix::zeros(rows, cols),
            ax2_err: Matrix::zeros(rows, cols),
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.x.nrows()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.x.ncols()
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.x.shape()
    }

    /// Scan positions of the columns (first row of `x`).
    pub fn ax1_positions(&self) -> Vec<f64> {
        self.x.row(0).iter().copied().collect()
    }

    /// Step positions of the rows (first column of `y`).
    pub fn ax2_positions(&self) -> Vec<f64> {
        self.y.column(0).iter().copied().collect()
    }

    /// Position of cell `(0, 0)`.
    pub fn origin(&self) -> [f64; 2] {
        [self.x[(0, 0)], self.y[(0, 0)]]
    }

    pub fn max_x(&self) -> f64 {
        self.x.max()
    }

    pub fn min_y(&self) -> f64 {
        self.y.min()
    }

    pub fn max_y(&self) -> f64 {
        self.y.max()
    }

    /// Number of cells whose error is not finite on either axis.
    pub fn unfilled_cells(&self) -> usize {
        self.ax1_err
            .iter()
            .zip(self.ax2_err.iter())
            .filter(|(a, b)| !a.is_finite() || !b.is_finite())
            .count()
    }
}

/// How the raw samples map onto the target grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridLayout {
    /// One sample per cell, in scan-major order: reshape directly.
    Regular,
    /// Sample count differs from `rows * cols`: interpolate.
    Irregular,
}

impl GridLayout {
    pub fn classify(raw: &RawMeasurement, rows: usize, cols: usize) -> Self {
        if raw.len() == rows * cols {
            GridLayout::Regular
        } else {
            GridLayout::Irregular
        }
    }
}

/// Output of [`build_zone_grid`].
#[derive(Clone, Debug)]
pub struct GridBuild {
    pub grid: ZoneGrid,
    pub layout: GridLayout,
    /// Cells left undefined by the interpolation fallback (stored as NaN).
    pub unfilled_cells: usize,
    /// Travel span used to normalize each axis (unit span for a zero-length axis).
    pub span: [f64; 2],
}

/// Map one zone's scattered samples onto its regular grid.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(raw), fields(samples = raw.len()))
)]
pub fn build_zone_grid(raw: &RawMeasurement) -> Result<GridBuild, StitchError> {
    raw.check_consistent()?;

    let ax1_pos = raw.ax1_positions()?;
    let ax2_pos = raw.ax2_positions()?;
    if ax1_pos.len() < 2 {
        return Err(StitchError::DegenerateAxis {
            axis: 1,
            points: ax1_pos.len(),
        });
    }
    if ax2_pos.len() < 2 {
        return Err(StitchError::DegenerateAxis {
            axis: 2,
            points: ax2_pos.len(),
        });
    }

    let mut grid = ZoneGrid::from_axes(&ax1_pos, &ax2_pos);
    let (rows, cols) = grid.shape();
    let span = [
        unit_if_zero(raw.ax1_move_distance()),
        unit_if_zero(raw.ax2_move_distance()),
    ];
    let e1 = raw.ax1_err_micro();
    let e2 = raw.ax2_err_micro();

    let layout = GridLayout::classify(raw, rows, cols);
    match layout {
        GridLayout::Regular => {
            debug!("complete {cols}x{rows} scan, reshaping without interpolation");
            grid.ax1_err = Matrix::from_row_slice(rows, cols, &e1);
            grid.ax2_err = Matrix::from_row_slice(rows, cols, &e2);
        }
        GridLayout::Irregular => {
            warn!(
                "expected {} samples on a {cols}x{rows} grid, got {}; interpolating",
                rows * cols,
                raw.len()
            );
            let sites: Vec<[f64; 2]> = raw
                .ax1_pos
                .iter()
                .zip(&raw.ax2_pos)
                .map(|(x, y)| [x / span[0], y / span[1]])
                .collect();
            let interp = ScatteredLinear::new(&sites);
            for r in 0..rows {
                for c in 0..cols {
                    let q = [grid.x[(r, c)] / span[0], grid.y[(r, c)] / span[1]];
                    let (a, b) = interp
                        .as_ref()
                        .and_then(|it| it.eval_pair(&e1, &e2, q))
                        .unwrap_or((f64::NAN, f64::NAN));
                    grid.ax1_err[(r, c)] = a;
                    grid.ax2_err[(r, c)] = b;
                }
            }
        }
    }

    let unfilled_cells = grid.unfilled_cells();
    if unfilled_cells > 0 {
        warn!("{unfilled_cells} grid cells lie outside the measured hull and stay undefined");
    }

    Ok(GridBuild {
        grid,
        layout,
        unfilled_cells,
        span,
    })
}

fn unit_if_zero(span: f64) -> f64 {
    if span == 0.0 {
        1.0
    } else {
        span
    }
}
