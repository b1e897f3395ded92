//! Straightness slope fitting and axis orthogonality.
//!
//! Axis-1 straightness is the per-row mean of `ax1_err` as a function of
//! step position; axis-2 straightness is the per-column mean of `ax2_err`
//! as a function of scan position. Each is fit with a degree-1 least-squares
//! line.

use crate::{Matrix, StitchError, ZoneGrid};
use serde::{Deserialize, Serialize};

/// Sign convention between the two measurement axes: they report
/// straightness slope with opposite sign.
pub const MEAS_DIR: f64 = -1.0;

/// `y = slope * x + intercept`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LineFit {
    /// Least-squares line through `(x[k], y[k])`.
    ///
    /// Returns `None` for fewer than two points or when every `x` is equal.
    pub fn fit(x: &[f64], y: &[f64]) -> Option<LineFit> {
        let n = x.len().min(y.len());
        if n < 2 {
            return None;
        }
        let nf = n as f64;
        let mx = x[..n].iter().sum::<f64>() / nf;
        let my = y[..n].iter().sum::<f64>() / nf;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for k in 0..n {
            let dx = x[k] - mx;
            sxx += dx * dx;
            sxy += dx * (y[k] - my);
        }
        if sxx <= 0.0 || !sxx.is_finite() {
            return None;
        }
        let slope = sxy / sxx;
        Some(LineFit {
            slope,
            intercept: my - slope * mx,
        })
    }

    /// Fit over the entries of a profile that have a value.
    pub fn fit_profile(positions: &[f64], profile: &[Option<f64>]) -> Option<LineFit> {
        let (x, y): (Vec<f64>, Vec<f64>) = positions
            .iter()
            .zip(profile)
            .filter_map(|(&p, v)| v.map(|v| (p, v)))
            .unzip();
        Self::fit(&x, &y)
    }

    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Both coefficients multiplied by `k`.
    #[inline]
    pub fn scaled(&self, k: f64) -> LineFit {
        LineFit {
            slope: self.slope * k,
            intercept: self.intercept * k,
        }
    }

    pub fn eval_all(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }
}

/// Orthogonality angle (arc-seconds) between the axes from their
/// straightness slopes (micro-units per unit travel).
pub fn orthogonality_arcsec(ax1_slope: f64, ax2_slope: f64) -> f64 {
    let orthog = ax1_slope - MEAS_DIR * ax2_slope;
    (orthog / 1000.0).atan().to_degrees() * 3600.0
}

/// Linear straightness model of one grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlopeModel {
    /// Axis-1 error vs step position.
    pub ax1: LineFit,
    /// Axis-2 error vs scan position.
    pub ax2: LineFit,
    /// Per-row mean axis-1 error (`None` where a row has no usable cells).
    pub ax1_mean: Vec<Option<f64>>,
    /// Per-column mean axis-2 error.
    pub ax2_mean: Vec<Option<f64>>,
    /// `ax1` evaluated at every row's step position.
    pub ax1_line: Vec<f64>,
    /// `MEAS_DIR * ax1` evaluated at every column's scan position; this is
    /// the axis-2 line removed when detrending.
    pub ax2_line: Vec<f64>,
    pub orthogonality_arcsec: f64,
}

impl SlopeModel {
    /// Fit both axes. `include(r, c)` selects the cells that take part; cells
    /// with non-finite errors never do.
    pub fn fit(
        scan_pos: &[f64],
        step_pos: &[f64],
        ax1_err: &Matrix,
        ax2_err: &Matrix,
        include: impl Fn(usize, usize) -> bool,
    ) -> Result<Self, StitchError> {
        let rows: Vec<usize> = (0..ax1_err.nrows()).collect();
        let cols: Vec<usize> = (0..ax1_err.ncols()).collect();
        let ax1_mean = row_means(ax1_err, &rows, &cols, &include);
        let ax2_mean = col_means(ax2_err, &rows, &cols, &include);

        let ax1 = LineFit::fit_profile(step_pos, &ax1_mean).ok_or(StitchError::DegenerateFit {
            axis: 1,
            context: "fewer than two step positions with data",
        })?;
        let ax2 = LineFit::fit_profile(scan_pos, &ax2_mean).ok_or(StitchError::DegenerateFit {
            axis: 2,
            context: "fewer than two scan positions with data",
        })?;

        Ok(Self {
            ax1,
            ax2,
            ax1_line: ax1.eval_all(step_pos),
            ax2_line: ax1.scaled(MEAS_DIR).eval_all(scan_pos),
            ax1_mean,
            ax2_mean,
            orthogonality_arcsec: orthogonality_arcsec(ax1.slope, ax2.slope),
        })
    }

    /// Remove `ax1_line` from every column and `ax2_line` from every row of
    /// `grid`, keeping the absolute level (no zero-referencing).
    pub fn detrend(&self, grid: &ZoneGrid) -> ZoneGrid {
        let mut out = grid.clone();
        for c in 0..out.cols() {
            for r in 0..out.rows() {
                out.ax1_err[(r, c)] -= self.ax1_line[r];
                out.ax2_err[(r, c)] -= self.ax2_line[c];
            }
        }
        out
    }
}

/// Fit the straightness model of a whole zone grid.
pub fn estimate_slopes(grid: &ZoneGrid) -> Result<SlopeModel, StitchError> {
    SlopeModel::fit(
        &grid.ax1_positions(),
        &grid.ax2_positions(),
        &grid.ax1_err,
        &grid.ax2_err,
        |_, _| true,
    )
}

/// Mean of the finite values, `None` if there are none.
pub(crate) fn finite_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// For each of `rows`, the mean over `cols`.
pub(crate) fn row_means(
    m: &Matrix,
    rows: &[usize],
    cols: &[usize],
    include: &impl Fn(usize, usize) -> bool,
) -> Vec<Option<f64>> {
    rows.iter()
        .map(|&r| {
            finite_mean(
                cols.iter()
                    .filter(|&&c| include(r, c))
                    .map(|&c| m[(r, c)]),
            )
        })
        .collect()
}

/// For each of `cols`, the mean over `rows`.
pub(crate) fn col_means(
    m: &Matrix,
    rows: &[usize],
    cols: &[usize],
    include: &impl Fn(usize, usize) -> bool,
) -> Vec<Option<f64>> {
    cols.iter()
        .map(|&c| {
            finite_mean(
                rows.iter()
                    .filter(|&&r| include(r, c))
                    .map(|&r| m[(r, c)]),
            )
        })
        .collect()
}

/// Mean over the block `rows x cols`.
pub(crate) fn block_mean(m: &Matrix, rows: &[usize], cols: &[usize]) -> Option<f64> {
    finite_mean(
        rows.iter()
            .flat_map(|&r| cols.iter().map(move |&c| m[(r, c)])),
    )
}
