//! Averaging, global detrend, zero-referencing and calibration tables.

use crate::{GridAccumulator, Matrix, SlopeModel, StitchError};
use log::{debug, info};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Peak-to-peak and RMS of the final error map over valid cells.
///
/// RMS is taken about zero, not about the sample mean.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub pk_ax1: f64,
    pub pk_ax2: f64,
    pub pk_vector: f64,
    pub rms_ax1: f64,
    pub rms_ax2: f64,
    pub rms_vector: f64,
}

impl ErrorStats {
    /// Statistics of `(ax1, ax2, vector)` triples. Zero for an empty input.
    pub fn from_cells(cells: impl IntoIterator<Item = [f64; 3]>) -> Self {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        let mut sq = [0.0; 3];
        let mut n = 0usize;
        for v in cells {
            for k in 0..3 {
                min[k] = min[k].min(v[k]);
                max[k] = max[k].max(v[k]);
                sq[k] += v[k] * v[k];
            }
            n += 1;
        }
        if n == 0 {
            return Self::default();
        }
        let rms = |k: usize| (sq[k] / n as f64).sqrt();
        Self {
            pk_ax1: max[0] - min[0],
            pk_ax2: max[1] - min[1],
            pk_vector: max[2] - min[2],
            rms_ax1: rms(0),
            rms_ax2: rms(1),
            rms_vector: rms(2),
        }
    }
}

/// Final stitched error map and the tables derived from it.
#[derive(Clone, Debug)]
pub struct FinalCalibration {
    /// Averaged scan positions (zero where no zone contributed).
    pub x: Matrix,
    /// Averaged step positions.
    pub y: Matrix,
    /// Averaged, detrended, zero-referenced axis-1 error.
    pub ax1_err: Matrix,
    pub ax2_err: Matrix,
    /// `sqrt(ax1_err² + ax2_err²)`.
    pub vector_err: Matrix,
    /// `avg_count > 0`.
    pub valid: DMatrix<bool>,
    pub avg_count: DMatrix<u32>,
    /// Global straightness model removed from the averaged map.
    pub slopes: SlopeModel,
    pub orthogonality_arcsec: f64,
    /// Values subtracted to zero the origin cell, if it was valid.
    pub zero_offset: Option<[f64; 2]>,
    pub stats: ErrorStats,
    /// Axis-1 correction table with a one-cell zero border.
    pub ax1_cal: Matrix,
    pub ax2_cal: Matrix,
    /// Grid spacing `[ax1, ax2]`.
    pub increments: [f64; 2],
    /// Nominal position of cell `(0, 0)`.
    pub origin: [f64; 2],
}

impl FinalCalibration {
    pub fn rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn cols(&self) -> usize {
        self.x.ncols()
    }

    pub fn valid_cells(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Cells covered by more than one zone.
    pub fn overlap_cells(&self) -> usize {
        self.avg_count.iter().filter(|&&n| n > 1).count()
    }

    /// Valid cells as a percentage of the grid.
    pub fn coverage(&self) -> f64 {
        let total = self.rows() * self.cols();
        if total == 0 {
            return 0.0;
        }
        100.0 * self.valid_cells() as f64 / total as f64
    }

    /// Valid cells in row-major order.
    pub fn valid_indices(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.cols();
        (0..self.rows())
            .flat_map(move |r| (0..cols).map(move |c| (r, c)))
            .filter(|&rc| self.valid[rc])
    }
}

/// Round `v` to four decimals, ties to even.
#[inline]
pub fn round_cal(v: f64) -> f64 {
    (v * 10000.0).round_ties_even() / 10000.0
}

/// Correction table for one axis: the error map inverted by the axis sign,
/// rounded to four decimals and surrounded by a one-cell zero border.
pub fn cal_table(err: &Matrix, sign: i32) -> Matrix {
    let (rows, cols) = err.shape();
    let mut out = Matrix::zeros(rows + 2, cols + 2);
    let s = -(sign as f64);
    for r in 0..rows {
        for c in 0..cols {
            out[(r + 1, c + 1)] = s * round_cal(err[(r, c)]);
        }
    }
    out
}

/// Average the accumulated sums and derive the final map.
///
/// `signs` are the axis sign conventions `[ax1, ax2]` used for the tables.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(acc), fields(shape = ?acc.shape()))
)]
pub fn finalize(acc: &GridAccumulator, signs: [i32; 2]) -> Result<FinalCalibration, StitchError> {
    let (rows, cols) = acc.shape();
    let avg_count = acc.counts().clone();
    let valid = avg_count.map(|n| n > 0);
    if !valid.iter().any(|&v| v) {
        return Err(StitchError::EmptyGrid);
    }

    let average = |sum: &Matrix| {
        Matrix::from_fn(rows, cols, |r, c| match avg_count[(r, c)] {
            0 => 0.0,
            n => sum[(r, c)] / n as f64,
        })
    };
    let x = average(acc.x_sum());
    let y = average(acc.y_sum());
    let mut ax1_err = average(acc.ax1_err_sum());
    let mut ax2_err = average(acc.ax2_err_sum());
    info!(
        "final grid {rows}x{cols}: {} valid cells, {} in overlaps",
        valid.iter().filter(|&&v| v).count(),
        avg_count.iter().filter(|&&n| n > 1).count()
    );

    let slopes = SlopeModel::fit(
        &acc.ax1_positions(),
        &acc.ax2_positions(),
        &ax1_err,
        &ax2_err,
        |r, c| valid[(r, c)],
    )?;
    debug!(
        "global slopes: ax1 {:.6} + {:.6}, ax2 {:.6} + {:.6}",
        slopes.ax1.slope, slopes.ax1.intercept, slopes.ax2.slope, slopes.ax2.intercept
    );

    for c in 0..cols {
        if valid.column(c).iter().any(|&v| v) {
            for r in 0..rows {
                ax1_err[(r, c)] -= slopes.ax1_line[r];
            }
        }
    }
    for r in 0..rows {
        if valid.row(r).iter().any(|&v| v) {
            for c in 0..cols {
                ax2_err[(r, c)] -= slopes.ax2_line[c];
            }
        }
    }

    let zero_offset = valid[(0, 0)].then(|| [ax1_err[(0, 0)], ax2_err[(0, 0)]]);
    if let Some([o1, o2]) = zero_offset {
        debug!("zero-referencing offsets: ax1 {o1:.6}, ax2 {o2:.6}");
        ax1_err.add_scalar_mut(-o1);
        ax2_err.add_scalar_mut(-o2);
    }

    let vector_err = ax1_err.zip_map(&ax2_err, |a, b| (a * a + b * b).sqrt());
    let stats = ErrorStats::from_cells(
        valid
            .iter()
            .zip(ax1_err.iter().zip(ax2_err.iter()).zip(vector_err.iter()))
            .filter(|(v, _)| **v)
            .map(|(_, ((&a, &b), &e))| [a, b, e]),
    );
    info!(
        "ax1 ±{:.3} P-P, {:.3} RMS; ax2 ±{:.3} P-P, {:.3} RMS; orthogonality {:.3} arcsec",
        stats.pk_ax1 / 2.0,
        stats.rms_ax1,
        stats.pk_ax2 / 2.0,
        stats.rms_ax2,
        slopes.orthogonality_arcsec
    );

    Ok(FinalCalibration {
        ax1_cal: cal_table(&ax1_err, signs[0]),
        ax2_cal: cal_table(&ax2_err, signs[1]),
        orthogonality_arcsec: slopes.orthogonality_arcsec,
        x,
        y,
        ax1_err,
        ax2_err,
        vector_err,
        valid,
        avg_count,
        slopes,
        zero_offset,
        stats,
        increments: acc.increments(),
        origin: acc.origin(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::axis;
    use crate::ZoneGrid;
    use approx::assert_relative_eq;

    fn zone(x0: f64, y0: f64, n: usize, f: impl Fn(f64, f64) -> (f64, f64)) -> ZoneGrid {
        let mut g = ZoneGrid::from_axes(&axis(x0, 1.0, n), &axis(y0, 1.0, n));
        for r in 0..n {
            for c in 0..n {
                let (a, b) = f(g.x[(r, c)], g.y[(r, c)]);
                g.ax1_err[(r, c)] = a;
                g.ax2_err[(r, c)] = b;
            }
        }
        g
    }

    #[test]
    fn averaged_cell_is_the_mean_of_its_contributions() {
        let mut acc = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        acc.place(&zone(0.0, 0.0, 3, |_, _| (1.0, 0.0)));
        acc.place(&zone(2.0, 0.0, 3, |_, _| (3.0, 0.0)));
        let cal = finalize(&acc, [1, 1]).expect("final");

        assert_eq!(cal.avg_count[(1, 2)], 2);
        assert_eq!(cal.overlap_cells(), 3);
        assert_relative_eq!(cal.x[(1, 2)], 2.0);
        // Before zero-referencing the seam is (1 + 3) / 2; relative to the
        // origin (value 1) it reads 1.
        assert_relative_eq!(cal.ax1_err[(1, 2)] - cal.ax1_err[(1, 0)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn origin_is_exactly_zero() {
        let mut acc = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        acc.place(&zone(0.0, 0.0, 5, |x, y| (0.3 * x - 0.1 * y * y + 0.7, (x * y).sin() + 2.0)));
        let cal = finalize(&acc, [1, -1]).expect("final");
        assert_eq!(cal.ax1_err[(0, 0)], 0.0);
        assert_eq!(cal.ax2_err[(0, 0)], 0.0);
        assert_eq!(cal.vector_err[(0, 0)], 0.0);
        assert!(cal.zero_offset.is_some());
    }

    #[test]
    fn global_slope_is_removed() {
        let mut acc = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        acc.place(&zone(0.0, 0.0, 6, |_, y| (0.25 * y, 0.0)));
        let cal = finalize(&acc, [1, 1]).expect("final");
        assert_relative_eq!(cal.slopes.ax1.slope, 0.25, epsilon = 1e-12);
        assert!(cal.ax1_err.iter().all(|v| v.abs() < 1e-12));
        assert_relative_eq!(cal.stats.pk_ax1, 0.0, epsilon = 1e-12);
        // The axis-2 line is d * ax1 evaluated on scan position.
        let expected = ((0.25f64) / 1000.0).atan().to_degrees() * 3600.0;
        assert_relative_eq!(cal.orthogonality_arcsec, expected, epsilon = 1e-9);
    }

    #[test]
    fn cal_tables_are_bordered_signed_and_rounded() {
        let err = Matrix::from_row_slice(1, 2, &[0.123_44, -0.000_04]);
        let t = cal_table(&err, 1);
        assert_eq!(t.shape(), (3, 4));
        assert_eq!(t.row(0).iter().copied().collect::<Vec<_>>(), vec![0.0; 4]);
        assert_eq!(t[(1, 0)], 0.0);
        assert_relative_eq!(t[(1, 1)], -0.1234, epsilon = 1e-15);
        assert_relative_eq!(t[(1, 2)], 0.0, epsilon = 1e-15);

        let t = cal_table(&err, -1);
        assert_relative_eq!(t[(1, 1)], 0.1234, epsilon = 1e-15);
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_eq!(round_cal(0.000_25 + 1e-9), 0.0003);
        assert_eq!(round_cal(-0.123_44), -0.1234);
        assert_eq!(round_cal(2.5e-4 * 0.0), 0.0);
        assert_eq!((2.5f64).round_ties_even(), 2.0);
    }

    #[test]
    fn stats_use_rms_about_zero() {
        let s = ErrorStats::from_cells([[1.0, 2.0, 0.0], [1.0, -2.0, 0.0]]);
        assert_relative_eq!(s.rms_ax1, 1.0);
        assert_relative_eq!(s.pk_ax1, 0.0);
        assert_relative_eq!(s.pk_ax2, 4.0);
        assert_relative_eq!(s.rms_ax2, 2.0);
    }

    #[test]
    fn empty_accumulator_is_an_error() {
        let acc = GridAccumulator::with_extent([0.0, 0.0], [1.0, 1.0], 2, 2).unwrap();
        assert_eq!(finalize(&acc, [1, 1]).unwrap_err(), StitchError::EmptyGrid);
    }

    #[test]
    fn uncovered_cells_are_excluded_from_statistics() {
        let mut acc = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        acc.place(&zone(0.0, 0.0, 2, |_, _| (0.0, 0.0)));
        acc.place(&zone(3.0, 3.0, 2, |_, _| (0.0, 0.0)));
        let cal = finalize(&acc, [1, 1]).expect("final");
        assert_eq!(cal.rows(), 5);
        assert_eq!(cal.valid_cells(), 8);
        assert_relative_eq!(cal.coverage(), 32.0);
        assert_eq!(cal.valid_indices().next(), Some((0, 0)));
        assert_eq!(cal.valid_indices().last(), Some((4, 4)));
        assert!(!cal.valid[(2, 2)]);
        assert_eq!(cal.x[(2, 2)], 0.0);
    }
}
