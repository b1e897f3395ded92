//! Full-travel accumulation of stitched zones.
//!
//! Zones are **added** into running sums together with a per-cell count of
//! contributing zones; averaging is left to the finalizer so the raw sums can
//! be re-averaged at any point.

use crate::{Matrix, StitchError, ZoneGrid};
use log::debug;
use nalgebra::DMatrix;

/// Where a zone landed in the accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// First accumulator row covered by the zone.
    pub row: usize,
    /// First accumulator column covered by the zone.
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
    /// The accumulator had to grow to fit the zone.
    pub grown: bool,
}

/// Sums of `X, Y, Ax1Err, Ax2Err` and the contributing-zone count per cell.
///
/// The grid only grows. Its origin is the position of cell `(0, 0)`; a zone
/// is placed at `round((zone origin - origin) / increment)` on each axis.
#[derive(Clone, Debug)]
pub struct GridAccumulator {
    origin: [f64; 2],
    inc: [f64; 2],
    x: Matrix,
    y: Matrix,
    ax1_err: Matrix,
    ax2_err: Matrix,
    count: DMatrix<u32>,
}

impl GridAccumulator {
    /// Empty accumulator anchored at `origin` with spacing `inc = [ax1, ax2]`.
    pub fn new(origin: [f64; 2], inc: [f64; 2]) -> Result<Self, StitchError> {
        Self::with_extent(origin, inc, 0, 0)
    }

    /// Accumulator pre-sized to `rows x cols` cells.
    pub fn with_extent(
        origin: [f64; 2],
        inc: [f64; 2],
        rows: usize,
        cols: usize,
    ) -> Result<Self, StitchError> {
        for (axis, value) in [(1u8, inc[0]), (2u8, inc[1])] {
            if !(value.is_finite() && value > 0.0) {
                return Err(StitchError::InvalidIncrement { axis, value });
            }
        }
        Ok(Self {
            origin,
            inc,
            x: Matrix::zeros(rows, cols),
            y: Matrix::zeros(rows, cols),
            ax1_err: Matrix::zeros(rows, cols),
            ax2_err: Matrix::zeros(rows, cols),
            count: DMatrix::zeros(rows, cols),
        })
    }

    /// Accumulator covering the full travel ranges `[min, max]` of both axes.
    pub fn with_travel(
        inc: [f64; 2],
        travel_ax1: [f64; 2],
        travel_ax2: [f64; 2],
    ) -> Result<Self, StitchError> {
        for (axis, [min, max]) in [(1u8, travel_ax1), (2u8, travel_ax2)] {
            if !(max > min) {
                return Err(StitchError::InvalidTravel { axis, min, max });
            }
        }
        // Validate before dividing by the increments.
        Self::new([travel_ax1[0], travel_ax2[0]], inc)?;
        let cols = ((travel_ax1[1] - travel_ax1[0]) / inc[0]).round() as usize + 1;
        let rows = ((travel_ax2[1] - travel_ax2[0]) / inc[1]).round() as usize + 1;
        Self::with_extent([travel_ax1[0], travel_ax2[0]], inc, rows, cols)
    }

    /// Empty accumulator anchored at `zone`'s origin, with the zone's grid
    /// spacing (unit spacing on an axis with a single line).
    pub fn for_zone(zone: &ZoneGrid) -> Result<Self, StitchError> {
        Self::new(zone.origin(), zone_increments(zone))
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.count.nrows()
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.count.ncols()
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.count.shape()
    }

    pub fn is_empty(&self) -> bool {
        self.count.iter().all(|&n| n == 0)
    }

    /// Position of cell `(0, 0)`.
    pub fn origin(&self) -> [f64; 2] {
        self.origin
    }

    /// Grid spacing `[ax1, ax2]`.
    pub fn increments(&self) -> [f64; 2] {
        self.inc
    }

    /// Nominal scan position of every column.
    pub fn ax1_positions(&self) -> Vec<f64> {
        (0..self.cols())
            .map(|c| self.origin[0] + c as f64 * self.inc[0])
            .collect()
    }

    /// Nominal step position of every row.
    pub fn ax2_positions(&self) -> Vec<f64> {
        (0..self.rows())
            .map(|r| self.origin[1] + r as f64 * self.inc[1])
            .collect()
    }

    pub fn x_sum(&self) -> &Matrix {
        &self.x
    }

    pub fn y_sum(&self) -> &Matrix {
        &self.y
    }

    pub fn ax1_err_sum(&self) -> &Matrix {
        &self.ax1_err
    }

    pub fn ax2_err_sum(&self) -> &Matrix {
        &self.ax2_err
    }

    /// Number of zones that contributed to each cell.
    pub fn counts(&self) -> &DMatrix<u32> {
        &self.count
    }

    /// Add `zone` into the sums at its rounded grid offset.
    ///
    /// Cells whose error is undefined on either axis (interpolation gaps) are
    /// not added and not counted.
    pub fn place(&mut self, zone: &ZoneGrid) -> Placement {
        let [x0, y0] = zone.origin();
        let mut col = ((x0 - self.origin[0]) / self.inc[0]).round() as i64;
        let mut row = ((y0 - self.origin[1]) / self.inc[1]).round() as i64;
        let (rows, cols) = zone.shape();

        let grown = self.grow_to_fit(row, col, rows, cols);
        if grown {
            col = ((x0 - self.origin[0]) / self.inc[0]).round() as i64;
            row = ((y0 - self.origin[1]) / self.inc[1]).round() as i64;
        }
        // Both offsets are non-negative after growth.
        let (row, col) = (row.max(0) as usize, col.max(0) as usize);

        for r in 0..rows {
            for c in 0..cols {
                let (e1, e2) = (zone.ax1_err[(r, c)], zone.ax2_err[(r, c)]);
                if !e1.is_finite() || !e2.is_finite() {
                    continue;
                }
                let cell = (row + r, col + c);
                self.x[cell] += zone.x[(r, c)];
                self.y[cell] += zone.y[(r, c)];
                self.ax1_err[cell] += e1;
                self.ax2_err[cell] += e2;
                self.count[cell] += 1;
            }
        }

        debug!("placed {rows}x{cols} zone at row {row}, col {col} (grid {:?})", self.shape());
        Placement {
            row,
            col,
            rows,
            cols,
            grown,
        }
    }

    /// Extend the grid so that the window at `(row, col)` of size
    /// `rows x cols` lies inside it. Returns whether anything changed.
    fn grow_to_fit(&mut self, row: i64, col: i64, rows: usize, cols: usize) -> bool {
        let shift_r = (-row).max(0) as usize;
        let shift_c = (-col).max(0) as usize;
        let need_r = (row + rows as i64).max(0) as usize + shift_r;
        let need_c = (col + cols as i64).max(0) as usize + shift_c;
        let new_rows = (self.rows() + shift_r).max(need_r);
        let new_cols = (self.cols() + shift_c).max(need_c);
        if shift_r == 0 && shift_c == 0 && new_rows == self.rows() && new_cols == self.cols() {
            return false;
        }

        let (old_r, old_c) = self.shape();
        let grow = |m: &Matrix| {
            let mut out = Matrix::zeros(new_rows, new_cols);
            out.view_mut((shift_r, shift_c), (old_r, old_c)).copy_from(m);
            out
        };
        self.x = grow(&self.x);
        self.y = grow(&self.y);
        self.ax1_err = grow(&self.ax1_err);
        self.ax2_err = grow(&self.ax2_err);
        let mut count = DMatrix::zeros(new_rows, new_cols);
        count
            .view_mut((shift_r, shift_c), (old_r, old_c))
            .copy_from(&self.count);
        self.count = count;

        self.origin[0] -= shift_c as f64 * self.inc[0];
        self.origin[1] -= shift_r as f64 * self.inc[1];
        debug!("accumulator grown from {old_r}x{old_c} to {new_rows}x{new_cols}");
        true
    }
}

/// Grid spacing of a zone: `X[0,1] - X[0,0]` and `Y[1,0] - Y[0,0]`, or 1.0
/// on an axis with a single line.
pub fn zone_increments(zone: &ZoneGrid) -> [f64; 2] {
    let inc1 = if zone.cols() > 1 {
        zone.x[(0, 1)] - zone.x[(0, 0)]
    } else {
        1.0
    };
    let inc2 = if zone.rows() > 1 {
        zone.y[(1, 0)] - zone.y[(0, 0)]
    } else {
        1.0
    };
    [inc1, inc2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::axis;
    use approx::assert_relative_eq;

    fn filled(x0: f64, y0: f64, n: usize, v: f64) -> ZoneGrid {
        let mut g = ZoneGrid::from_axes(&axis(x0, 1.0, n), &axis(y0, 1.0, n));
        g.ax1_err.fill(v);
        g.ax2_err.fill(-v);
        g
    }

    #[test]
    fn counts_cover_every_placement_window() {
        let mut acc = GridAccumulator::for_zone(&filled(0.0, 0.0, 3, 1.0)).unwrap();
        let p0 = acc.place(&filled(0.0, 0.0, 3, 1.0));
        let p1 = acc.place(&filled(2.0, 0.0, 3, 3.0));
        assert_eq!((p0.row, p0.col), (0, 0));
        assert_eq!((p1.row, p1.col), (0, 2));
        assert!(p1.grown);
        assert_eq!(acc.shape(), (3, 5));

        for r in 0..3 {
            assert_eq!(
                acc.counts().row(r).iter().copied().collect::<Vec<_>>(),
                vec![1, 1, 2, 1, 1]
            );
            // Seam holds the sum of both contributions.
            assert_relative_eq!(acc.ax1_err_sum()[(r, 2)], 4.0);
            assert_relative_eq!(acc.ax2_err_sum()[(r, 2)], -4.0);
            assert_relative_eq!(acc.x_sum()[(r, 2)], 4.0);
        }
    }

    #[test]
    fn sums_are_order_independent() {
        let a = filled(0.0, 0.0, 3, 1.0);
        let b = filled(1.0, 1.0, 3, 2.5);

        let mut ab = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        ab.place(&a);
        ab.place(&b);
        let mut ba = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        ba.place(&b);
        ba.place(&a);

        assert_eq!(ab.shape(), ba.shape());
        assert_eq!(ab.origin(), ba.origin());
        assert_eq!(ab.counts(), ba.counts());
        assert_eq!(ab.ax1_err_sum(), ba.ax1_err_sum());
    }

    #[test]
    fn grows_towards_negative_positions() {
        let mut acc = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        acc.place(&filled(0.0, 0.0, 2, 1.0));
        assert_eq!(acc.shape(), (2, 2));

        let p = acc.place(&ZoneGrid::from_axes(&[-2.0, -1.0], &[-1.0, 0.0]));
        assert!(p.grown);
        assert_eq!((p.row, p.col), (0, 0));
        assert_eq!(acc.origin(), [-2.0, -1.0]);
        assert_eq!(acc.shape(), (3, 4));
        // First zone moved by the shift; the two windows do not touch.
        assert_eq!(acc.counts()[(1, 1)], 1);
        assert_eq!(acc.counts()[(1, 2)], 1);
        assert_eq!(acc.counts()[(0, 2)], 0);
        assert_eq!(acc.counts()[(2, 3)], 1);
        assert_relative_eq!(acc.ax1_err_sum()[(2, 3)], 1.0);
    }

    #[test]
    fn rounding_absorbs_position_drift() {
        let mut acc = GridAccumulator::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        acc.place(&filled(0.0, 0.0, 3, 0.0));
        let p = acc.place(&filled(2.0 + 1e-9, -1e-9, 3, 0.0));
        assert_eq!((p.row, p.col), (0, 2));
        assert_eq!(acc.shape(), (3, 5));
    }

    #[test]
    fn undefined_cells_are_not_counted() {
        let mut g = filled(0.0, 0.0, 3, 1.0);
        g.ax2_err[(1, 1)] = f64::NAN;
        let mut acc = GridAccumulator::for_zone(&g).unwrap();
        acc.place(&g);
        assert_eq!(acc.counts()[(1, 1)], 0);
        assert_eq!(acc.counts()[(0, 0)], 1);
        assert_relative_eq!(acc.ax1_err_sum()[(1, 1)], 0.0);
    }

    #[test]
    fn travel_presizes_the_grid() {
        let acc = GridAccumulator::with_travel([0.5, 2.0], [0.0, 10.0], [-4.0, 4.0]).unwrap();
        assert_eq!(acc.shape(), (5, 21));
        assert!(acc.is_empty());
        assert_eq!(acc.ax2_positions(), vec![-4.0, -2.0, 0.0, 2.0, 4.0]);

        assert_eq!(
            GridAccumulator::with_travel([1.0, 1.0], [3.0, 3.0], [0.0, 1.0]).unwrap_err(),
            StitchError::InvalidTravel {
                axis: 1,
                min: 3.0,
                max: 3.0
            }
        );
    }

    #[test]
    fn rejects_non_positive_increment() {
        assert_eq!(
            GridAccumulator::new([0.0, 0.0], [1.0, 0.0]).unwrap_err(),
            StitchError::InvalidIncrement { axis: 2, value: 0.0 }
        );
    }
}
