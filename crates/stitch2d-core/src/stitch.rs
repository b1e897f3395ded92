//! Overlap detection and zone-to-zone correction.
//!
//! A new zone (slave) is aligned to already-placed data (master) inside
//! their shared band:
//!
//! - **column** stitching (zone to the right, same row): the slave's axis-1
//!   straightness slope is replaced by the master's, the coupled axis-2
//!   orthogonality term is corrected with `MEAS_DIR` times the same lines,
//!   then both axes receive a scalar offset so the band means agree;
//! - **row** stitching (first zone of a new row, below the previous row's
//!   first zone): only the axis-2 slope is replaced, then both axes receive
//!   the scalar offset.
//!
//! The two branches detect the band differently: columns count slave
//! positions below the master's maximum, rows compare positions directly.

use crate::slope::{block_mean, col_means, row_means, MEAS_DIR};
use crate::{LineFit, StitchError, ZoneGrid};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Where the slave sits relative to its master.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StitchDirection {
    /// Next zone in the same row.
    Column,
    /// First zone of the next row.
    Row,
}

/// Grid lines shared by master and slave.
///
/// Indices are columns for [`StitchDirection::Column`] and rows for
/// [`StitchDirection::Row`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlapBand {
    pub direction: StitchDirection,
    pub master: Vec<usize>,
    pub slave: Vec<usize>,
}

impl OverlapBand {
    /// Number of shared lines on the slave side.
    pub fn width(&self) -> usize {
        self.slave.len()
    }
}

/// What was applied to a slave zone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchCorrection {
    pub overlap: OverlapBand,
    /// Straightness of the master band: axis 1 vs step position for column
    /// stitching, axis 2 vs scan position for row stitching.
    pub master_fit: LineFit,
    /// Same fit on the slave band.
    pub slave_fit: LineFit,
    /// Scalar offsets `[ax1, ax2]` added to the whole slave after the slope
    /// correction.
    pub offset: [f64; 2],
}

/// Corrected slave and the correction record (`None` if no overlap was found).
#[derive(Clone, Debug)]
pub struct StitchOutcome {
    pub zone: ZoneGrid,
    pub correction: Option<StitchCorrection>,
}

impl StitchOutcome {
    pub fn is_aligned(&self) -> bool {
        self.correction.is_some()
    }
}

/// Find the band shared by `master` and `slave`.
pub fn detect_overlap(
    master: &ZoneGrid,
    slave: &ZoneGrid,
    direction: StitchDirection,
) -> Option<OverlapBand> {
    match direction {
        StitchDirection::Column => {
            let max_master_x = master.max_x();
            let k = slave
                .ax1_positions()
                .iter()
                .take_while(|&&x| x < max_master_x)
                .count()
                .min(master.cols());
            if k == 0 {
                return None;
            }
            let mc = master.cols();
            Some(OverlapBand {
                direction,
                master: (mc - k..mc).collect(),
                slave: (0..k).collect(),
            })
        }
        StitchDirection::Row => {
            let min_slave_y = slave.min_y();
            let max_master_y = master.max_y();
            let m: Vec<usize> = master
                .ax2_positions()
                .iter()
                .enumerate()
                .filter(|(_, &y)| y >= min_slave_y)
                .map(|(r, _)| r)
                .collect();
            let s: Vec<usize> = slave
                .ax2_positions()
                .iter()
                .enumerate()
                .filter(|(_, &y)| y <= max_master_y)
                .map(|(r, _)| r)
                .collect();
            if m.is_empty() || s.is_empty() {
                return None;
            }
            Some(OverlapBand {
                direction,
                master: m,
                slave: s,
            })
        }
    }
}

/// Align `slave` to `master` and return a corrected copy.
///
/// Neither input is modified. A missing overlap is not an error: the slave
/// comes back unchanged with `correction == None`.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "debug",
        skip(master, slave),
        fields(master = ?master.shape(), slave = ?slave.shape())
    )
)]
pub fn stitch_zone(
    master: &ZoneGrid,
    slave: &ZoneGrid,
    direction: StitchDirection,
) -> Result<StitchOutcome, StitchError> {
    let Some(overlap) = detect_overlap(master, slave, direction) else {
        warn!("no overlap found for {direction:?} stitching; zone left uncorrected");
        return Ok(StitchOutcome {
            zone: slave.clone(),
            correction: None,
        });
    };

    let correction = match direction {
        StitchDirection::Column => correct_column(master, slave, overlap)?,
        StitchDirection::Row => correct_row(master, slave, overlap)?,
    };
    Ok(correction)
}

fn correct_column(
    master: &ZoneGrid,
    slave: &ZoneGrid,
    overlap: OverlapBand,
) -> Result<StitchOutcome, StitchError> {
    info!(
        "overlap: master cols {:?}, slave cols {:?} (k={})",
        overlap.master.first().zip(overlap.master.last()),
        overlap.slave.first().zip(overlap.slave.last()),
        overlap.width()
    );
    let m_rows: Vec<usize> = (0..master.rows()).collect();
    let s_rows: Vec<usize> = (0..slave.rows()).collect();

    let master_profile = row_means(&master.ax1_err, &m_rows, &overlap.master, &|_, _| true);
    let slave_profile = row_means(&slave.ax1_err, &s_rows, &overlap.slave, &|_, _| true);
    let master_fit = LineFit::fit_profile(&master.ax2_positions(), &master_profile).ok_or(
        StitchError::DegenerateFit {
            axis: 1,
            context: "master overlap band has fewer than two step positions",
        },
    )?;
    let slave_fit = LineFit::fit_profile(&slave.ax2_positions(), &slave_profile).ok_or(
        StitchError::DegenerateFit {
            axis: 1,
            context: "slave overlap band has fewer than two step positions",
        },
    )?;
    debug!(
        "ax1 slope correction: master={:.6}, slave={:.6}",
        master_fit.slope, slave_fit.slope
    );

    let mut out = slave.clone();
    let step = slave.ax2_positions();
    for c in 0..out.cols() {
        for r in 0..out.rows() {
            out.ax1_err[(r, c)] =
                out.ax1_err[(r, c)] - slave_fit.eval(step[r]) + master_fit.eval(step[r]);
        }
    }

    // Axis-2 straightness is coupled to the axis-1 slope through orthogonality.
    let master_orth = master_fit.scaled(MEAS_DIR);
    let slave_orth = slave_fit.scaled(MEAS_DIR);
    for r in 0..out.rows() {
        for c in 0..out.cols() {
            let x = slave.x[(r, c)];
            out.ax2_err[(r, c)] = out.ax2_err[(r, c)] - slave_orth.eval(x) + master_orth.eval(x);
        }
    }

    let offset = [
        band_offset(
            &master.ax1_err,
            &out.ax1_err,
            (&m_rows, &overlap.master),
            (&s_rows, &overlap.slave),
        ),
        band_offset(
            &master.ax2_err,
            &out.ax2_err,
            (&m_rows, &overlap.master),
            (&s_rows, &overlap.slave),
        ),
    ];
    apply_offset(&mut out, offset);
    info!(
        "offset corrections: ax1={:.3}, ax2={:.3}",
        offset[0], offset[1]
    );

    Ok(StitchOutcome {
        zone: out,
        correction: Some(StitchCorrection {
            overlap,
            master_fit,
            slave_fit,
            offset,
        }),
    })
}

fn correct_row(
    master: &ZoneGrid,
    slave: &ZoneGrid,
    overlap: OverlapBand,
) -> Result<StitchOutcome, StitchError> {
    info!(
        "overlap: master rows {:?}, slave rows {:?}",
        overlap.master.first().zip(overlap.master.last()),
        overlap.slave.first().zip(overlap.slave.last()),
    );
    let m_cols: Vec<usize> = (0..master.cols()).collect();
    let s_cols: Vec<usize> = (0..slave.cols()).collect();

    let master_profile = col_means(&master.ax2_err, &overlap.master, &m_cols, &|_, _| true);
    let slave_profile = col_means(&slave.ax2_err, &overlap.slave, &s_cols, &|_, _| true);
    let master_fit = LineFit::fit_profile(&master.ax1_positions(), &master_profile).ok_or(
        StitchError::DegenerateFit {
            axis: 2,
            context: "master overlap band has fewer than two scan positions",
        },
    )?;
    let slave_fit = LineFit::fit_profile(&slave.ax1_positions(), &slave_profile).ok_or(
        StitchError::DegenerateFit {
            axis: 2,
            context: "slave overlap band has fewer than two scan positions",
        },
    )?;
    debug!(
        "ax2 slope correction: master={:.6}, slave={:.6}",
        master_fit.slope, slave_fit.slope
    );

    // No coupled axis-1 term on this branch; the offset below is the only
    // axis-1 adjustment.
    let mut out = slave.clone();
    for r in 0..out.rows() {
        for c in 0..out.cols() {
            let x = slave.x[(r, c)];
            out.ax2_err[(r, c)] = out.ax2_err[(r, c)] - slave_fit.eval(x) + master_fit.eval(x);
        }
    }

    let offset = [
        band_offset(
            &master.ax1_err,
            &out.ax1_err,
            (&overlap.master, &m_cols),
            (&overlap.slave, &s_cols),
        ),
        band_offset(
            &master.ax2_err,
            &out.ax2_err,
            (&overlap.master, &m_cols),
            (&overlap.slave, &s_cols),
        ),
    ];
    apply_offset(&mut out, offset);
    info!(
        "offset corrections: ax1={:.3}, ax2={:.3}",
        offset[0], offset[1]
    );

    Ok(StitchOutcome {
        zone: out,
        correction: Some(StitchCorrection {
            overlap,
            master_fit,
            slave_fit,
            offset,
        }),
    })
}

/// `mean(master band) - mean(slave band)`, zero when either band is empty.
fn band_offset(
    master: &crate::Matrix,
    slave: &crate::Matrix,
    (m_rows, m_cols): (&[usize], &[usize]),
    (s_rows, s_cols): (&[usize], &[usize]),
) -> f64 {
    match (
        block_mean(master, m_rows, m_cols),
        block_mean(slave, s_rows, s_cols),
    ) {
        (Some(m), Some(s)) => m - s,
        _ => {
            warn!("overlap band has no finite cells; offset not applied");
            0.0
        }
    }
}

fn apply_offset(zone: &mut ZoneGrid, offset: [f64; 2]) {
    zone.ax1_err.add_scalar_mut(offset[0]);
    zone.ax2_err.add_scalar_mut(offset[1]);
}

/// Stitching masters carried through the row-major zone loop.
///
/// `column` is the most recently placed zone (master for the next column);
/// `row` is the first zone of the latest row (master for the first zone of
/// the next row). Both are snapshots that are replaced, never merged.
#[derive(Clone, Debug, Default)]
pub struct StitchMasters {
    column: Option<ZoneGrid>,
    row: Option<ZoneGrid>,
}

impl StitchMasters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Master and stitch direction for the zone at `(row, col)`; `None` for
    /// the first zone of the plan.
    pub fn master_for(&self, row: usize, col: usize) -> Option<(&ZoneGrid, StitchDirection)> {
        if col > 0 {
            self.column.as_ref().map(|m| (m, StitchDirection::Column))
        } else if row > 0 {
            self.row.as_ref().map(|m| (m, StitchDirection::Row))
        } else {
            None
        }
    }

    /// Snapshots after placing `zone` at `(row, col)`.
    pub fn advance(self, col: usize, zone: &ZoneGrid) -> Self {
        let row = if col == 0 { Some(zone.clone()) } else { self.row };
        Self {
            column: Some(zone.clone()),
            row,
        }
    }

    pub fn column_master(&self) -> Option<&ZoneGrid> {
        self.column.as_ref()
    }

    pub fn row_master(&self) -> Option<&ZoneGrid> {
        self.row.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::axis;
    use crate::{estimate_slopes, Matrix};
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

    fn assert_matrix_eq(a: &Matrix, b: &Matrix, eps: f64) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = eps);
        }
    }

    #[test]
    fn column_overlap_counts_slave_positions_below_master_max() {
        let master = zone(0.0, 0.0, 6, |_, _| (0.0, 0.0));
        let slave = zone(3.0, 0.0, 6, |_, _| (0.0, 0.0));
        let band = detect_overlap(&master, &slave, StitchDirection::Column).expect("overlap");
        // Slave x = 3, 4 are below max(master x) = 5; x = 5 is not.
        assert_eq!(band.slave, vec![0, 1]);
        assert_eq!(band.master, vec![4, 5]);
    }

    #[test]
    fn single_shared_column_is_not_an_overlap() {
        let master = zone(0.0, 0.0, 4, |_, _| (0.0, 0.0));
        let slave = zone(3.0, 0.0, 4, |_, _| (0.0, 0.0));
        assert!(detect_overlap(&master, &slave, StitchDirection::Column).is_none());
    }

    #[test]
    fn row_overlap_compares_positions_directly() {
        let master = zone(0.0, 0.0, 4, |_, _| (0.0, 0.0));
        let slave = zone(0.0, 3.0, 4, |_, _| (0.0, 0.0));
        let band = detect_overlap(&master, &slave, StitchDirection::Row).expect("overlap");
        assert_eq!(band.master, vec![3]);
        assert_eq!(band.slave, vec![0]);
    }

    #[test]
    fn row_self_stitch_is_identity() {
        let g = zone(0.0, 0.0, 5, |x, y| (0.3 * y + (x * y).sin(), -0.2 * x + (x - y).cos()));
        let out = stitch_zone(&g, &g, StitchDirection::Row).expect("stitch");
        let corr = out.correction.as_ref().expect("aligned");
        assert_eq!(corr.overlap.width(), 5);
        assert_relative_eq!(corr.offset[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(corr.offset[1], 0.0, epsilon = 1e-12);
        assert_matrix_eq(&out.zone.ax1_err, &g.ax1_err, 1e-12);
        assert_matrix_eq(&out.zone.ax2_err, &g.ax2_err, 1e-12);
    }

    #[test]
    fn column_self_stitch_with_scan_invariant_errors_is_identity() {
        let g = zone(0.0, 0.0, 5, |_, y| (0.3 * y + y.sin(), 0.5 - 0.1 * y));
        let out = stitch_zone(&g, &g, StitchDirection::Column).expect("stitch");
        assert!(out.is_aligned());
        assert_matrix_eq(&out.zone.ax1_err, &g.ax1_err, 1e-12);
        assert_matrix_eq(&out.zone.ax2_err, &g.ax2_err, 1e-12);
    }

    #[test]
    fn column_stitch_matches_master_slope_and_level() {
        let master = zone(0.0, 0.0, 8, |_, y| (0.2 * y, 0.0));
        let slave = zone(5.0, 0.0, 8, |_, y| (-0.1 * y + 4.0, 1.5));
        let out = stitch_zone(&master, &slave, StitchDirection::Column).expect("stitch");
        let corr = out.correction.expect("aligned");
        assert_relative_eq!(corr.master_fit.slope, 0.2, epsilon = 1e-12);
        assert_relative_eq!(corr.slave_fit.slope, -0.1, epsilon = 1e-12);

        // Slave now carries the master's axis-1 straightness exactly.
        let fixed = estimate_slopes(&out.zone).expect("fit");
        assert_relative_eq!(fixed.ax1.slope, 0.2, epsilon = 1e-12);
        for r in 0..8 {
            assert_relative_eq!(out.zone.ax1_err[(r, 0)], master.ax1_err[(r, 5)], epsilon = 1e-12);
        }

        // Coupled term: axis 2 gained -(0.2 - (-0.1)) * x ...
        let x = out.zone.x[(0, 3)];
        let x0 = out.zone.x[(0, 0)];
        let d = out.zone.ax2_err[(0, 3)] - out.zone.ax2_err[(0, 0)];
        assert_relative_eq!(d, MEAS_DIR * 0.3 * (x - x0), epsilon = 1e-12);
        // ... and its band mean agrees with the master's.
        let m = block_mean(&master.ax2_err, &(0..8).collect::<Vec<_>>(), &corr.overlap.master);
        let s = block_mean(&out.zone.ax2_err, &(0..8).collect::<Vec<_>>(), &corr.overlap.slave);
        assert_relative_eq!(m.unwrap(), s.unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn row_stitch_leaves_axis1_slope_alone() {
        let master = zone(0.0, 0.0, 6, |x, _| (0.0, 0.05 * x));
        let slave = zone(0.0, 4.0, 6, |x, y| (0.3 * y, -0.05 * x + 2.0));
        let out = stitch_zone(&master, &slave, StitchDirection::Row).expect("stitch");
        let corr = out.correction.expect("aligned");
        assert_eq!(corr.overlap.master, vec![4, 5]);
        assert_eq!(corr.overlap.slave, vec![0, 1]);

        let fixed = estimate_slopes(&out.zone).expect("fit");
        assert_relative_eq!(fixed.ax2.slope, 0.05, epsilon = 1e-12);
        assert_relative_eq!(fixed.ax1.slope, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn missing_overlap_returns_the_slave_untouched() {
        let master = zone(0.0, 0.0, 4, |_, _| (1.0, 1.0));
        let slave = zone(20.0, 0.0, 4, |x, _| (x, -x));
        let out = stitch_zone(&master, &slave, StitchDirection::Column).expect("stitch");
        assert!(!out.is_aligned());
        assert_eq!(out.zone, slave);
    }

    #[test]
    fn masters_follow_row_major_order() {
        let a = zone(0.0, 0.0, 3, |_, _| (0.0, 0.0));
        let b = zone(2.0, 0.0, 3, |_, _| (0.0, 0.0));
        let c = zone(0.0, 2.0, 3, |_, _| (0.0, 0.0));

        let masters = StitchMasters::new();
        assert!(masters.master_for(0, 0).is_none());
        let masters = masters.advance(0, &a);
        let masters = masters.advance(1, &b);
        let (m, dir) = masters.master_for(1, 0).expect("row master");
        assert_eq!(dir, StitchDirection::Row);
        assert_eq!(m, &a);
        let (m, dir) = masters.master_for(0, 2).expect("column master");
        assert_eq!(dir, StitchDirection::Column);
        assert_eq!(m, &b);

        let masters = masters.advance(0, &c);
        assert_eq!(masters.row_master(), Some(&c));
        assert_eq!(masters.column_master(), Some(&c));
    }
}
