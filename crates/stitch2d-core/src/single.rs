//! Accuracy of one zone on its own, without stitching.

use crate::{estimate_slopes, Matrix, SlopeModel, StitchError, ZoneGrid};
use serde::{Deserialize, Serialize};

/// Detrended, zero-referenced single-zone error map with its statistics.
///
/// Spread is the sample standard deviation (`n - 1` in the denominator),
/// unlike the stitched map which reports RMS about zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneAccuracy {
    pub grid: ZoneGrid,
    pub vector_err: Matrix,
    pub slopes: SlopeModel,
    pub pk_ax1: f64,
    pub pk_ax2: f64,
    pub max_vector: f64,
    pub std_ax1: f64,
    pub std_ax2: f64,
    pub std_vector: f64,
}

/// Scalar statistics of a [`ZoneAccuracy`], without the matrices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpread {
    pub pk_ax1: f64,
    pub pk_ax2: f64,
    pub max_vector: f64,
    pub std_ax1: f64,
    pub std_ax2: f64,
    pub std_vector: f64,
}

impl ZoneAccuracy {
    pub fn stats(&self) -> ZoneSpread {
        ZoneSpread {
            pk_ax1: self.pk_ax1,
            pk_ax2: self.pk_ax2,
            max_vector: self.max_vector,
            std_ax1: self.std_ax1,
            std_ax2: self.std_ax2,
            std_vector: self.std_vector,
        }
    }

    /// Half of the axis-1 peak-to-peak.
    pub fn amplitude_ax1(&self) -> f64 {
        self.pk_ax1 / 2.0
    }

    pub fn amplitude_ax2(&self) -> f64 {
        self.pk_ax2 / 2.0
    }

    pub fn orthogonality_arcsec(&self) -> f64 {
        self.slopes.orthogonality_arcsec
    }
}

/// Remove the zone's own slopes, zero it at the origin cell and measure it.
pub fn process_single_zone(grid: &ZoneGrid) -> Result<ZoneAccuracy, StitchError> {
    let slopes = estimate_slopes(grid)?;
    let mut out = slopes.detrend(grid);
    let (o1, o2) = (out.ax1_err[(0, 0)], out.ax2_err[(0, 0)]);
    if o1.is_finite() && o2.is_finite() {
        out.ax1_err.add_scalar_mut(-o1);
        out.ax2_err.add_scalar_mut(-o2);
    }
    let vector_err = out.ax1_err.zip_map(&out.ax2_err, |a, b| (a * a + b * b).sqrt());

    let (pk_ax1, std_ax1) = spread(&out.ax1_err);
    let (pk_ax2, std_ax2) = spread(&out.ax2_err);
    let (_, std_vector) = spread(&vector_err);
    let max_vector = vector_err
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max);

    Ok(ZoneAccuracy {
        grid: out,
        vector_err,
        slopes,
        pk_ax1,
        pk_ax2,
        max_vector,
        std_ax1,
        std_ax2,
        std_vector,
    })
}

/// Peak-to-peak and sample standard deviation of the finite entries.
fn spread(m: &Matrix) -> (f64, f64) {
    let v: Vec<f64> = m.iter().copied().filter(|v| v.is_finite()).collect();
    if v.is_empty() {
        return (0.0, 0.0);
    }
    let (lo, hi) = v
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    if v.len() < 2 {
        return (hi - lo, 0.0);
    }
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n - 1.0);
    (hi - lo, var.sqrt())
}
