//! Synthetic zone measurements for tests, benches and demos.

use crate::{RawMeasurement, RawSample};

/// Build a complete rectangular measurement over `ax1 x ax2` commanded
/// positions, with raw relative errors given by `err(x, y) -> (e1, e2)`.
///
/// Samples are emitted in file order (scan-major) with 1-based indices and
/// no unit scaling.
pub fn zone_measurement<F>(ax1: &[f64], ax2: &[f64], err: F) -> RawMeasurement
where
    F: Fn(f64, f64) -> (f64, f64),
{
    RawMeasurement::from_samples(zone_samples(ax1, ax2, err), 1.0).unwrap_or_default()
}

/// Raw samples of [`zone_measurement`], before sorting and scaling.
pub fn zone_samples<F>(ax1: &[f64], ax2: &[f64], err: F) -> Vec<RawSample>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let mut out = Vec::with_capacity(ax1.len() * ax2.len());
    for (j, &y) in ax2.iter().enumerate() {
        for (i, &x) in ax1.iter().enumerate() {
            let (e1, e2) = err(x, y);
            out.push(RawSample {
                ax1_index: i + 1,
                ax2_index: j + 1,
                ax1_pos: x,
                ax2_pos: y,
                ax1_err: e1,
                ax2_err: e2,
            });
        }
    }
    out
}

/// Evenly spaced positions `start, start + step, ...` (`n` values).
pub fn axis(start: f64, step: f64, n: usize) -> Vec<f64> {
    (0..n).map(|k| start + step * k as f64).collect()
}
