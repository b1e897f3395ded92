//! Tab-separated accuracy report of the stitched map.

use stitch2d_core::{StitchRun, UnitSystem};

/// Render the accuracy report: a `%` header, then one line per valid cell
/// in row-major order.
pub fn render_accuracy_report(run: &StitchRun, units: Option<UnitSystem>) -> String {
    let cal = &run.calibration;
    let sys = &run.system;
    let mut out = String::from("% Multi-Zone 2D Accuracy Calibration Results\n");
    out.push_str(&format!(
        "% System: {} (S/N: {})\n",
        sys.metadata.model, sys.serial
    ));
    out.push_str(&format!("% Zones processed: {}\n", run.zone_count));
    out.push_str(&format!(
        "% Grid size: {} x {} points\n",
        cal.rows(),
        cal.cols()
    ));
    out.push_str(&format!(
        "% Units: {}\n",
        units.unwrap_or(sys.units).as_str()
    ));
    out.push_str("% Ax1TestLoc Ax2TestLoc Ax1Err Ax2Err VectorErr AvgCount\n");
    for rc in cal.valid_indices() {
        out.push_str(&format!(
            "{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{}\n",
            cal.x[rc],
            cal.y[rc],
            cal.ax1_err[rc],
            cal.ax2_err[rc],
            cal.vector_err[rc],
            cal.avg_count[rc]
        ));
    }
    out
}
