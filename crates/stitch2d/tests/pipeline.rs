use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use stitch2d::core::synthetic::{axis, zone_measurement};
use stitch2d::core::{AxisConfig, ZoneConfig};
use stitch2d::io::{read_cal_table, render_zone_file, CalTable, StitchJobConfig, StitchSummary};
use stitch2d::{calibrate, CalibrateError};

fn config() -> ZoneConfig {
    let mut cfg = ZoneConfig {
        serial: "SN-77".into(),
        ax1: AxisConfig::new("X", 1, 1),
        ax2: AxisConfig::new("Y", 2, 1),
        ..ZoneConfig::default()
    };
    cfg.metadata.model = "XY-300".into();
    cfg
}

/// Smooth stage error shared by every zone, in mm.
fn stage_error(x: f64, y: f64) -> (f64, f64) {
    (1e-3 * (0.4 * x).sin() * (0.2 * y).cos(), 8e-4 * (0.3 * y).sin() + 2e-4 * (0.5 * x).cos())
}

fn write_zones(dir: &Path, rows: usize, cols: usize) -> Vec<String> {
    let mut paths = Vec::new();
    for r in 0..rows {
        for c in 0..cols {
            let m = zone_measurement(
                &axis(4.0 * c as f64, 1.0, 6),
                &axis(4.0 * r as f64, 1.0, 6),
                stage_error,
            );
            let path = dir.join(format!("zone_r{}c{}.dat", r + 1, c + 1));
            fs::write(&path, render_zone_file(&config(), &m)).expect("write zone");
            paths.push(path.display().to_string());
        }
    }
    paths
}

#[test]
fn two_by_two_job_writes_every_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut job = StitchJobConfig::new(2, 2, write_zones(dir.path(), 2, 2));
    job.output_cal = dir.path().join("map.cal").display().to_string();
    job.output_dat = dir.path().join("map.dat").display().to_string();
    job.report = Some(dir.path().join("summary.json").display().to_string());

    let result = calibrate(&job).expect("calibrate");
    assert_eq!(result.written.len(), 4);
    for path in &result.written {
        assert!(path.exists(), "{} missing", path.display());
    }

    let cal = &result.run.calibration;
    assert_eq!((cal.rows(), cal.cols()), (10, 10));
    assert_eq!(cal.valid_cells(), 100);
    assert_eq!(cal.ax1_err[(0, 0)], 0.0);

    let table = read_cal_table(dir.path().join("map.cal")).expect("cal table");
    assert_eq!((table.rows(), table.cols()), (12, 12));
    let expected = CalTable::from_calibration(cal);
    assert!(table.max_abs_diff(&expected).expect("shape") < 1e-9);
    assert!(dir.path().join("map_start2d.cal").exists());

    let dat = fs::read_to_string(dir.path().join("map.dat")).expect("dat");
    assert!(dat.starts_with(
        "% Multi-Zone 2D Accuracy Calibration Results\n% System: XY-300 (S/N: SN-77)\n"
    ));
    assert_eq!(dat.lines().filter(|l| !l.starts_with('%')).count(), 100);

    let summary = StitchSummary::load_json(dir.path().join("summary.json")).expect("summary");
    assert_eq!(summary.zone_count, 4);
    assert_eq!(summary.zones.len(), 4);
    assert_relative_eq!(summary.coverage, 100.0);
}

#[test]
fn failed_run_leaves_no_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let zones = write_zones(dir.path(), 1, 2);
    fs::write(&zones[1], "S/N: 1\n%Ax1Name: X; Ax1Num: 1; Ax1Sign: 1\n").expect("corrupt");
    let mut job = StitchJobConfig::new(1, 2, zones);
    job.output_cal = dir.path().join("map.cal").display().to_string();
    job.output_dat = dir.path().join("map.dat").display().to_string();

    let err = calibrate(&job).unwrap_err();
    assert!(matches!(err, CalibrateError::Zone { .. }));
    assert!(!dir.path().join("map.cal").exists());
    assert!(!dir.path().join("map.dat").exists());
    assert!(!dir.path().join("map_start2d.cal").exists());
}
