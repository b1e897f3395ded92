//! JSON summary of a stitching run.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use stitch2d_core::{
    ErrorStats, GridLayout, StitchDirection, StitchRun, StitchWarning, ZoneSpread,
};

use crate::IoError;

/// Per-zone outcome as written to the summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneSummary {
    pub id: String,
    pub row: usize,
    pub col: usize,
    pub direction: Option<StitchDirection>,
    pub layout: GridLayout,
    pub unfilled_cells: usize,
    pub orthogonality_arcsec: f64,
    /// Overlap band width, `None` if the zone was not aligned.
    pub overlap_width: Option<usize>,
    /// Offsets `[ax1, ax2]` added to the zone.
    pub offset: Option<[f64; 2]>,
    pub placement: [usize; 2],
    /// Detrended single-zone statistics, sample standard deviation.
    pub accuracy: ZoneSpread,
    pub air_temp: Option<f64>,
    pub mat_temp: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

/// Run-level summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StitchSummary {
    pub serial: String,
    pub model: String,
    pub zone_count: usize,
    pub grid_rows: usize,
    pub grid_cols: usize,
    pub valid_cells: usize,
    pub overlap_cells: usize,
    /// Valid cells as a percentage of the grid.
    pub coverage: f64,
    pub increments: [f64; 2],
    pub orthogonality_arcsec: f64,
    pub stats: ErrorStats,
    /// Mean over the zones with a non-zero reading.
    pub air_temp_mean: Option<f64>,
    pub mat_temp_mean: Option<f64>,
    pub warnings: Vec<StitchWarning>,
    pub zones: Vec<ZoneSummary>,
}

impl StitchSummary {
    pub fn from_run(run: &StitchRun) -> Self {
        let cal = &run.calibration;
        let zones: Vec<ZoneSummary> = run
            .zones
            .iter()
            .map(|z| ZoneSummary {
                id: z.id.clone(),
                row: z.row,
                col: z.col,
                direction: z.direction,
                layout: z.layout,
                unfilled_cells: z.unfilled_cells,
                orthogonality_arcsec: z.slopes.orthogonality_arcsec,
                overlap_width: z.correction.as_ref().map(|c| c.overlap.width()),
                offset: z.correction.as_ref().map(|c| c.offset),
                placement: z.placement,
                accuracy: z.accuracy,
                air_temp: z.metadata.air_temp_value(),
                mat_temp: z.metadata.mat_temp_value(),
                comment: z.metadata.comment.clone(),
            })
            .collect();
        Self {
            serial: run.system.serial.clone(),
            model: run.system.metadata.model.clone(),
            zone_count: run.zone_count,
            grid_rows: cal.rows(),
            grid_cols: cal.cols(),
            valid_cells: cal.valid_cells(),
            overlap_cells: cal.overlap_cells(),
            coverage: cal.coverage(),
            increments: cal.increments,
            orthogonality_arcsec: cal.orthogonality_arcsec,
            stats: cal.stats,
            air_temp_mean: nonzero_mean(zones.iter().filter_map(|z| z.air_temp)),
            mat_temp_mean: nonzero_mean(zones.iter().filter_map(|z| z.mat_temp)),
            warnings: run.warnings.clone(),
            zones,
        }
    }

    pub fn to_json(&self) -> Result<String, IoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

fn nonzero_mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values
        .filter(|v| *v != 0.0)
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch2d_core::synthetic::{axis, zone_measurement};
    use stitch2d_core::{run_stitching, StitchPlan, ZoneConfig, ZoneInput};

    fn zone(id: &str, x0: f64) -> ZoneInput {
        ZoneInput {
            id: id.into(),
            config: ZoneConfig::default(),
            measurement: zone_measurement(&axis(x0, 1.0, 4), &axis(0.0, 1.0, 4), |x, y| {
                (0.001 * x * y, 0.0005 * (x - y))
            }),
        }
    }

    #[test]
    fn summary_reflects_the_run() {
        let run = run_stitching(&StitchPlan::new(1, 2), &[zone("a", 0.0), zone("b", 10.0)])
            .expect("run");
        let summary = StitchSummary::from_run(&run);
        assert_eq!(summary.zone_count, 2);
        assert_eq!((summary.grid_rows, summary.grid_cols), (4, 14));
        assert_eq!(summary.valid_cells, 32);
        assert_eq!(summary.overlap_cells, 0);
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(summary.zones[0].direction, None);
        assert_eq!(summary.zones[1].placement, [0, 10]);
        assert_eq!(summary.zones[1].offset, None);
    }

    #[test]
    fn temperature_means_skip_zero_and_missing_readings() {
        let mut zones = vec![zone("a", 0.0), zone("b", 3.0), zone("c", 6.0)];
        zones[0].config.metadata.air_temp = "20.0".into();
        zones[0].config.metadata.mat_temp = "0".into();
        zones[1].config.metadata.air_temp = " 21.0 ".into();
        zones[1].config.metadata.mat_temp = "19.5".into();
        zones[2].config.metadata.air_temp = "n/a".into();
        let run = run_stitching(&StitchPlan::new(1, 3), &zones).expect("run");
        let summary = StitchSummary::from_run(&run);

        assert_eq!(summary.zones[0].air_temp, Some(20.0));
        assert_eq!(summary.zones[0].mat_temp, Some(0.0));
        assert_eq!(summary.zones[2].air_temp, None);
        assert_eq!(summary.air_temp_mean, Some(20.5));
        assert_eq!(summary.mat_temp_mean, Some(19.5));
        assert_eq!(nonzero_mean([0.0, 0.0].into_iter()), None);
    }

    #[test]
    fn json_round_trip() {
        let run = run_stitching(&StitchPlan::new(1, 2), &[zone("a", 0.0), zone("b", 10.0)])
            .expect("run");
        let summary = StitchSummary::from_run(&run);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("summary.json");
        summary.write_json(&path).expect("write");
        let json = fs::read_to_string(&path).expect("read");
        assert!(json.contains("\"kind\": \"missing_overlap\""));
        let loaded = StitchSummary::load_json(&path).expect("load");
        assert_eq!(loaded.warnings, summary.warnings);
        assert_eq!(loaded.zones[1].placement, [0, 10]);
        assert_eq!(loaded.valid_cells, 32);
    }
}
