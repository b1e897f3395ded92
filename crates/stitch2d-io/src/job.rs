//! JSON job description for a stitching run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stitch2d_core::{StitchPlan, UnitSystem};

#[derive(thiserror::Error, Debug)]
pub enum IoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_output_cal() -> String {
    "stitched_multizone.cal".to_string()
}

fn default_output_dat() -> String {
    "stitched_multizone_accuracy.dat".to_string()
}

/// Zone layout, input files and output paths of one run.
///
/// Relative paths are taken as given unless the job is loaded with
/// [`StitchJobConfig::load_json`], which resolves them against the job
/// file's directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchJobConfig {
    pub rows: usize,
    pub cols: usize,
    /// Zone files in row-major order.
    pub zones: Vec<String>,
    #[serde(default = "default_output_cal")]
    pub output_cal: String,
    #[serde(default = "default_output_dat")]
    pub output_dat: String,
    /// Legacy CRLF calibration file; defaults to `<cal stem>_start2d.cal`.
    #[serde(default)]
    pub legacy_cal: Option<String>,
    /// Optional JSON run summary.
    #[serde(default)]
    pub report: Option<String>,
    /// Overrides the unit system written to the calibration headers.
    #[serde(default)]
    pub user_unit: Option<UnitSystem>,
    #[serde(default)]
    pub travel_ax1: Option<[f64; 2]>,
    #[serde(default)]
    pub travel_ax2: Option<[f64; 2]>,
}

impl StitchJobConfig {
    pub fn new(rows: usize, cols: usize, zones: Vec<String>) -> Self {
        Self {
            rows,
            cols,
            zones,
            output_cal: default_output_cal(),
            output_dat: default_output_dat(),
            legacy_cal: None,
            report: None,
            user_unit: None,
            travel_ax1: None,
            travel_ax2: None,
        }
    }

    /// Load a JSON job from disk, resolving relative paths against its directory.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&raw)?;
        Ok(match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => cfg.resolved_against(dir),
            _ => cfg,
        })
    }

    /// Write this job to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), IoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Copy of the job with every relative path joined onto `dir`.
    pub fn resolved_against(&self, dir: &Path) -> Self {
        let join = |p: &str| -> String {
            let p = Path::new(p);
            if p.is_absolute() {
                p.display().to_string()
            } else {
                dir.join(p).display().to_string()
            }
        };
        Self {
            zones: self.zones.iter().map(|z| join(z)).collect(),
            output_cal: join(&self.output_cal),
            output_dat: join(&self.output_dat),
            legacy_cal: self.legacy_cal.as_deref().map(join),
            report: self.report.as_deref().map(join),
            ..self.clone()
        }
    }

    /// Engine plan for this job.
    pub fn plan(&self) -> StitchPlan {
        let mut plan = StitchPlan::new(self.rows, self.cols);
        plan.travel_ax1 = self.travel_ax1;
        plan.travel_ax2 = self.travel_ax2;
        plan
    }

    pub fn zone_paths(&self) -> Vec<PathBuf> {
        self.zones.iter().map(PathBuf::from).collect()
    }

    pub fn output_cal_path(&self) -> PathBuf {
        PathBuf::from(&self.output_cal)
    }

    pub fn output_dat_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dat)
    }

    /// Legacy calibration path, next to the current one by default.
    pub fn legacy_cal_path(&self) -> PathBuf {
        if let Some(p) = &self.legacy_cal {
            return PathBuf::from(p);
        }
        let cal = self.output_cal_path();
        let stem = cal
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stitched_multizone".to_string());
        cal.with_file_name(format!("{stem}_start2d.cal"))
    }

    pub fn report_path(&self) -> Option<PathBuf> {
        self.report.as_ref().map(PathBuf::from)
    }
}
