//! End-to-end run: zone files in, calibration files out.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use stitch2d_core::{run_stitching, StitchError, StitchRun, ZoneInput};
use stitch2d_io::{
    read_zone_input, render_accuracy_report, render_cal_table, render_legacy_cal_table,
    CalFileError, CalFileInfo, CalTable, IoError, StitchJobConfig, StitchSummary, ZoneFileError,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced by [`calibrate`].
#[derive(thiserror::Error, Debug)]
pub enum CalibrateError {
    #[error("{}: {source}", path.display())]
    Zone {
        path: PathBuf,
        #[source]
        source: ZoneFileError,
    },
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error(transparent)]
    CalFile(#[from] CalFileError),
    #[error(transparent)]
    Report(#[from] IoError),
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Rendered output files, not yet written.
#[derive(Clone, Debug)]
pub struct RenderedOutputs {
    pub files: Vec<(PathBuf, String)>,
}

impl RenderedOutputs {
    pub fn get(&self, path: &Path) -> Option<&str> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, text)| text.as_str())
    }
}

/// Outcome of [`calibrate`].
#[derive(Clone, Debug)]
pub struct Calibration {
    pub run: StitchRun,
    /// Paths written, in write order.
    pub written: Vec<PathBuf>,
}

/// Read the job's zone files in order. Each zone is identified by its file name.
pub fn load_zones(job: &StitchJobConfig) -> Result<Vec<ZoneInput>, CalibrateError> {
    job.zone_paths()
        .into_iter()
        .map(|path| {
            read_zone_input(&path).map_err(|source| CalibrateError::Zone { path, source })
        })
        .collect()
}

/// Render every output of `run` as configured by `job`.
pub fn render_outputs(
    run: &StitchRun,
    job: &StitchJobConfig,
) -> Result<RenderedOutputs, CalibrateError> {
    let info = CalFileInfo::from_run(run, job.user_unit);
    let table = CalTable::from_calibration(&run.calibration);
    let mut files = vec![
        (job.output_cal_path(), render_cal_table(&table, &info)?),
        (job.legacy_cal_path(), render_legacy_cal_table(&table, &info)?),
        (
            job.output_dat_path(),
            render_accuracy_report(run, job.user_unit),
        ),
    ];
    if let Some(path) = job.report_path() {
        files.push((path, StitchSummary::from_run(run).to_json()?));
    }
    Ok(RenderedOutputs { files })
}

/// Load, stitch and write everything `job` asks for.
///
/// Nothing is written unless the whole run succeeds. Outputs are staged as
/// temporary siblings and only renamed into place once all of them exist.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(zones = job.zones.len()))
)]
pub fn calibrate(job: &StitchJobConfig) -> Result<Calibration, CalibrateError> {
    let plan = job.plan();
    plan.validate_zones(job.zones.len())?;
    let zones = load_zones(job)?;
    let run = run_stitching(&plan, &zones)?;
    let outputs = render_outputs(&run, job)?;

    let written = write_outputs(&outputs.files)?;
    for path in &written {
        info!("wrote {}", path.display());
    }
    let stats = &run.calibration.stats;
    info!(
        "peak-to-peak ax1 {:.3}, ax2 {:.3}, vector {:.3}; orthogonality {:.2} arcsec",
        stats.pk_ax1, stats.pk_ax2, stats.pk_vector, run.calibration.orthogonality_arcsec
    );
    Ok(Calibration { run, written })
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn remove_all<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) {
    for p in paths {
        let _ = fs::remove_file(p);
    }
}

/// Write `files` as one set: stage every temporary file, then rename them
/// all. On failure the staged files and the outputs already renamed by this
/// call are removed, so a run never leaves a partial set behind.
fn write_outputs(files: &[(PathBuf, String)]) -> Result<Vec<PathBuf>, CalibrateError> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, text) in files {
        let tmp = temp_path(path);
        if let Err(source) = fs::write(&tmp, text) {
            remove_all(&staged);
            return Err(CalibrateError::Write {
                path: path.clone(),
                source,
            });
        }
        staged.push(tmp);
    }

    let mut written = Vec::with_capacity(files.len());
    for (k, ((path, _), tmp)) in files.iter().zip(&staged).enumerate() {
        if let Err(source) = fs::rename(tmp, path) {
            remove_all(&staged[k..]);
            remove_all(&written);
            return Err(CalibrateError::Write {
                path: path.clone(),
                source,
            });
        }
        written.push(path.clone());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outputs_replace_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.cal");
        fs::write(&path, "old").unwrap();
        let written = write_outputs(&[(path.clone(), "new".into())]).unwrap();
        assert_eq!(written, vec![path.clone()]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join(".table.cal.tmp").exists());
    }

    #[test]
    fn failed_staging_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("table.cal");
        let unreachable = dir.path().join("no-such-dir").join("report.dat");
        let err = write_outputs(&[(good.clone(), "a".into()), (unreachable.clone(), "b".into())])
            .unwrap_err();
        assert!(matches!(err, CalibrateError::Write { ref path, .. } if *path == unreachable));
        assert!(!good.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_rename_removes_the_outputs_of_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("table.cal");
        // A non-empty directory cannot be replaced by a file.
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "x").unwrap();

        let err = write_outputs(&[(first.clone(), "a".into()), (blocked.clone(), "b".into())])
            .unwrap_err();
        assert!(matches!(err, CalibrateError::Write { ref path, .. } if *path == blocked));
        assert!(!first.exists());
        assert!(!dir.path().join(".table.cal.tmp").exists());
        assert!(!dir.path().join(".blocked.tmp").exists());
        assert!(blocked.join("keep").exists());
    }

    #[test]
    fn bad_plan_fails_before_reading_files() {
        let job = StitchJobConfig::new(2, 2, vec!["missing.dat".into()]);
        assert!(matches!(
            calibrate(&job),
            Err(CalibrateError::Stitch(StitchError::ZoneCountMismatch { .. }))
        ));
    }

    #[test]
    fn missing_zone_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.dat");
        let job = StitchJobConfig::new(1, 1, vec![missing.display().to_string()]);
        match calibrate(&job) {
            Err(CalibrateError::Zone { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected {other:?}"),
        }
    }
}
