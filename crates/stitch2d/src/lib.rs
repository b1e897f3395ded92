//! Multi-zone 2D stage calibration.
//!
//! This crate provides:
//! - re-exports of the engine (`stitch2d::core`) and file formats (`stitch2d::io`)
//! - [`calibrate`], which reads the zone files of a job, stitches them and
//!   writes the calibration tables and accuracy report
//! - the `stitch2d` command-line tool (feature `cli`)
//!
//! ## Quickstart
//!
//! ```no_run
//! use stitch2d::io::StitchJobConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let job = StitchJobConfig::load_json("job.json")?;
//! let result = stitch2d::calibrate(&job)?;
//! println!(
//!     "{} zones, vector error {:.3} pk",
//!     result.run.zone_count, result.run.calibration.stats.pk_vector
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `stitch2d::core`: grid building, slope fits, zone stitching, accumulation, finalization.
//! - `stitch2d::io`: zone files, job JSON, `:START2D` tables, accuracy and summary reports.

pub use stitch2d_core as core;
pub use stitch2d_io as io;

pub use stitch2d_core::{run_stitching, StitchError, StitchPlan, StitchRun, StitchWarning};
pub use stitch2d_io::StitchJobConfig;

mod calibrate;

pub use calibrate::{
    calibrate, load_zones, render_outputs, CalibrateError, Calibration, RenderedOutputs,
};

/// Route `log` records and `tracing` spans to stderr.
///
/// With the `tracing` feature `RUST_LOG` takes precedence over `level`;
/// without it the plain stderr logger is installed at `level`.
pub fn init_logging(level: log::LevelFilter) {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(level.as_str().to_ascii_lowercase())
        });
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = stitch2d_core::init_with_level(level);
    }
}
