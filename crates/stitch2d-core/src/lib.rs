//! Multi-zone error-map stitching for 2-axis motion stages.
//!
//! A large-travel stage is measured in overlapping rectangular zones. This
//! crate turns the zones into one seamless error map and the correction
//! tables a controller loads:
//!
//! 1. [`build_zone_grid`] maps a zone's samples onto a regular grid.
//! 2. [`estimate_slopes`] fits the straightness lines and orthogonality.
//! 3. [`stitch_zone`] aligns each zone to its already-placed neighbour.
//! 4. [`GridAccumulator`] sums the aligned zones with an overlap count.
//! 5. [`finalize`] averages, detrends, zero-references and builds the tables.
//!
//! [`run_stitching`] drives the whole sequence in row-major zone order.
//!
//! Matrices are `nalgebra` dense matrices indexed `(row, col)`, where rows
//! follow the step axis (axis 2) and columns the scan axis (axis 1). Errors
//! are in micro-units (microns for metric data).
//!
//! File formats live in `stitch2d-io`; this crate does no I/O.

mod accumulate;
mod error;
mod finalize;
mod grid;
mod interp;
mod logger;
mod measurement;
mod pipeline;
mod single;
mod slope;
mod stitch;
pub mod synthetic;

/// Dense `f64` matrix used for every grid.
pub type Matrix = nalgebra::DMatrix<f64>;

pub use accumulate::{zone_increments, GridAccumulator, Placement};
pub use error::StitchError;
pub use finalize::{cal_table, finalize, round_cal, ErrorStats, FinalCalibration};
pub use grid::{build_zone_grid, GridBuild, GridLayout, ZoneGrid};
pub use interp::ScatteredLinear;
pub use measurement::{
    AxisConfig, RawMeasurement, RawSample, UnitSystem, ZoneConfig, ZoneMetadata,
};
pub use pipeline::{
    prepare_zone, prepare_zones, run_stitching, PreparedZone, StitchPlan, StitchRun,
    StitchWarning, ZoneInput, ZoneReport, ZoneStitcher,
};
pub use single::{process_single_zone, ZoneAccuracy, ZoneSpread};
pub use slope::{estimate_slopes, orthogonality_arcsec, LineFit, SlopeModel, MEAS_DIR};
pub use stitch::{
    detect_overlap, stitch_zone, OverlapBand, StitchCorrection, StitchDirection, StitchMasters,
    StitchOutcome,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, parse_level};
