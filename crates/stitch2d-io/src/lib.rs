//! File formats for `stitch2d`.
//!
//! - [`read_zone_file`] reads a zone measurement file (header and data rows).
//! - [`StitchJobConfig`] describes a run as JSON.
//! - [`render_cal_table`] and [`render_legacy_cal_table`] produce the
//!   `:START2D` correction tables; [`parse_cal_table`] reads either back.
//! - [`render_accuracy_report`] lists the final map cell by cell.
//! - [`StitchSummary`] is the JSON run summary.
//!
//! Renderers return strings; writing them to disk is left to the caller.

mod accuracy;
mod cal_file;
mod job;
mod report;
mod zone_file;

pub use accuracy::render_accuracy_report;
pub use cal_file::{
    parse_cal_table, read_cal_table, render_cal_table, render_legacy_cal_table, CalFileError,
    CalFileInfo, CalTable,
};
pub use job::{IoError, StitchJobConfig};
pub use report::{StitchSummary, ZoneSummary};
pub use zone_file::{
    parse_zone_file, read_zone_file, read_zone_input, render_zone_file, ZoneFile, ZoneFileError,
};
