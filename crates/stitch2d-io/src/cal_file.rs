//! `:START2D` calibration tables.
//!
//! Two variants are written. The current one uses `\n` line endings and a
//! centred offset; the legacy one uses CRLF endings, scales spacing by the
//! calibration divisor and offsets the table by the grid origin. Both carry
//! the bordered tables as `ax1\tax2` pairs, one line per table row.

use std::fs;
use std::path::Path;

use stitch2d_core::{FinalCalibration, Matrix, StitchRun, UnitSystem};

#[derive(thiserror::Error, Debug)]
pub enum CalFileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("missing :START2D header")]
    MissingHeader,
    #[error("cannot read the column count from the first header line")]
    ColumnCount,
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("no table rows before :END")]
    NoData,
    #[error("ax1 and ax2 tables differ in shape: {ax1:?} vs {ax2:?}")]
    ShapeMismatch {
        ax1: (usize, usize),
        ax2: (usize, usize),
    },
}

/// Header facts of a calibration table.
#[derive(Clone, Debug, PartialEq)]
pub struct CalFileInfo {
    pub ax1_number: i32,
    pub ax2_number: i32,
    pub ax1_sign: i32,
    pub ax2_sign: i32,
    pub units: UnitSystem,
    pub cal_divisor: u32,
    /// Grid spacing `[ax1, ax2]`.
    pub increments: [f64; 2],
    /// Scan and step position of grid cell `(0, 0)`.
    pub origin: [f64; 2],
}

impl CalFileInfo {
    /// Header facts for `run`, optionally forcing the unit system.
    pub fn from_run(run: &StitchRun, user_unit: Option<UnitSystem>) -> Self {
        let sys = &run.system;
        let cal = &run.calibration;
        Self {
            ax1_number: sys.ax1.number,
            ax2_number: sys.ax2.number,
            ax1_sign: sys.ax1.sign,
            ax2_sign: sys.ax2.sign,
            units: user_unit.unwrap_or(sys.units),
            cal_divisor: sys.cal_divisor,
            increments: cal.increments,
            origin: grid_origin(cal),
        }
    }
}

/// Averaged position of cell `(0, 0)`, or the nominal origin if no zone covered it.
fn grid_origin(cal: &FinalCalibration) -> [f64; 2] {
    if cal.rows() > 0 && cal.cols() > 0 && cal.valid[(0, 0)] {
        [cal.x[(0, 0)], cal.y[(0, 0)]]
    } else {
        cal.origin
    }
}

/// Bordered correction tables of both axes.
#[derive(Clone, Debug, PartialEq)]
pub struct CalTable {
    pub ax1: Matrix,
    pub ax2: Matrix,
}

impl CalTable {
    pub fn from_calibration(cal: &FinalCalibration) -> Self {
        Self {
            ax1: cal.ax1_cal.clone(),
            ax2: cal.ax2_cal.clone(),
        }
    }

    pub fn rows(&self) -> usize {
        self.ax1.nrows()
    }

    pub fn cols(&self) -> usize {
        self.ax1.ncols()
    }

    /// Largest absolute element-wise difference to `other`, `None` if the shapes differ.
    pub fn max_abs_diff(&self, other: &CalTable) -> Option<f64> {
        if self.ax1.shape() != other.ax1.shape() || self.ax2.shape() != other.ax2.shape() {
            return None;
        }
        let d1 = (&self.ax1 - &other.ax1).amax();
        let d2 = (&self.ax2 - &other.ax2).amax();
        Some(d1.max(d2))
    }

    fn check_shape(&self) -> Result<(), CalFileError> {
        if self.ax1.shape() != self.ax2.shape() {
            return Err(CalFileError::ShapeMismatch {
                ax1: self.ax1.shape(),
                ax2: self.ax2.shape(),
            });
        }
        Ok(())
    }
}

/// Four-decimal cell value. Negative zero keeps its sign (`-0.0000`), as the
/// existing table consumers expect byte-for-byte.
fn cell(v: f64) -> String {
    format!("{v:.4}")
}

fn push_rows(out: &mut String, table: &CalTable, eol: &str) {
    for r in 0..table.rows() {
        let row: Vec<String> = (0..table.cols())
            .map(|c| format!("{}\t{}", cell(table.ax1[(r, c)]), cell(table.ax2[(r, c)])))
            .collect();
        out.push_str(&row.join("\t"));
        out.push_str(eol);
    }
}

/// Render the current `:START2D` file.
pub fn render_cal_table(table: &CalTable, info: &CalFileInfo) -> Result<String, CalFileError> {
    table.check_shape()?;
    let [dx, dy] = info.increments;
    let (rows, cols) = (table.rows(), table.cols());
    let unit = info.units.as_str();
    let offset_row = rows.saturating_sub(1) as f64 / 2.0 * dy;
    let offset_col = cols.saturating_sub(1) as f64 / 2.0 * dx;

    let mut out = format!(
        ":START2D {} {} 0 2 {dx:.3} {dy:.3} {cols}\n",
        info.ax2_number, info.ax1_number
    );
    out.push_str(&format!(
        ":START2D POSUNIT={unit} CORUNIT={unit}/1000 OFFSETROW = {offset_row:.3} OFFSETCOL = {offset_col:.3}\n\n"
    ));
    push_rows(&mut out, table, "\n");
    out.push_str("\n:END\n");
    Ok(out)
}

/// Render the legacy CRLF `:START2D` file.
pub fn render_legacy_cal_table(
    table: &CalTable,
    info: &CalFileInfo,
) -> Result<String, CalFileError> {
    table.check_shape()?;
    let [dx, dy] = info.increments;
    let [x0, y0] = info.origin;
    let div = info.cal_divisor as f64;
    let unit = info.units.as_str();
    let offset_row = -(info.ax2_sign as f64) * (y0 - dy) * div;
    let offset_col = -(info.ax1_sign as f64) * (x0 - dx) * div;

    let mut out = format!(
        ":START2D {ax2} {ax1} {ax1} {ax2} {:.3} {:.3} {} \r\n",
        dy * div,
        dx * div,
        table.cols(),
        ax1 = info.ax1_number,
        ax2 = info.ax2_number,
    );
    out.push_str(&format!(
        ":START2D POSUNIT={unit} CORUNIT={unit}/{} OFFSETROW = {offset_row:.3} OFFSETCOL = {offset_col:.3} \r\n\r\n",
        1000 / info.cal_divisor.max(1)
    ));
    push_rows(&mut out, table, "\r\n");
    out.push_str(":END\r\n");
    Ok(out)
}

/// Parse either `:START2D` variant.
///
/// The column count is the last token of the first header line; rows start
/// after the first blank line and stop at `:END`.
pub fn parse_cal_table(text: &str) -> Result<CalTable, CalFileError> {
    let lines: Vec<&str> = text.lines().collect();
    let first = lines
        .first()
        .filter(|l| l.trim_start().starts_with(":START2D"))
        .ok_or(CalFileError::MissingHeader)?;
    let cols: usize = first
        .split_whitespace()
        .last()
        .and_then(|t| t.parse().ok())
        .ok_or(CalFileError::ColumnCount)?;

    let start = lines
        .iter()
        .enumerate()
        .skip(2)
        .find(|(_, l)| l.trim().is_empty())
        .map_or(3, |(k, _)| k + 1);

    let mut ax1 = Vec::new();
    let mut ax2 = Vec::new();
    let mut rows = 0;
    for (k, line) in lines.iter().enumerate().skip(start) {
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        if t.starts_with(":END") {
            break;
        }
        let values = t
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CalFileError::Malformed {
                line: k + 1,
                reason: format!("invalid number ({e})"),
            })?;
        if values.len() != 2 * cols {
            return Err(CalFileError::Malformed {
                line: k + 1,
                reason: format!("expected {} values, found {}", 2 * cols, values.len()),
            });
        }
        for pair in values.chunks_exact(2) {
            ax1.push(pair[0]);
            ax2.push(pair[1]);
        }
        rows += 1;
    }
    if rows == 0 {
        return Err(CalFileError::NoData);
    }
    Ok(CalTable {
        ax1: Matrix::from_row_slice(rows, cols, &ax1),
        ax2: Matrix::from_row_slice(rows, cols, &ax2),
    })
}

pub fn read_cal_table(path: impl AsRef<Path>) -> Result<CalTable, CalFileError> {
    let text = fs::read_to_string(path)?;
    parse_cal_table(&text)
}
