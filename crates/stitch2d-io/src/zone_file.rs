//! Zone measurement file reader.
//!
//! A zone file is a short header followed by whitespace-separated data rows:
//!
//! ```text
//! Serial Number: 12345
//! %Ax1Name: X; Ax1Num: 1; Ax1Sign: 1; Ax1Gantry: 0
//! %Ax2Name: Y; Ax2Num: 2; Ax2Sign: -1
//! %UserUnits: METRIC
//! %Operator: jd; Model: XY-500; AirTemp: 20.1; MatTemp: 20.3; ExpandCoef: 11.5; Comment: zone 1
//! 1 1 0.0 0.0 0.0001 -0.0002
//! 2 1 5.0 0.0 0.0003 -0.0001
//! ```
//!
//! Data columns are `scanIndex stepIndex scanPos stepPos scanErr stepErr`.

use std::fs;
use std::path::Path;

use log::debug;
use stitch2d_core::{
    AxisConfig, RawMeasurement, RawSample, StitchError, UnitSystem, ZoneConfig, ZoneInput,
    ZoneMetadata,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum ZoneFileError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected the {field} header line")]
    MissingHeader { line: usize, field: &'static str },
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("no data rows found")]
    NoData,
    #[error(transparent)]
    Measurement(#[from] StitchError),
}

/// Parsed zone file.
#[derive(Clone, Debug)]
pub struct ZoneFile {
    pub config: ZoneConfig,
    pub measurement: RawMeasurement,
}

impl ZoneFile {
    pub fn into_input(self, id: impl Into<String>) -> ZoneInput {
        ZoneInput {
            id: id.into(),
            config: self.config,
            measurement: self.measurement,
        }
    }
}

/// Read and parse a zone file.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn read_zone_file(path: impl AsRef<Path>) -> Result<ZoneFile, ZoneFileError> {
    let text = fs::read_to_string(path.as_ref())?;
    parse_zone_file(&text)
}

/// Read a zone file as engine input, identified by its file name.
pub fn read_zone_input(path: impl AsRef<Path>) -> Result<ZoneInput, ZoneFileError> {
    let path = path.as_ref();
    let id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(read_zone_file(path)?.into_input(id))
}

/// Parse the text of a zone file.
pub fn parse_zone_file(text: &str) -> Result<ZoneFile, ZoneFileError> {
    let lines: Vec<&str> = text.lines().collect();
    let header = |k: usize| lines.get(k).map(|l| l.trim()).unwrap_or("");

    let serial = parse_serial(header(0));
    let ax1 = parse_axis(header(1), 1, 2)?;
    let ax2 = parse_axis(header(2), 2, 3)?;

    let mut next = 3;
    let (units, cal_divisor) = match header(next).strip_prefix("%UserUnits:") {
        Some(v) => {
            next += 1;
            parse_units(v.trim())
        }
        None => (UnitSystem::Metric, 1),
    };
    let metadata = if header(next).starts_with("%Operator") {
        parse_metadata(header(next))
    } else {
        ZoneMetadata::default()
    };

    let start = lines
        .iter()
        .position(|l| is_data_line(l))
        .ok_or(ZoneFileError::NoData)?;
    let mut samples = Vec::with_capacity(lines.len() - start);
    for (k, line) in lines.iter().enumerate().skip(start) {
        let t = line.trim();
        if t.is_empty() || t.starts_with('%') || t.starts_with('#') {
            continue;
        }
        samples.push(parse_sample(t, k + 1)?);
    }
    debug!(
        "zone {serial}: {} samples, units {}, divisor {cal_divisor}",
        samples.len(),
        units.as_str()
    );

    let measurement = RawMeasurement::from_samples(samples, cal_divisor as f64)?;
    Ok(ZoneFile {
        config: ZoneConfig {
            serial,
            ax1,
            ax2,
            units,
            cal_divisor,
            metadata,
        },
        measurement,
    })
}

/// Text two characters after the first colon (`"S/N: 123"` -> `"123"`).
fn parse_serial(line: &str) -> String {
    line.find(':')
        .and_then(|i| line.get(i + 2..))
        .unwrap_or("")
        .to_string()
}

/// `%AxNName: <name>; AxNNum: <int>; AxNSign: <int>[; AxNGantry: <0|1>]`
fn parse_axis(line: &str, axis: u8, line_no: usize) -> Result<AxisConfig, ZoneFileError> {
    let field = if axis == 1 { "%Ax1Name" } else { "%Ax2Name" };
    if !line.starts_with(field) {
        return Err(ZoneFileError::MissingHeader {
            line: line_no,
            field,
        });
    }
    let values: Vec<&str> = line.split(';').map(field_value).collect();
    let int = |k: usize, what: &str| -> Result<i32, ZoneFileError> {
        values
            .get(k)
            .ok_or_else(|| ZoneFileError::Malformed {
                line: line_no,
                reason: format!("axis {axis} header has no {what} field"),
            })?
            .parse()
            .map_err(|_| ZoneFileError::Malformed {
                line: line_no,
                reason: format!("axis {axis} {what} is not an integer"),
            })
    };

    let mut cfg = AxisConfig::new(values[0], int(1, "number")?, int(2, "sign")?);
    cfg.gantry = match values.get(3) {
        Some(v) => v.parse::<i32>().map(|g| g != 0).unwrap_or(false),
        None => false,
    };
    Ok(cfg)
}

/// Value of a `key: value` field, trimmed.
fn field_value(part: &str) -> &str {
    part.split_once(':').map_or("", |(_, v)| v.trim())
}

/// `UM` keeps metric units with micro-unit file values; `ENGLISH`/`INCH`
/// selects imperial units.
fn parse_units(token: &str) -> (UnitSystem, u32) {
    match token {
        "UM" => (UnitSystem::Metric, 1000),
        "ENGLISH" | "INCH" => (UnitSystem::English, 1),
        _ => (UnitSystem::Metric, 1),
    }
}

fn parse_metadata(line: &str) -> ZoneMetadata {
    let parts: Vec<&str> = line.splitn(6, ';').collect();
    if parts.len() < 6 {
        return ZoneMetadata::default();
    }
    let v = |k: usize| field_value(parts[k]).to_string();
    ZoneMetadata {
        operator: v(0),
        model: v(1),
        air_temp: v(2),
        mat_temp: v(3),
        expand_coef: v(4),
        comment: v(5),
    }
}

fn is_data_line(line: &&str) -> bool {
    let t = line.trim();
    if t.is_empty() || t.starts_with('%') || t.starts_with('#') {
        return false;
    }
    t.split_whitespace()
        .next()
        .is_some_and(|tok| tok.parse::<f64>().is_ok())
}

fn parse_sample(line: &str, line_no: usize) -> Result<RawSample, ZoneFileError> {
    let malformed = |reason: String| ZoneFileError::Malformed {
        line: line_no,
        reason,
    };
    let values = line
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| malformed(format!("invalid number ({e})")))?;
    if values.len() < 6 {
        return Err(malformed(format!("expected 6 columns, found {}", values.len())));
    }
    let index = |v: f64| -> Result<usize, ZoneFileError> {
        if v >= 1.0 && v.fract() == 0.0 {
            Ok(v as usize)
        } else {
            Err(malformed(format!("test location {v} is not a positive integer")))
        }
    };
    Ok(RawSample {
        ax1_index: index(values[0])?,
        ax2_index: index(values[1])?,
        ax1_pos: values[2],
        ax2_pos: values[3],
        ax1_err: values[4],
        ax2_err: values[5],
    })
}

/// Render a zone file in the format [`parse_zone_file`] reads.
///
/// Values are written in file units, i.e. multiplied back by the divisor.
pub fn render_zone_file(config: &ZoneConfig, measurement: &RawMeasurement) -> String {
    let mut out = String::new();
    let div = config.cal_divisor as f64;
    out.push_str(&format!("Serial Number: {}\n", config.serial));
    for (n, ax) in [(1, &config.ax1), (2, &config.ax2)] {
        out.push_str(&format!(
            "%Ax{n}Name: {}; Ax{n}Num: {}; Ax{n}Sign: {}; Ax{n}Gantry: {}\n",
            ax.name,
            ax.number,
            ax.sign,
            u8::from(ax.gantry)
        ));
    }
    let unit = match (config.units, config.cal_divisor) {
        (UnitSystem::Metric, 1000) => "UM",
        (u, _) => u.as_str(),
    };
    out.push_str(&format!("%UserUnits: {unit}\n"));
    let m = &config.metadata;
    out.push_str(&format!(
        "%Operator: {}; Model: {}; AirTemp: {}; MatTemp: {}; ExpandCoef: {}; Comment: {}\n",
        m.operator, m.model, m.air_temp, m.mat_temp, m.expand_coef, m.comment
    ));
    for k in 0..measurement.len() {
        out.push_str(&format!(
            "{} {} {} {} {} {}\n",
            measurement.ax1_index[k],
            measurement.ax2_index[k],
            measurement.ax1_pos[k] * div,
            measurement.ax2_pos[k] * div,
            measurement.ax1_err[k] * div,
            measurement.ax2_err[k] * div,
        ));
    }
    out
}
