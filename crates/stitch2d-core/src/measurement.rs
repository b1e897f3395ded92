//! Zone configuration and raw measurement records.

use crate::StitchError;
use serde::{Deserialize, Serialize};

/// Unit system reported by the measurement header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnitSystem {
    /// Positions in millimetres, errors in microns.
    #[default]
    Metric,
    /// Positions in inches, errors in mils.
    English,
}

impl UnitSystem {
    /// Token used in calibration and report headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "METRIC",
            UnitSystem::English => "ENGLISH",
        }
    }

    pub fn position_unit(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "mm",
            UnitSystem::English => "in",
        }
    }

    pub fn error_unit(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "um",
            UnitSystem::English => "mil",
        }
    }
}

impl std::str::FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "METRIC" => Ok(UnitSystem::Metric),
            "ENGLISH" => Ok(UnitSystem::English),
            other => Err(format!("unknown unit system '{other}'")),
        }
    }
}

/// Static description of one controller axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub name: String,
    /// Controller axis number written into the calibration header.
    pub number: i32,
    /// Direction convention (`+1` or `-1`); calibration values are negated by it.
    pub sign: i32,
    /// Whether the axis is a gantry slave.
    #[serde(default)]
    pub gantry: bool,
}

impl AxisConfig {
    pub fn new(name: impl Into<String>, number: i32, sign: i32) -> Self {
        Self {
            name: name.into(),
            number,
            sign,
            gantry: false,
        }
    }
}

/// Free-form header fields carried through to reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneMetadata {
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub air_temp: String,
    #[serde(default)]
    pub mat_temp: String,
    #[serde(default)]
    pub expand_coef: String,
    #[serde(default)]
    pub comment: String,
}

impl ZoneMetadata {
    /// Air temperature as a number; blank or non-numeric text reads as `None`.
    pub fn air_temp_value(&self) -> Option<f64> {
        parse_reading(&self.air_temp)
    }

    pub fn mat_temp_value(&self) -> Option<f64> {
        parse_reading(&self.mat_temp)
    }
}

fn parse_reading(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Per-zone static facts parsed from the measurement header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub serial: String,
    /// Scan (fast) axis.
    pub ax1: AxisConfig,
    /// Step (slow) axis.
    pub ax2: AxisConfig,
    pub units: UnitSystem,
    /// Raw file values are divided by this before use (1000 for `UM` files).
    pub cal_divisor: u32,
    #[serde(default)]
    pub metadata: ZoneMetadata,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            serial: String::new(),
            ax1: AxisConfig::new("X", 1, 1),
            ax2: AxisConfig::new("Y", 2, 1),
            units: UnitSystem::Metric,
            cal_divisor: 1,
            metadata: ZoneMetadata::default(),
        }
    }
}

/// One row of a measurement file, before scaling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawSample {
    /// 1-based scan-axis test location.
    pub ax1_index: usize,
    /// 1-based step-axis test location.
    pub ax2_index: usize,
    pub ax1_pos: f64,
    pub ax2_pos: f64,
    pub ax1_err: f64,
    pub ax2_err: f64,
}

/// Sorted, scaled measurement record of one zone.
///
/// All six sequences are parallel and ordered by `(ax2_index, ax1_index)`
/// ascending, so consecutive samples walk the scan axis first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMeasurement {
    pub ax1_index: Vec<usize>,
    pub ax2_index: Vec<usize>,
    /// Commanded scan-axis positions.
    pub ax1_pos: Vec<f64>,
    /// Commanded step-axis positions.
    pub ax2_pos: Vec<f64>,
    /// Scan-axis relative errors.
    pub ax1_err: Vec<f64>,
    /// Step-axis relative errors.
    pub ax2_err: Vec<f64>,
}

impl RawMeasurement {
    /// Sort samples by `(step index, scan index)` and divide positions and
    /// errors by `divisor`.
    pub fn from_samples(mut samples: Vec<RawSample>, divisor: f64) -> Result<Self, StitchError> {
        if samples.is_empty() {
            return Err(StitchError::EmptyMeasurement);
        }
        samples.sort_by(|a, b| {
            a.ax2_index
                .cmp(&b.ax2_index)
                .then(a.ax1_index.cmp(&b.ax1_index))
        });

        let n = samples.len();
        let mut out = RawMeasurement {
            ax1_index: Vec::with_capacity(n),
            ax2_index: Vec::with_capacity(n),
            ax1_pos: Vec::with_capacity(n),
            ax2_pos: Vec::with_capacity(n),
            ax1_err: Vec::with_capacity(n),
            ax2_err: Vec::with_capacity(n),
        };
        for s in samples {
            out.ax1_index.push(s.ax1_index);
            out.ax2_index.push(s.ax2_index);
            out.ax1_pos.push(s.ax1_pos / divisor);
            out.ax2_pos.push(s.ax2_pos / divisor);
            out.ax1_err.push(s.ax1_err / divisor);
            out.ax2_err.push(s.ax2_err / divisor);
        }
        Ok(out)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ax1_index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ax1_index.is_empty()
    }

    pub(crate) fn check_consistent(&self) -> Result<(), StitchError> {
        let n = self.len();
        if n == 0 {
            return Err(StitchError::EmptyMeasurement);
        }
        let lens = [
            self.ax2_index.len(),
            self.ax1_pos.len(),
            self.ax2_pos.len(),
            self.ax1_err.len(),
            self.ax2_err.len(),
        ];
        if lens.iter().any(|&l| l != n) {
            return Err(StitchError::RaggedMeasurement);
        }
        Ok(())
    }

    /// Number of scan-axis grid points (largest scan index).
    pub fn num_ax1_points(&self) -> usize {
        self.ax1_index.iter().copied().max().unwrap_or(0)
    }

    /// Number of step-axis grid points (largest step index).
    pub fn num_ax2_points(&self) -> usize {
        self.ax2_index.iter().copied().max().unwrap_or(0)
    }

    /// Commanded scan positions of the grid columns, one per scan index `1..=N1`.
    pub fn ax1_positions(&self) -> Result<Vec<f64>, StitchError> {
        positions_by_index(&self.ax1_index, &self.ax1_pos, self.num_ax1_points(), 1)
    }

    /// Commanded step positions of the grid rows, one per step index `1..=N2`.
    pub fn ax2_positions(&self) -> Result<Vec<f64>, StitchError> {
        positions_by_index(&self.ax2_index, &self.ax2_pos, self.num_ax2_points(), 2)
    }

    pub fn ax1_move_distance(&self) -> f64 {
        span(&self.ax1_pos)
    }

    pub fn ax2_move_distance(&self) -> f64 {
        span(&self.ax2_pos)
    }

    /// Scan-axis sample spacing taken from the first two records.
    pub fn ax1_sample_distance(&self) -> f64 {
        if self.num_ax1_points() > 1 && self.len() > 1 {
            self.ax1_pos[1] - self.ax1_pos[0]
        } else {
            0.0
        }
    }

    /// Step-axis sample spacing taken one scan line apart.
    pub fn ax2_sample_distance(&self) -> f64 {
        let n1 = self.num_ax1_points();
        if self.num_ax2_points() > 1 && n1 < self.len() {
            self.ax2_pos[n1] - self.ax2_pos[0]
        } else {
            0.0
        }
    }

    /// Scan-axis errors in micro-units relative to their own mean.
    pub fn ax1_err_micro(&self) -> Vec<f64> {
        to_micro(&self.ax1_err)
    }

    /// Step-axis errors in micro-units relative to their own mean.
    pub fn ax2_err_micro(&self) -> Vec<f64> {
        to_micro(&self.ax2_err)
    }
}

fn positions_by_index(
    index: &[usize],
    pos: &[f64],
    count: usize,
    axis: u8,
) -> Result<Vec<f64>, StitchError> {
    let mut out: Vec<Option<f64>> = vec![None; count];
    for (&i, &p) in index.iter().zip(pos) {
        if i == 0 || i > count {
            continue;
        }
        let slot = &mut out[i - 1];
        if slot.is_none() {
            *slot = Some(p);
        }
    }
    out.into_iter()
        .enumerate()
        .map(|(k, p)| p.ok_or(StitchError::MissingIndex { axis, index: k + 1 }))
        .collect()
}

fn span(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if values.is_empty() {
        0.0
    } else {
        hi - lo
    }
}

fn to_micro(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean) * 1000.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(i: usize, j: usize, x: f64, y: f64, e1: f64, e2: f64) -> RawSample {
        RawSample {
            ax1_index: i,
            ax2_index: j,
            ax1_pos: x,
            ax2_pos: y,
            ax1_err: e1,
            ax2_err: e2,
        }
    }

    #[test]
    fn samples_are_sorted_step_major_and_scaled() {
        let samples = vec![
            sample(2, 2, 20.0, 10.0, 4.0, 8.0),
            sample(1, 2, 0.0, 10.0, 3.0, 7.0),
            sample(2, 1, 20.0, 0.0, 2.0, 6.0),
            sample(1, 1, 0.0, 0.0, 1.0, 5.0),
        ];
        let raw = RawMeasurement::from_samples(samples, 10.0).expect("raw");
        assert_eq!(raw.ax1_index, vec![1, 2, 1, 2]);
        assert_eq!(raw.ax2_index, vec![1, 1, 2, 2]);
        assert_eq!(raw.ax1_pos, vec![0.0, 2.0, 0.0, 2.0]);
        assert_eq!(raw.ax1_err, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(raw.num_ax1_points(), 2);
        assert_eq!(raw.num_ax2_points(), 2);
        assert_eq!(raw.ax1_positions().unwrap(), vec![0.0, 2.0]);
        assert_eq!(raw.ax2_positions().unwrap(), vec![0.0, 1.0]);
        assert_relative_eq!(raw.ax1_sample_distance(), 2.0);
        assert_relative_eq!(raw.ax2_sample_distance(), 1.0);
        assert_relative_eq!(raw.ax1_move_distance(), 2.0);
    }

    #[test]
    fn micro_errors_are_mean_relative() {
        let raw = RawMeasurement::from_samples(
            vec![
                sample(1, 1, 0.0, 0.0, 0.001, 0.0),
                sample(2, 1, 1.0, 0.0, 0.003, 0.0),
            ],
            1.0,
        )
        .unwrap();
        let e = raw.ax1_err_micro();
        assert_relative_eq!(e[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(e[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_scan_index_is_reported() {
        let raw = RawMeasurement::from_samples(
            vec![
                sample(1, 1, 0.0, 0.0, 0.0, 0.0),
                sample(3, 1, 2.0, 0.0, 0.0, 0.0),
            ],
            1.0,
        )
        .unwrap();
        assert_eq!(
            raw.ax1_positions(),
            Err(StitchError::MissingIndex { axis: 1, index: 2 })
        );
    }

    #[test]
    fn empty_sample_list_is_rejected() {
        assert_eq!(
            RawMeasurement::from_samples(Vec::new(), 1.0),
            Err(StitchError::EmptyMeasurement)
        );
    }

    #[test]
    fn unit_system_parses_case_insensitively() {
        assert_eq!("english".parse::<UnitSystem>(), Ok(UnitSystem::English));
        assert_eq!(UnitSystem::Metric.as_str(), "METRIC");
        assert!("furlong".parse::<UnitSystem>().is_err());
    }
}
