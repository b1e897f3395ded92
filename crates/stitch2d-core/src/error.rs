/// Errors returned by the stitching engine.
///
/// Every variant is fatal for the run: the caller must not write a
/// calibration table after receiving one. Tolerated per-zone conditions
/// (missing overlap, unfilled cells) are reported as
/// [`StitchWarning`](crate::StitchWarning) instead.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StitchError {
    #[error("zone plan must have at least one row and one column (got {rows}x{cols})")]
    EmptyPlan { rows: usize, cols: usize },
    #[error("a {rows}x{cols} plan needs {expected} zones, got {actual}")]
    ZoneCountMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        actual: usize,
    },
    #[error("axis {axis} travel range must have max > min (got [{min}, {max}])")]
    InvalidTravel { axis: u8, min: f64, max: f64 },
    #[error("axis {axis} grid increment must be positive and finite (got {value})")]
    InvalidIncrement { axis: u8, value: f64 },
    #[error("measurement contains no samples")]
    EmptyMeasurement,
    #[error("measurement arrays have inconsistent lengths")]
    RaggedMeasurement,
    #[error("axis {axis} index {index} has no samples")]
    MissingIndex { axis: u8, index: usize },
    #[error("axis {axis} has {points} grid positions; at least 2 are required")]
    DegenerateAxis { axis: u8, points: usize },
    #[error("axis {axis} slope fit is undefined: {context}")]
    DegenerateFit { axis: u8, context: &'static str },
    #[error("matrix shape {actual:?} does not match grid shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("accumulated grid has no valid cells")]
    EmptyGrid,
    #[error("zone {zone}: {source}")]
    Zone {
        zone: String,
        #[source]
        source: Box<StitchError>,
    },
}

impl StitchError {
    /// Attach the zone identifier to an error raised while processing it.
    pub fn in_zone(self, zone: impl Into<String>) -> Self {
        match self {
            StitchError::Zone { .. } => self,
            other => StitchError::Zone {
                zone: zone.into(),
                source: Box::new(other),
            },
        }
    }
}
