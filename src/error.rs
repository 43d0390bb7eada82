//! Error taxonomy for the scoring engine.
//!
//! Indicator-level errors are recorded on the indicator's result and never
//! abort the run; aggregation-level errors fail the owning parent unit but
//! leave sibling branches running. The taxonomy is deliberately strict about
//! one thing: a layer that cannot resolve a CRS fails at load time as a
//! [`LoadError`], so it can never resurface later as a misleading
//! "layer has no CRS" processing symptom.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error for any unit of work in a run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    OutputVerification(#[from] OutputVerificationError),

    #[error(transparent)]
    GridAlignment(#[from] GridAlignmentError),

    /// Workflow exceeded its configured invocation timeout.
    #[error("timeout: workflow did not finish within {0:?}")]
    Timeout(Duration),

    /// Run-level cancellation reached this unit while it was in flight.
    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Short stable kind tag used in the run summary and JSON artifact.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Load(_) => "load",
            EngineError::Processing(_) => "processing",
            EngineError::Aggregation(_) => "aggregation",
            EngineError::OutputVerification(_) => "output-verification",
            EngineError::GridAlignment(_) => "grid-alignment",
            EngineError::Timeout(_) => "timeout",
            EngineError::Cancelled => "cancelled",
            EngineError::Io(_) => "io",
        }
    }
}

/// A layer or file could not be resolved to valid geometry plus CRS.
/// Terminal for the indicator that needed the layer.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("layer not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The layer exists but carries no discoverable spatial reference.
    /// Raised at load time, before any downstream processing can run.
    #[error("unresolved CRS for {}", path.display())]
    UnresolvedCrs { path: PathBuf },

    #[error("invalid layer {}: {reason}", path.display())]
    InvalidLayer { path: PathBuf, reason: String },

    #[error("{}: expected {expected} geometry, found {found}", path.display())]
    GeometryMismatch {
        path: PathBuf,
        expected: &'static str,
        found: &'static str,
    },
}

/// An underlying raster/vector operation failed.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },

    #[error("cannot reproject from {from} to {to}: transform not available")]
    UnsupportedReprojection { from: String, to: String },

    #[error("missing intermediate output: {}", path.display())]
    MissingIntermediate { path: PathBuf },
}

/// One unparseable row in a tabular point file. Row-level only: the
/// workflow counts and skips these, so they surface as warnings on the
/// indicator rather than through [`EngineError`].
#[derive(Error, Debug)]
#[error("row {row}: {reason}")]
pub struct CsvParseError {
    /// 1-based data row number, header excluded.
    pub row: u64,
    pub reason: String,
}

/// Aggregation was attempted while one or more included children had not
/// finished successfully. Lists the offending child ids.
#[derive(Error, Debug)]
#[error("cannot aggregate {unit}: children not completed: {}", missing.join(", "))]
pub struct AggregationError {
    pub unit: String,
    pub missing: Vec<String>,
}

/// A workflow reported success but its output raster is absent, empty, or
/// misaligned. Always downgrades the unit to Failed.
#[derive(Error, Debug)]
#[error("output verification failed for {}: {reason}", path.display())]
pub struct OutputVerificationError {
    pub path: PathBuf,
    pub reason: String,
}

/// An input cannot be brought onto the study-area grid.
#[derive(Error, Debug)]
pub enum GridAlignmentError {
    #[error("input has no spatial reference")]
    MissingCrs,

    #[error("CRS mismatch: input {input}, grid {grid}")]
    CrsMismatch { input: String, grid: String },

    #[error("shape mismatch: input {input_rows}x{input_cols}, grid {rows}x{cols}")]
    ShapeMismatch {
        input_rows: usize,
        input_cols: usize,
        rows: usize,
        cols: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_tags_are_stable() {
        let e = EngineError::from(LoadError::UnresolvedCrs {
            path: PathBuf::from("roads.geojson"),
        });
        assert_eq!(e.kind(), "load");
        assert!(e.to_string().contains("unresolved CRS"));

        let e = EngineError::from(AggregationError {
            unit: "Accessibility".to_string(),
            missing: vec!["transit_stops".to_string(), "clinics".to_string()],
        });
        assert_eq!(e.kind(), "aggregation");
        assert!(e.to_string().contains("transit_stops, clinics"));
    }

    #[test]
    fn test_load_error_is_not_a_processing_error() {
        // The CRS failure surfaces with load semantics, never as a
        // downstream processing symptom.
        let e = EngineError::from(LoadError::UnresolvedCrs {
            path: PathBuf::from("x.geojson"),
        });
        assert!(!matches!(e, EngineError::Processing(_)));
    }

    #[test]
    fn test_timeout_message_names_the_duration() {
        let e = EngineError::Timeout(Duration::from_secs(90));
        assert!(e.to_string().contains("90s"));
    }
}
