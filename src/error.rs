//! Error types for range planning and aggregation.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One rejected form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Form field path, e.g. `rangeSettings.z2.maxExpansion`.
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found in a manual geometry form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid geometry form ({} violation(s)): {}", .violations.len(), join(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    /// Whether any violation was reported against `field` (exact path or a child of it).
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| {
            v.field == field
                || v.field
                    .strip_prefix(field)
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }
}

fn join(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by the planner pipeline.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The geometry does not fit the dimensionality of the chosen curve.
    #[error("unsupported geometry for {range_type}: {reason}")]
    UnsupportedGeometryKind { range_type: String, reason: String },

    /// Even the coarsest decomposition needs more ranges than allowed.
    #[error("range budget exhausted: need at least {required} ranges, maxEnvelopes is {max_envelopes}")]
    BudgetExhausted {
        required: usize,
        max_envelopes: usize,
    },

    /// A derived-geometry function name that is not recognised.
    #[error("unknown geo function `{0}`")]
    UnknownGeoFunction(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The backend did not answer for a field within the timeout.
    #[error("backend timed out after {timeout:?} for field `{field}`")]
    BackendTimeout { field: String, timeout: Duration },

    /// The backend failed for a field.
    #[error("backend error for field `{field}`: {message}")]
    Backend { field: String, message: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// WKT or GeoJSON could not be parsed or the two encodings disagree.
    #[error("geometry encoding error: {0}")]
    Encoding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
