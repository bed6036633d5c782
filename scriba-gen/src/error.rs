//! Error types for scriba-gen
//!
//! Recoverable errors (malformed evidence, per-unit retry exhaustion, failed
//! edits) are absorbed at their component boundary and reported as warnings
//! plus a degraded result. Fatal errors abort the current top-level operation
//! (`build`, `edit` or `ask`) and carry enough context to fix the inputs.

use thiserror::Error;

/// Which adapter field made an evidence record unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Timestamp,
    Text,
    ImageRef,
}

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Timestamp => "timestamp",
            Self::Text => "text",
            Self::ImageRef => "image reference",
        })
    }
}

/// A raw adapter record that could not become an evidence item
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Malformed evidence in source '{source_id}' at record {index}: missing or invalid {field}")]
pub struct MalformedEvidenceError {
    pub source_id: String,
    pub index: usize,
    pub field: MissingField,
}

/// Pipeline error taxonomy
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raw record dropped during normalization (recoverable)
    #[error(transparent)]
    MalformedEvidence(#[from] MalformedEvidenceError),

    /// A source emitted decreasing ordering keys (fatal, upstream contract violation)
    #[error(
        "Out-of-order evidence in source '{source_id}': item {index} has key {current} after {previous}"
    )]
    OutOfOrderEvidence {
        source_id: String,
        index: usize,
        previous: f64,
        current: f64,
    },

    /// Nothing to plan or generate (fatal)
    #[error("No material supplied: {0}")]
    EmptyInput(String),

    /// Model request failed on every attempt
    #[error("{operation} request gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        unit_index: Option<usize>,
        attempts: u32,
        last_error: String,
    },

    /// Edit region identifier does not resolve
    #[error("Edit target not found: {0}")]
    EditTargetNotFound(String),

    /// Rewritten region failed structural validation; document unchanged
    #[error("Edit of unit {unit_index} rejected: {reason}")]
    EditValidation { unit_index: usize, reason: String },

    /// Generative model could not be reached
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Edit or ask issued before any document was built
    #[error("No document has been built in this session")]
    NotBuilt,

    /// Build cancelled by caller
    #[error("Build cancelled after {completed_units} of {total_units} units")]
    Cancelled {
        completed_units: usize,
        total_units: usize,
    },

    /// scriba-common error
    #[error("Common error: {0}")]
    Common(#[from] scriba_common::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
