//! Error types for the analysis pipeline.
//!
//! Most of the failure taxonomy is deliberately *not* here: sanitization
//! rejection, ambiguous classification, and unresolvable aggregations are
//! signalled fallbacks handled inside the pipeline, and sandbox faults are
//! folded into a fully-defaulted contract. Only failures the caller must
//! see become `AnalysisError`.

use thiserror::Error;

/// Errors surfaced to the caller of [`crate::analysis::Analyzer::analyze`].
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("row {row} has {got} cells, expected {expected}")]
    ShapeMismatch {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("query is empty")]
    EmptyQuery,

    #[error("completion unavailable: {0}")]
    CompletionUnavailable(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Faults reported by the external completion capability.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// Worth retrying once.
    #[error("transient completion fault: {0}")]
    Transient(String),

    /// Never retried.
    #[error("completion rejected by content policy: {0}")]
    ContentPolicy(String),
}
