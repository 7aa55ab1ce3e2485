//! Error taxonomy for the review engine
//!
//! Every failure the engine can observe falls into one of four classes, and
//! none of them is fatal to a pipeline run: transport and validation errors
//! are retried or degraded by the owning stage, budget exhaustion downgrades
//! a unit's verdict, and a timeout truncates remaining work.

use thiserror::Error;

use crate::exec::validate::ValidationFailure;

/// Errors observed while running the review pipeline.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The inference or tool call failed to return a reply.
    #[error("transport error: {0}")]
    Transport(String),

    /// The reply came back but did not satisfy the expected schema.
    #[error("validation failed: {0}")]
    Validation(ValidationFailure),

    /// A retry or iteration limit was reached before a valid result.
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    /// The process-wide time budget expired before this unit finished.
    #[error("timeout exceeded")]
    TimeoutExceeded,
}

impl From<ValidationFailure> for EngineError {
    fn from(failure: ValidationFailure) -> Self {
        EngineError::Validation(failure)
    }
}
