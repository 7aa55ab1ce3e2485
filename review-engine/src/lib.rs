//! Workflow orchestration engine for LLM-assisted code review
//!
//! Runs a code change through a fixed pipeline of reasoning stages
//! (intent analysis, manager, expert execution, reporter) on top of a
//! bounded-concurrency executor and a structured-output validator that
//! together tolerate an unreliable inference backend. The engine always
//! returns a best-effort report; no failure inside a run is fatal.

// Error taxonomy
pub mod error;

// Execution substrate: bounded executor and reply validation
pub mod exec;

// External collaborator interfaces
pub mod provider;

// The review pipeline itself
pub mod review;

pub use error::EngineError;
pub use exec::batch::{run_all, ExecutionOutcome};
pub use exec::validate::{FailureKind, ValidateFields, ValidationFailure};
pub use provider::{ArtifactStore, ChatMessage, InferenceProvider, Inspector, Role};
pub use review::types::{
    FileAnalysis, LintFinding, ReviewReport, ReviewRequest, ReviewState, RiskGroup, RiskItem,
    RiskStatus, RiskType, Severity, StageError,
};
pub use review::workflow::{ReviewConfig, ReviewEngine};
