//! The review pipeline: stages, data model, and orchestration

pub mod expert;
pub mod intent;
pub mod manager;
pub mod prompts;
pub mod reporter;
pub mod schema;
pub mod types;
pub mod workflow;

use tokio::time::{timeout_at, Instant};

use crate::error::EngineError;
use crate::provider::{ChatMessage, InferenceProvider};

/// Inference call that respects the process-wide deadline. Used by stages
/// that call the model outside the executor (manager, reporter).
pub(crate) async fn infer_bounded(
    inference: &dyn InferenceProvider,
    messages: &[ChatMessage],
    temperature: f32,
    deadline: Option<Instant>,
) -> Result<String, EngineError> {
    match deadline {
        Some(at) => match timeout_at(at, inference.infer(messages, temperature)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::TimeoutExceeded),
        },
        None => inference.infer(messages, temperature).await,
    }
}
