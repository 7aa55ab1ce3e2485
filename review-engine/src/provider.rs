//! External collaborator interfaces
//!
//! The engine never talks to a model, a repository, or a storage layer
//! directly. Everything network- or disk-shaped sits behind these traits and
//! is injected at construction, so the orchestrator holds no ambient state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Role of a chat message sent to the inference capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in an inference transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Opaque request/response language-inference capability.
///
/// Transport failures surface as `EngineError::Transport` and are treated by
/// the stages identically to validation failures for retry counting.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn infer(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<String, EngineError>;
}

/// Read-only inspection capabilities available to the expert reasoning loop.
///
/// Pure reads; no side effects on shared state.
#[async_trait]
pub trait Inspector: Send + Sync {
    /// Summary of the repository structure for the given asset key.
    async fn fetch_repo_structure(&self, key: &str) -> Result<String, EngineError>;

    /// Contents of a file, optionally restricted to an inclusive line range.
    async fn read_file(
        &self,
        path: &str,
        line_range: Option<(u32, u32)>,
    ) -> Result<String, EngineError>;

    /// Search the codebase for a pattern, optionally restricted to file
    /// names matching a glob, returning matched lines with context.
    async fn run_grep(
        &self,
        pattern: &str,
        include: Option<&str>,
    ) -> Result<String, EngineError>;
}

/// Persistence/artifact layer, consumed only to obtain the pre-built
/// repository-structure summary before intent analysis begins.
///
/// Implementations build the artifact if absent; the call is idempotent and
/// the engine never writes through this interface.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn repo_structure(&self, key: &str) -> Result<String, EngineError>;
}
