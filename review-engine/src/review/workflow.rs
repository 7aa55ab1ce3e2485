//! Pipeline orchestration
//!
//! This module owns the stage sequence and the review state. Stages run
//! strictly in order with a hard barrier between them: stage N's units are
//! all resolved, successes or captured errors, before stage N+1 reads their
//! output. Every collaborator is injected at construction; the engine holds
//! no ambient global state.
//!
//! The contract of [`ReviewEngine::run`] is best-effort, not all-or-nothing:
//! a run always produces a report, even one built entirely from fallbacks.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::provider::{ArtifactStore, InferenceProvider, Inspector};
use crate::review::expert::run_expert_execution;
use crate::review::intent::run_intent_analysis;
use crate::review::manager::run_manager;
use crate::review::reporter::run_reporter;
use crate::review::types::{ReviewReport, ReviewRequest, ReviewState, StageError};

/// Tunables for a pipeline run.
///
/// The two concurrency caps bound simultaneously in-flight external calls
/// for their respective stages; the stages never overlap in time, so each
/// may pick its own value.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// Concurrent per-file units during intent analysis.
    pub intent_concurrency: usize,
    /// Concurrent per-item units during expert execution.
    pub expert_concurrency: usize,
    /// Validation/transport failures tolerated per unit before fallback.
    pub max_retries: u32,
    /// Model invocations allowed per expert unit before fallback.
    pub max_iterations: u32,
    /// Sampling temperature for all inference calls.
    pub temperature: f32,
    /// Process-wide budget for the whole pipeline. On expiry, in-flight
    /// units resolve as timeouts and the pipeline proceeds with partial
    /// state rather than aborting.
    pub total_timeout: Option<Duration>,
    /// Asset key for the pre-built repository-structure summary.
    pub repo_structure_key: String,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            intent_concurrency: 10,
            expert_concurrency: 10,
            max_retries: 2,
            max_iterations: 4,
            temperature: 0.2,
            total_timeout: None,
            repo_structure_key: "repo_map".to_string(),
        }
    }
}

/// The workflow orchestration engine.
pub struct ReviewEngine {
    config: ReviewConfig,
    inference: Arc<dyn InferenceProvider>,
    inspector: Arc<dyn Inspector>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ReviewEngine {
    pub fn new(
        config: ReviewConfig,
        inference: Arc<dyn InferenceProvider>,
        inspector: Arc<dyn Inspector>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            inference,
            inspector,
            artifacts,
        }
    }

    /// Review one code change end to end.
    ///
    /// Errors only on unusable configuration; everything that can go wrong
    /// mid-run is recovered into the report instead.
    pub async fn run(&self, request: ReviewRequest) -> Result<ReviewReport> {
        if self.config.intent_concurrency == 0 || self.config.expert_concurrency == 0 {
            anyhow::bail!("concurrency caps must be at least 1");
        }
        if self.config.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }

        let deadline = self.config.total_timeout.map(|t| Instant::now() + t);
        let mut state = ReviewState::from_request(&request);

        info!(
            files = state.changed_files.len(),
            timeout = ?self.config.total_timeout,
            "review pipeline starting"
        );

        // Pre-built repository structure summary, build-if-absent. A missing
        // artifact degrades the prompts, it does not stop the review.
        let repo_summary = match self
            .artifacts
            .repo_structure(&self.config.repo_structure_key)
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "repository structure unavailable");
                state
                    .errors
                    .push(StageError::new("setup", format!("repo structure: {}", err)));
                String::new()
            }
        };

        run_intent_analysis(
            &mut state,
            &request,
            &repo_summary,
            &self.inference,
            &self.config,
            deadline,
        )
        .await;

        let groups = run_manager(
            &mut state,
            &request,
            &self.inference,
            &self.config,
            deadline,
        )
        .await;

        let summary = run_expert_execution(
            &mut state,
            groups,
            &request,
            &self.inference,
            &self.inspector,
            &self.config,
            deadline,
        )
        .await;

        let report = run_reporter(&state, summary, &self.inference, &self.config, deadline).await;

        info!(
            confirmed = report.confirmed_count,
            degraded = report.degraded_count,
            "review pipeline complete"
        );
        Ok(report)
    }
}
