//! Reporter stage
//!
//! Synchronous reduce over the confirmed set into the final narrative. The
//! narrative is free-form text and is deliberately not run through the
//! validator: it is never machine-parsed downstream, and forcing it into a
//! rigid schema would hurt report quality. One model call, mechanical
//! fallback, never fails.

use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::provider::{ChatMessage, InferenceProvider};
use crate::review::expert::ExpertSummary;
use crate::review::infer_bounded;
use crate::review::prompts;
use crate::review::types::{ReviewReport, ReviewState, RiskStatus, RiskType};
use crate::review::workflow::ReviewConfig;

/// Aggregate the pipeline's results into the final report.
pub async fn run_reporter(
    state: &ReviewState,
    summary: ExpertSummary,
    inference: &Arc<dyn InferenceProvider>,
    config: &ReviewConfig,
    deadline: Option<Instant>,
) -> ReviewReport {
    let confirmed_count = state
        .confirmed_issues
        .iter()
        .filter(|i| i.status == RiskStatus::Confirmed)
        .count();
    let degraded_count = state
        .confirmed_issues
        .iter()
        .filter(|i| i.status == RiskStatus::Degraded)
        .count();

    let prompt = prompts::reporter_prompt(
        &state.confirmed_issues,
        degraded_count,
        summary.refuted,
        summary.unresolved,
    );
    let messages = [ChatMessage::user(prompt)];

    let narrative =
        match infer_bounded(inference.as_ref(), &messages, config.temperature, deadline).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => mechanical_narrative(state, degraded_count, summary),
            Err(err) => {
                warn!(error = %err, "reporter narrative call failed, using mechanical report");
                mechanical_narrative(state, degraded_count, summary)
            }
        };

    info!(
        confirmed = confirmed_count,
        degraded = degraded_count,
        refuted = summary.refuted,
        unresolved = summary.unresolved,
        "report generated"
    );

    ReviewReport {
        narrative,
        confirmed_issues: state.confirmed_issues.clone(),
        confirmed_count,
        degraded_count,
        refuted_count: summary.refuted,
        unresolved_count: summary.unresolved,
        generated_at: Utc::now(),
    }
}

/// Fallback narrative assembled without the model.
fn mechanical_narrative(
    state: &ReviewState,
    degraded_count: usize,
    summary: ExpertSummary,
) -> String {
    let mut report = String::from("# Code Review Report\n");
    report.push_str(&format!(
        "\nReviewed {} changed file(s); {} issue(s) found.\n",
        state.changed_files.len(),
        state.confirmed_issues.len()
    ));

    for risk_type in RiskType::ALL {
        let items: Vec<_> = state
            .confirmed_issues
            .iter()
            .filter(|i| i.risk_type == risk_type)
            .collect();
        if items.is_empty() {
            continue;
        }
        report.push_str(&format!("\n## {}\n", risk_type));
        for item in items {
            let marker = if item.status == RiskStatus::Degraded {
                " (unconfirmed)"
            } else {
                ""
            };
            report.push_str(&format!(
                "- {}:{}{}: {}\n",
                item.file_path, item.line_number, marker, item.description
            ));
            if let Some(suggestion) = &item.suggestion {
                report.push_str(&format!("  - suggestion: {}\n", suggestion));
            }
        }
    }

    report.push_str(&format!(
        "\n---\nconfirmed: {} | unconfirmed: {} | refuted: {} | unresolved: {}\n",
        state.confirmed_issues.len() - degraded_count,
        degraded_count,
        summary.refuted,
        summary.unresolved
    ));

    if summary.unresolved > 0 {
        report.push_str(&format!(
            "{} item(s) could not be resolved before the time budget expired.\n",
            summary.unresolved
        ));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::review::types::{RiskItem, Severity};
    use async_trait::async_trait;

    struct FixedProvider(Option<String>);

    #[async_trait]
    impl InferenceProvider for FixedProvider {
        async fn infer(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, EngineError> {
            match &self.0 {
                Some(text) => Ok(text.clone()),
                None => Err(EngineError::Transport("down".into())),
            }
        }
    }

    fn state_with_findings() -> ReviewState {
        let mut state = ReviewState {
            changed_files: vec!["a.rs".into(), "b.rs".into()],
            ..Default::default()
        };
        state.confirmed_issues = vec![
            RiskItem {
                id: "a.rs:3:0".into(),
                risk_type: RiskType::Concurrency,
                file_path: "a.rs".into(),
                line_number: 3,
                description: "lock held across await".into(),
                confidence: 0.9,
                status: RiskStatus::Confirmed,
                severity: Severity::Error,
                suggestion: Some("scope the guard".into()),
            },
            RiskItem {
                id: "b.rs:8:0".into(),
                risk_type: RiskType::Security,
                file_path: "b.rs".into(),
                line_number: 8,
                description: "unvalidated input".into(),
                confidence: 0.5,
                status: RiskStatus::Degraded,
                severity: Severity::Warning,
                suggestion: None,
            },
        ];
        state
    }

    #[tokio::test]
    async fn uses_model_narrative_when_available() {
        let state = state_with_findings();
        let provider: Arc<dyn InferenceProvider> =
            Arc::new(FixedProvider(Some("## Looks risky\n...".into())));
        let config = ReviewConfig::default();

        let report =
            run_reporter(&state, ExpertSummary::default(), &provider, &config, None).await;

        assert_eq!(report.narrative, "## Looks risky\n...");
        assert_eq!(report.confirmed_count, 1);
        assert_eq!(report.degraded_count, 1);
        assert_eq!(report.confirmed_issues.len(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_mechanical_narrative() {
        let state = state_with_findings();
        let provider: Arc<dyn InferenceProvider> = Arc::new(FixedProvider(None));
        let config = ReviewConfig::default();
        let summary = ExpertSummary {
            refuted: 1,
            unresolved: 3,
        };

        let report = run_reporter(&state, summary, &provider, &config, None).await;

        assert!(report.narrative.contains("# Code Review Report"));
        assert!(report.narrative.contains("a.rs:3"));
        assert!(report.narrative.contains("(unconfirmed)"));
        assert!(report.narrative.contains("refuted: 1"));
        assert!(report
            .narrative
            .contains("3 item(s) could not be resolved"));
        assert_eq!(report.unresolved_count, 3);
    }
}
