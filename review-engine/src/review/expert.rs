//! Expert execution stage
//!
//! One bounded reasoning loop per work item, run concurrently across all
//! risk groups under the shared executor. Each unit is an explicit state
//! machine:
//!
//! ```text
//! Reasoning ──tool request──▶ AwaitingTool ──result appended──▶ Reasoning
//!     │
//!     ├──valid verdict──▶ FinalAnswer
//!     └──retry/iteration budget exhausted──▶ Fallback (degraded item)
//! ```
//!
//! A unit that cannot produce a valid verdict within its budgets emits the
//! original item with `Degraded` status instead of silently dropping it.

use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::exec::batch::run_all;
use crate::provider::{ChatMessage, InferenceProvider, Inspector};
use crate::review::prompts;
use crate::review::schema::{parse_expert_reply, ExpertReply, ToolKind, ToolRequest, Verdict, VerdictStatus};
use crate::review::types::{ReviewRequest, ReviewState, RiskGroup, RiskItem, RiskStatus, StageError};
use crate::review::workflow::ReviewConfig;

const STAGE: &str = "expert";

/// Counts the reporter needs beyond the confirmed set.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpertSummary {
    pub refuted: usize,
    pub unresolved: usize,
}

/// Terminal result of one item's reasoning loop.
#[derive(Debug)]
enum ItemVerdict {
    Confirmed(RiskItem),
    Refuted { id: String, reason: String },
    Degraded(RiskItem),
}

/// Per-unit control state; tool results and corrective feedback accumulate
/// in the transcript, not here.
enum UnitState {
    Reasoning,
    AwaitingTool(ToolRequest),
    FinalAnswer(Verdict),
    Fallback(String),
}

/// Run the expert loop over every item in every group, updating
/// `confirmed_issues` and `errors` in place.
pub async fn run_expert_execution(
    state: &mut ReviewState,
    groups: Vec<RiskGroup>,
    request: &ReviewRequest,
    inference: &Arc<dyn InferenceProvider>,
    inspector: &Arc<dyn Inspector>,
    config: &ReviewConfig,
    deadline: Option<Instant>,
) -> ExpertSummary {
    let mut units = Vec::new();
    for group in groups {
        for item in group.items {
            let key = format!("{}:{}", group.risk_type, item.id);
            let diff_context = request
                .file_diffs
                .get(&item.file_path)
                .cloned()
                .unwrap_or_else(|| request.diff_text.clone());
            let inference = inference.clone();
            let inspector = inspector.clone();
            let config = config.clone();

            units.push((key, async move {
                Ok(review_item(item, diff_context, inference, inspector, &config).await)
            }));
        }
    }

    info!(
        units = units.len(),
        concurrency = config.expert_concurrency,
        "expert execution starting"
    );

    let outcomes = run_all(units, config.expert_concurrency, deadline).await;

    let mut confirmed = Vec::new();
    let mut summary = ExpertSummary::default();
    for outcome in outcomes {
        match outcome.result {
            Ok(ItemVerdict::Confirmed(item)) => confirmed.push(item),
            Ok(ItemVerdict::Degraded(item)) => {
                warn!(id = %item.id, "verdict degraded, budgets exhausted");
                confirmed.push(item);
            }
            Ok(ItemVerdict::Refuted { id, reason }) => {
                summary.refuted += 1;
                state
                    .errors
                    .push(StageError::new(STAGE, format!("refuted {}: {}", id, reason)));
            }
            Err(err) => {
                summary.unresolved += 1;
                state.errors.push(StageError::new(
                    STAGE,
                    format!("unresolved {}: {}", outcome.unit_key, err),
                ));
            }
        }
    }

    confirmed.sort_by(|a, b| {
        a.risk_type
            .cmp(&b.risk_type)
            .then_with(|| a.file_path.cmp(&b.file_path))
            .then_with(|| a.line_number.cmp(&b.line_number))
            .then_with(|| a.id.cmp(&b.id))
    });

    info!(
        confirmed = confirmed.iter().filter(|i| i.status == RiskStatus::Confirmed).count(),
        degraded = confirmed.iter().filter(|i| i.status == RiskStatus::Degraded).count(),
        refuted = summary.refuted,
        unresolved = summary.unresolved,
        "expert execution complete"
    );

    state.confirmed_issues = confirmed;
    summary
}

/// Drive one item through the reasoning loop until a verdict or fallback.
///
/// Transport failures (inference or tool) count against the same retry
/// budget as validation failures. Each model invocation consumes one
/// iteration; tool execution itself does not.
async fn review_item(
    item: RiskItem,
    diff_context: String,
    inference: Arc<dyn InferenceProvider>,
    inspector: Arc<dyn Inspector>,
    config: &ReviewConfig,
) -> ItemVerdict {
    let mut transcript = vec![
        ChatMessage::system(prompts::expert_system_prompt(item.risk_type)),
        ChatMessage::user(prompts::expert_task_prompt(&item, &diff_context)),
    ];
    let mut unit_state = UnitState::Reasoning;
    let mut failures: u32 = 0;
    let mut iterations: u32 = 0;

    loop {
        unit_state = match unit_state {
            UnitState::Reasoning => {
                if iterations >= config.max_iterations {
                    UnitState::Fallback(format!(
                        "iteration budget ({}) exhausted",
                        config.max_iterations
                    ))
                } else {
                    iterations += 1;
                    match inference.infer(&transcript, config.temperature).await {
                        Ok(raw) => {
                            transcript.push(ChatMessage::assistant(raw.clone()));
                            match parse_expert_reply(&raw) {
                                Ok(ExpertReply::Tool(request)) => UnitState::AwaitingTool(request),
                                Ok(ExpertReply::Verdict(verdict)) => UnitState::FinalAnswer(verdict),
                                Err(failure) => {
                                    failures += 1;
                                    if failures > config.max_retries {
                                        UnitState::Fallback(format!(
                                            "retry budget ({}) exhausted: {}",
                                            config.max_retries, failure
                                        ))
                                    } else {
                                        transcript.push(ChatMessage::user(prompts::retry_prompt(
                                            &failure.corrective_feedback(),
                                        )));
                                        UnitState::Reasoning
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            failures += 1;
                            if failures > config.max_retries {
                                UnitState::Fallback(format!(
                                    "retry budget ({}) exhausted: {}",
                                    config.max_retries, err
                                ))
                            } else {
                                transcript.push(ChatMessage::user(prompts::retry_prompt(
                                    &format!("The previous attempt failed: {}.", err),
                                )));
                                UnitState::Reasoning
                            }
                        }
                    }
                }
            }

            UnitState::AwaitingTool(request) => {
                match execute_tool(&request, inspector.as_ref(), &config.repo_structure_key).await {
                    Ok(result) => {
                        transcript.push(ChatMessage::tool(result));
                        UnitState::Reasoning
                    }
                    Err(err) => {
                        failures += 1;
                        if failures > config.max_retries {
                            UnitState::Fallback(format!(
                                "retry budget ({}) exhausted: tool failed: {}",
                                config.max_retries, err
                            ))
                        } else {
                            transcript
                                .push(ChatMessage::tool(format!("tool call failed: {}", err)));
                            UnitState::Reasoning
                        }
                    }
                }
            }

            UnitState::FinalAnswer(verdict) => {
                return apply_verdict(item, verdict);
            }

            UnitState::Fallback(reason) => {
                debug!(id = %item.id, %reason, "falling back to degraded verdict");
                let mut degraded = item;
                degraded.status = RiskStatus::Degraded;
                return ItemVerdict::Degraded(degraded);
            }
        };
    }
}

/// Invoke the requested read-only inspection capability.
async fn execute_tool(
    request: &ToolRequest,
    inspector: &dyn Inspector,
    default_repo_key: &str,
) -> Result<String, EngineError> {
    match request.tool {
        ToolKind::FetchRepoStructure => {
            let key = request
                .args
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or(default_repo_key);
            inspector.fetch_repo_structure(key).await
        }
        ToolKind::ReadFile => {
            // `path` presence is guaranteed by reply validation
            let path = request
                .args
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let start = request.args.get("start_line").and_then(Value::as_u64);
            let end = request.args.get("end_line").and_then(Value::as_u64);
            let range = match (start, end) {
                (Some(s), Some(e)) => Some((s as u32, e as u32)),
                _ => None,
            };
            inspector.read_file(path, range).await
        }
        ToolKind::RunGrep => {
            // `pattern` presence is guaranteed by reply validation
            let pattern = request
                .args
                .get("pattern")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let include = request.args.get("include").and_then(Value::as_str);
            inspector.run_grep(pattern, include).await
        }
    }
}

/// Map a validated verdict onto the item's terminal status.
fn apply_verdict(original: RiskItem, verdict: Verdict) -> ItemVerdict {
    match verdict.status {
        VerdictStatus::Confirmed => {
            let mut item = original;
            item.status = RiskStatus::Confirmed;
            item.confidence = verdict.confidence;
            if let Some(description) = verdict.description {
                item.description = description;
            }
            if verdict.suggestion.is_some() {
                item.suggestion = verdict.suggestion;
            }
            ItemVerdict::Confirmed(item)
        }
        VerdictStatus::Refuted => ItemVerdict::Refuted {
            id: original.id,
            reason: verdict
                .description
                .unwrap_or_else(|| "refuted without explanation".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::types::{RiskType, Severity};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct SeqProvider {
        replies: Mutex<VecDeque<Result<String, EngineError>>>,
    }

    impl SeqProvider {
        fn new(replies: Vec<Result<String, EngineError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl InferenceProvider for SeqProvider {
        async fn infer(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, EngineError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(EngineError::Transport("script exhausted".into())))
        }
    }

    struct StubInspector {
        reads: Mutex<Vec<(String, Option<(u32, u32)>)>>,
        greps: Mutex<Vec<(String, Option<String>)>>,
    }

    impl StubInspector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                reads: Mutex::new(Vec::new()),
                greps: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Inspector for StubInspector {
        async fn fetch_repo_structure(&self, _key: &str) -> Result<String, EngineError> {
            Ok("src/\n  lib.rs\n".into())
        }

        async fn read_file(
            &self,
            path: &str,
            line_range: Option<(u32, u32)>,
        ) -> Result<String, EngineError> {
            self.reads
                .lock()
                .unwrap()
                .push((path.to_string(), line_range));
            Ok("fn main() {}".into())
        }

        async fn run_grep(
            &self,
            pattern: &str,
            include: Option<&str>,
        ) -> Result<String, EngineError> {
            self.greps
                .lock()
                .unwrap()
                .push((pattern.to_string(), include.map(str::to_string)));
            Ok("a.rs:10: let q = raw_query;".into())
        }
    }

    fn proposed_item() -> RiskItem {
        RiskItem {
            id: "a.rs:10:0".into(),
            risk_type: RiskType::Security,
            file_path: "a.rs".into(),
            line_number: 10,
            description: "possible injection".into(),
            confidence: 0.6,
            status: RiskStatus::Proposed,
            severity: Severity::Warning,
            suggestion: None,
        }
    }

    fn one_group() -> Vec<RiskGroup> {
        vec![RiskGroup {
            risk_type: RiskType::Security,
            items: vec![proposed_item()],
        }]
    }

    async fn run_stage(
        provider: Arc<dyn InferenceProvider>,
        inspector: Arc<dyn Inspector>,
        config: &ReviewConfig,
    ) -> (ReviewState, ExpertSummary) {
        let mut state = ReviewState::default();
        let request = ReviewRequest::default();
        let summary = run_expert_execution(
            &mut state,
            one_group(),
            &request,
            &provider,
            &inspector,
            config,
            None,
        )
        .await;
        (state, summary)
    }

    #[tokio::test]
    async fn tool_round_trip_then_confirmation() {
        let provider = SeqProvider::new(vec![
            Ok(r#"{"tool": "read_file", "args": {"path": "a.rs", "start_line": 5, "end_line": 15}}"#.into()),
            Ok(r#"{"status": "confirmed", "confidence": 0.95, "description": "confirmed injection", "suggestion": "parameterize the query"}"#.into()),
        ]);
        let inspector = StubInspector::new();
        let config = ReviewConfig::default();

        let (state, summary) = run_stage(provider, inspector.clone(), &config).await;

        assert_eq!(state.confirmed_issues.len(), 1);
        let item = &state.confirmed_issues[0];
        assert_eq!(item.status, RiskStatus::Confirmed);
        assert_eq!(item.description, "confirmed injection");
        assert_eq!(item.confidence, 0.95);
        assert_eq!(item.suggestion.as_deref(), Some("parameterize the query"));
        assert_eq!(summary.refuted, 0);
        assert_eq!(
            inspector.reads.lock().unwrap().as_slice(),
            &[("a.rs".to_string(), Some((5, 15)))]
        );
    }

    #[tokio::test]
    async fn grep_round_trip_then_confirmation() {
        let provider = SeqProvider::new(vec![
            Ok(r#"{"tool": "run_grep", "args": {"pattern": "raw_query", "include": "*.rs"}}"#.into()),
            Ok(r#"{"status": "confirmed", "confidence": 0.9, "description": "query built from raw input"}"#.into()),
        ]);
        let inspector = StubInspector::new();
        let config = ReviewConfig::default();

        let (state, _) = run_stage(provider, inspector.clone(), &config).await;

        assert_eq!(state.confirmed_issues.len(), 1);
        assert_eq!(state.confirmed_issues[0].status, RiskStatus::Confirmed);
        assert_eq!(
            inspector.greps.lock().unwrap().as_slice(),
            &[("raw_query".to_string(), Some("*.rs".to_string()))]
        );
    }

    #[tokio::test]
    async fn never_valid_reply_degrades_not_drops() {
        let provider = SeqProvider::new(vec![
            Ok("nonsense".into()),
            Ok("more nonsense".into()),
            Ok("still nonsense".into()),
            Ok("yet more".into()),
        ]);
        let config = ReviewConfig {
            max_retries: 2,
            max_iterations: 4,
            ..ReviewConfig::default()
        };

        let (state, _) = run_stage(provider, StubInspector::new(), &config).await;

        assert_eq!(state.confirmed_issues.len(), 1);
        let item = &state.confirmed_issues[0];
        assert_eq!(item.status, RiskStatus::Degraded);
        // original description and location preserved
        assert_eq!(item.description, "possible injection");
        assert_eq!(item.line_number, 10);
    }

    #[tokio::test]
    async fn refuted_item_dropped_but_traced() {
        let provider = SeqProvider::new(vec![Ok(
            r#"{"status": "refuted", "confidence": 0.9, "description": "input is already sanitized"}"#.into(),
        )]);
        let config = ReviewConfig::default();

        let (state, summary) = run_stage(provider, StubInspector::new(), &config).await;

        assert!(state.confirmed_issues.is_empty());
        assert_eq!(summary.refuted, 1);
        assert!(state
            .errors
            .iter()
            .any(|e| e.stage == "expert" && e.detail.contains("a.rs:10:0")));
    }

    #[tokio::test]
    async fn endless_tool_requests_hit_iteration_budget() {
        let tool_reply = r#"{"tool": "fetch_repo_structure", "args": {}}"#;
        let provider = SeqProvider::new(vec![
            Ok(tool_reply.into()),
            Ok(tool_reply.into()),
            Ok(tool_reply.into()),
            Ok(tool_reply.into()),
            Ok(tool_reply.into()),
        ]);
        let config = ReviewConfig {
            max_iterations: 3,
            ..ReviewConfig::default()
        };

        let (state, _) = run_stage(provider, StubInspector::new(), &config).await;

        assert_eq!(state.confirmed_issues.len(), 1);
        assert_eq!(state.confirmed_issues[0].status, RiskStatus::Degraded);
    }

    #[tokio::test]
    async fn transport_errors_consume_retry_budget() {
        let provider = SeqProvider::new(vec![
            Err(EngineError::Transport("503".into())),
            Err(EngineError::Transport("503".into())),
            Err(EngineError::Transport("503".into())),
        ]);
        let config = ReviewConfig {
            max_retries: 2,
            ..ReviewConfig::default()
        };

        let (state, summary) = run_stage(provider, StubInspector::new(), &config).await;

        assert_eq!(state.confirmed_issues.len(), 1);
        assert_eq!(state.confirmed_issues[0].status, RiskStatus::Degraded);
        assert_eq!(summary.unresolved, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_leaves_items_unresolved() {
        struct SlowProvider;

        #[async_trait]
        impl InferenceProvider for SlowProvider {
            async fn infer(
                &self,
                _messages: &[ChatMessage],
                _temperature: f32,
            ) -> Result<String, EngineError> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok("never".into())
            }
        }

        let mut state = ReviewState::default();
        let request = ReviewRequest::default();
        let provider: Arc<dyn InferenceProvider> = Arc::new(SlowProvider);
        let inspector: Arc<dyn Inspector> = StubInspector::new();
        let config = ReviewConfig::default();
        let deadline = Instant::now() + std::time::Duration::from_secs(1);

        let summary = run_expert_execution(
            &mut state,
            one_group(),
            &request,
            &provider,
            &inspector,
            &config,
            Some(deadline),
        )
        .await;

        assert!(state.confirmed_issues.is_empty());
        assert_eq!(summary.unresolved, 1);
        assert!(state
            .errors
            .iter()
            .any(|e| e.detail.contains("timeout exceeded")));
    }
}
