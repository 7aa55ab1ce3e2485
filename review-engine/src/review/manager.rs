//! Manager stage
//!
//! Reduces all per-file analyses into one deduplicated, prioritized work
//! list, grouped by risk type for the experts. The grouping mechanics are
//! deterministic and purely local; a single model reasoning pass may then
//! merge near-duplicate descriptions and re-prioritize, with the mechanical
//! list as fallback when that pass cannot be validated. Fallback degrades
//! prioritization but loses no data.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::exec::validate::validate_reply;
use crate::provider::{ChatMessage, InferenceProvider};
use crate::review::infer_bounded;
use crate::review::prompts;
use crate::review::schema::WorkListReply;
use crate::review::types::{
    LintFinding, ReviewRequest, ReviewState, RiskGroup, RiskItem, RiskStatus, RiskType, StageError,
};
use crate::review::workflow::ReviewConfig;

const STAGE: &str = "manager";

/// Build the work list and its partition into risk groups.
pub async fn run_manager(
    state: &mut ReviewState,
    request: &ReviewRequest,
    inference: &Arc<dyn InferenceProvider>,
    config: &ReviewConfig,
    deadline: Option<Instant>,
) -> Vec<RiskGroup> {
    let mut candidates: Vec<RiskItem> = state
        .file_analyses
        .values()
        .flat_map(|analysis| analysis.candidate_risks.iter().cloned())
        .collect();
    candidates.extend(lint_findings_to_risk_items(&request.lint_findings));

    if candidates.is_empty() {
        info!("manager: no candidate risks, work list is empty");
        state.work_list.clear();
        return Vec::new();
    }

    let groups = dedupe_and_group(candidates);
    let mechanical: Vec<RiskItem> = groups
        .iter()
        .flat_map(|g| g.items.iter().cloned())
        .collect();

    info!(
        candidates = mechanical.len(),
        groups = groups.len(),
        "manager: mechanical work list built"
    );

    // One reasoning pass to merge near-duplicates; validated with a single
    // corrective retry, same policy as intent analysis.
    let groups = match reprioritize(&mechanical, inference, config, deadline).await {
        Ok(items) if !items.is_empty() => dedupe_and_group(items),
        Ok(_) => {
            warn!("manager: model returned an empty work list, keeping mechanical order");
            state.errors.push(StageError::new(
                STAGE,
                "model returned empty work list; mechanical order kept",
            ));
            groups
        }
        Err(err) => {
            warn!(error = %err, "manager: reprioritization failed, keeping mechanical order");
            state
                .errors
                .push(StageError::new(STAGE, format!("reprioritization: {}", err)));
            groups
        }
    };

    state.work_list = groups
        .iter()
        .flat_map(|g| g.items.iter().cloned())
        .collect();

    info!(
        work_items = state.work_list.len(),
        groups = groups.len(),
        "manager complete"
    );
    groups
}

/// Deduplicate by (file_path, line_number, risk_type), keeping the
/// highest-confidence instance, then partition into groups ordered by risk
/// type declaration order; within a group: confidence desc, file path, line.
/// Idempotent: running it on its own output yields the same list.
pub fn dedupe_and_group(items: Vec<RiskItem>) -> Vec<RiskGroup> {
    let mut best: HashMap<(String, u32, RiskType), RiskItem> = HashMap::new();
    for item in items {
        let key = (item.file_path.clone(), item.line_number, item.risk_type);
        match best.get(&key) {
            Some(existing) if existing.confidence >= item.confidence => {}
            _ => {
                best.insert(key, item);
            }
        }
    }

    let mut groups = Vec::new();
    for risk_type in RiskType::ALL {
        let mut items: Vec<RiskItem> = best
            .values()
            .filter(|item| item.risk_type == risk_type)
            .cloned()
            .collect();
        if items.is_empty() {
            continue;
        }
        items.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.file_path.cmp(&b.file_path))
                .then_with(|| a.line_number.cmp(&b.line_number))
        });
        groups.push(RiskGroup { risk_type, items });
    }
    groups
}

/// Convert static-analysis findings into syntax risk items. Lint findings
/// carry high confidence since they come from a deterministic tool.
pub fn lint_findings_to_risk_items(findings: &[LintFinding]) -> Vec<RiskItem> {
    let mut ordinals: HashMap<(String, u32), usize> = HashMap::new();
    findings
        .iter()
        .map(|finding| {
            let line = finding.line.max(1);
            let ordinal = ordinals
                .entry((finding.file.clone(), line))
                .or_insert(0);
            let id = RiskItem::derive_id(&finding.file, line, *ordinal);
            *ordinal += 1;
            let description = match &finding.code {
                Some(code) => format!("[{}] {}", code, finding.message),
                None => finding.message.clone(),
            };
            RiskItem {
                id,
                risk_type: RiskType::Syntax,
                file_path: finding.file.clone(),
                line_number: line,
                description,
                confidence: 0.8,
                status: RiskStatus::Proposed,
                severity: finding.severity,
                suggestion: None,
            }
        })
        .collect()
}

/// Single model pass over the full candidate set, one corrective retry.
async fn reprioritize(
    work_list: &[RiskItem],
    inference: &Arc<dyn InferenceProvider>,
    config: &ReviewConfig,
    deadline: Option<Instant>,
) -> Result<Vec<RiskItem>, EngineError> {
    let mut messages = vec![
        ChatMessage::system(prompts::manager_system_prompt()),
        ChatMessage::user(prompts::manager_user_prompt(work_list)),
    ];

    let feedback = match infer_bounded(inference.as_ref(), &messages, config.temperature, deadline)
        .await
    {
        Ok(raw) => match validate_reply::<WorkListReply>(&raw) {
            Ok(reply) => return Ok(reply_to_items(reply)),
            Err(failure) => {
                messages.push(ChatMessage::assistant(raw));
                failure.corrective_feedback()
            }
        },
        Err(err @ EngineError::TimeoutExceeded) => return Err(err),
        Err(err) => format!("The previous attempt failed: {}.", err),
    };

    messages.push(ChatMessage::user(prompts::retry_prompt(&feedback)));
    let raw = infer_bounded(inference.as_ref(), &messages, config.temperature, deadline).await?;
    let reply = validate_reply::<WorkListReply>(&raw)?;
    Ok(reply_to_items(reply))
}

fn reply_to_items(reply: WorkListReply) -> Vec<RiskItem> {
    let mut ordinals: HashMap<(String, u32), usize> = HashMap::new();
    reply
        .items
        .into_iter()
        .map(|item| {
            let ordinal = ordinals
                .entry((item.file_path.clone(), item.risk.line_number))
                .or_insert(0);
            let id = RiskItem::derive_id(&item.file_path, item.risk.line_number, *ordinal);
            *ordinal += 1;
            RiskItem {
                id,
                risk_type: item.risk.risk_type,
                file_path: item.file_path,
                line_number: item.risk.line_number,
                description: item.risk.description,
                confidence: item.risk.confidence,
                status: RiskStatus::Proposed,
                severity: item.risk.severity.unwrap_or_default(),
                suggestion: item.risk.suggestion,
            }
        })
        .collect()
}
