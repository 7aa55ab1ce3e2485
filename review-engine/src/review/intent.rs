//! Intent analysis stage
//!
//! Fans out one unit per changed file: render the intent prompt for the
//! file's diff slice, call the model, validate the reply. A failed first
//! attempt (transport or validation, treated identically) gets exactly one
//! corrective retry; the second attempt is accepted leniently. A unit that
//! still yields nothing usable contributes an empty analysis plus an error
//! record. The stage never fails the pipeline and always produces exactly
//! one entry per file.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::exec::batch::run_all;
use crate::exec::validate::validate_reply;
use crate::provider::{ChatMessage, InferenceProvider};
use crate::review::prompts;
use crate::review::schema::{lenient_file_analysis, FileAnalysisReply, RiskReply};
use crate::review::types::{
    FileAnalysis, LintFinding, ReviewRequest, ReviewState, RiskItem, RiskStatus, StageError,
};
use crate::review::workflow::ReviewConfig;

const STAGE: &str = "intent";

/// Run intent analysis over all changed files, updating `file_analyses` and
/// `errors` in place.
pub async fn run_intent_analysis(
    state: &mut ReviewState,
    request: &ReviewRequest,
    repo_summary: &str,
    inference: &Arc<dyn InferenceProvider>,
    config: &ReviewConfig,
    deadline: Option<Instant>,
) {
    info!(
        files = state.changed_files.len(),
        concurrency = config.intent_concurrency,
        "intent analysis starting"
    );

    let mut units = Vec::new();
    for file_path in &state.changed_files {
        let file_path = file_path.clone();
        let diff_slice = request
            .file_diffs
            .get(&file_path)
            .cloned()
            .unwrap_or_else(|| request.diff_text.clone());
        let lints: Vec<LintFinding> = request
            .lint_findings
            .iter()
            .filter(|l| l.file == file_path)
            .cloned()
            .collect();
        let repo_summary = repo_summary.to_string();
        let inference = inference.clone();
        let temperature = config.temperature;

        units.push((
            file_path.clone(),
            async move {
                analyze_file(
                    file_path,
                    diff_slice,
                    repo_summary,
                    lints,
                    inference,
                    temperature,
                )
                .await
            },
        ));
    }

    let outcomes = run_all(units, config.intent_concurrency, deadline).await;

    for outcome in outcomes {
        let file_path = outcome.unit_key;
        match outcome.result {
            Ok((analysis, notes)) => {
                state.errors.extend(notes);
                state.file_analyses.insert(file_path, analysis);
            }
            Err(err) => {
                warn!(file = %file_path, error = %err, "file analysis failed");
                state
                    .errors
                    .push(StageError::new(STAGE, format!("{}: {}", file_path, err)));
                state
                    .file_analyses
                    .insert(file_path.clone(), FileAnalysis::empty(file_path));
            }
        }
    }

    info!(
        analyses = state.file_analyses.len(),
        errors = state.errors.len(),
        "intent analysis complete"
    );
}

/// Analyze one file: first attempt, one corrective retry, then lenient
/// acceptance of the second reply.
async fn analyze_file(
    file_path: String,
    diff_slice: String,
    repo_summary: String,
    lints: Vec<LintFinding>,
    inference: Arc<dyn InferenceProvider>,
    temperature: f32,
) -> Result<(FileAnalysis, Vec<StageError>), EngineError> {
    let mut messages = vec![
        ChatMessage::system(prompts::intent_system_prompt()),
        ChatMessage::user(prompts::intent_user_prompt(
            &file_path,
            &diff_slice,
            &repo_summary,
            &lints,
        )),
    ];

    // Transport and validation failures are counted identically here:
    // either way the one corrective retry is spent.
    let feedback = match inference.infer(&messages, temperature).await {
        Ok(raw) => match validate_reply::<FileAnalysisReply>(&raw) {
            Ok(reply) => return Ok((to_file_analysis(&file_path, reply.summary, reply.risks), Vec::new())),
            Err(failure) => {
                messages.push(ChatMessage::assistant(raw));
                failure.corrective_feedback()
            }
        },
        Err(err) => format!("The previous attempt failed: {}.", err),
    };

    messages.push(ChatMessage::user(prompts::retry_prompt(&feedback)));
    let raw = inference.infer(&messages, temperature).await?;

    match validate_reply::<FileAnalysisReply>(&raw) {
        Ok(reply) => Ok((to_file_analysis(&file_path, reply.summary, reply.risks), Vec::new())),
        Err(failure) => match lenient_file_analysis(&raw) {
            Some((summary, kept, dropped)) => {
                let mut notes = Vec::new();
                if dropped > 0 {
                    notes.push(StageError::new(
                        STAGE,
                        format!(
                            "{}: dropped {} risk item(s) missing required fields",
                            file_path, dropped
                        ),
                    ));
                }
                Ok((to_file_analysis(&file_path, summary, kept), notes))
            }
            None => Err(EngineError::Validation(failure)),
        },
    }
}

/// Convert a validated reply into the immutable per-file analysis, assigning
/// stable ids by location ordinal.
fn to_file_analysis(file_path: &str, summary: String, risks: Vec<RiskReply>) -> FileAnalysis {
    let mut ordinals: HashMap<u32, usize> = HashMap::new();
    let candidate_risks = risks
        .into_iter()
        .map(|risk| {
            let ordinal = ordinals.entry(risk.line_number).or_insert(0);
            let id = RiskItem::derive_id(file_path, risk.line_number, *ordinal);
            *ordinal += 1;
            RiskItem {
                id,
                risk_type: risk.risk_type,
                file_path: file_path.to_string(),
                line_number: risk.line_number,
                description: risk.description,
                confidence: risk.confidence,
                status: RiskStatus::Proposed,
                severity: risk.severity.unwrap_or_default(),
                suggestion: risk.suggestion,
            }
        })
        .collect();

    FileAnalysis {
        file_path: file_path.to_string(),
        summary,
        candidate_risks,
    }
}
