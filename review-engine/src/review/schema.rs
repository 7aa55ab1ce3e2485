//! Typed shapes for structured model replies
//!
//! Each stage that parses model output decodes into one of these via the
//! validator. The lenient path exists only for second-attempt intent replies,
//! where the policy is: degrade missing optional fields to safe defaults,
//! drop risk items missing a required field. A dropped item is discarded,
//! never fabricated.

use serde::Deserialize;
use serde_json::Value;

use crate::exec::validate::{extract_json, validate_reply, ValidateFields, ValidationFailure};
use crate::review::types::{RiskType, Severity};

/// Defaults applied when the lenient path degrades an optional field.
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_DESCRIPTION: &str = "(no description provided)";

/// One candidate risk as reported by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskReply {
    pub risk_type: RiskType,
    pub line_number: u32,
    pub description: String,
    pub confidence: f32,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl RiskReply {
    fn check(&self) -> Result<(), ValidationFailure> {
        if self.line_number < 1 {
            return Err(ValidationFailure::out_of_range(
                "line_number must be a positive integer (1-indexed)",
            ));
        }
        if self.description.trim().is_empty() {
            return Err(ValidationFailure::missing_field(
                "description must be a non-empty string",
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationFailure::out_of_range(format!(
                "confidence {} outside [0.0, 1.0]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Intent-analysis reply for a single file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileAnalysisReply {
    pub summary: String,
    #[serde(default)]
    pub risks: Vec<RiskReply>,
}

impl ValidateFields for FileAnalysisReply {
    fn validate_fields(&self) -> Result<(), ValidationFailure> {
        if self.summary.trim().is_empty() {
            return Err(ValidationFailure::missing_field(
                "summary must be a non-empty string",
            ));
        }
        for risk in &self.risks {
            risk.check()?;
        }
        Ok(())
    }
}

/// One re-prioritized work item from the manager's reasoning pass.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkItemReply {
    pub file_path: String,
    #[serde(flatten)]
    pub risk: RiskReply,
}

/// Manager reply: the full re-prioritized work list.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkListReply {
    pub items: Vec<WorkItemReply>,
}

impl ValidateFields for WorkListReply {
    fn validate_fields(&self) -> Result<(), ValidationFailure> {
        for item in &self.items {
            if item.file_path.trim().is_empty() {
                return Err(ValidationFailure::missing_field(
                    "file_path must be a non-empty string",
                ));
            }
            item.risk.check()?;
        }
        Ok(())
    }
}

/// Which read-only inspection capability the expert wants to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    FetchRepoStructure,
    ReadFile,
    RunGrep,
}

/// A tool invocation requested mid-reasoning.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub tool: ToolKind,
    #[serde(default)]
    pub args: Value,
}

impl ValidateFields for ToolRequest {
    fn validate_fields(&self) -> Result<(), ValidationFailure> {
        if self.tool == ToolKind::ReadFile
            && self.args.get("path").and_then(Value::as_str).is_none()
        {
            return Err(ValidationFailure::missing_field(
                "read_file requires a string `path` argument",
            ));
        }
        if self.tool == ToolKind::RunGrep
            && self.args.get("pattern").and_then(Value::as_str).is_none()
        {
            return Err(ValidationFailure::missing_field(
                "run_grep requires a string `pattern` argument",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Confirmed,
    Refuted,
}

/// The expert's final answer for one risk item.
#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(default)]
    pub description: Option<String>,
    pub confidence: f32,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl ValidateFields for Verdict {
    fn validate_fields(&self) -> Result<(), ValidationFailure> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationFailure::out_of_range(format!(
                "confidence {} outside [0.0, 1.0]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Either branch an expert reasoning step can take.
#[derive(Debug, Clone)]
pub enum ExpertReply {
    Tool(ToolRequest),
    Verdict(Verdict),
}

/// Parse an expert reasoning reply: a `tool` key means a tool request,
/// anything else must be a verdict.
pub fn parse_expert_reply(raw: &str) -> Result<ExpertReply, ValidationFailure> {
    let json = extract_json(raw)
        .ok_or_else(|| ValidationFailure::malformed("no JSON object found in reply"))?;
    let probe: Value = serde_json::from_str(&json)
        .map_err(|e| ValidationFailure::malformed(e.to_string()))?;

    if probe.get("tool").is_some() {
        validate_reply::<ToolRequest>(&json).map(ExpertReply::Tool)
    } else {
        validate_reply::<Verdict>(&json).map(ExpertReply::Verdict)
    }
}

/// Lenient second-attempt decoding of an intent reply.
///
/// Returns the salvaged summary, the risks that carried valid required
/// fields, and the number of items dropped. `None` when the reply holds no
/// JSON object at all.
pub fn lenient_file_analysis(raw: &str) -> Option<(String, Vec<RiskReply>, usize)> {
    let json = extract_json(raw)?;
    let value: Value = serde_json::from_str(&json).ok()?;

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let mut kept = Vec::new();
    let mut dropped = 0usize;

    if let Some(risks) = value.get("risks").and_then(Value::as_array) {
        for entry in risks {
            match salvage_risk(entry) {
                Some(risk) => kept.push(risk),
                None => dropped += 1,
            }
        }
    }

    Some((summary, kept, dropped))
}

/// Keep a risk entry only if its required fields (`risk_type`,
/// `line_number` >= 1) are valid; degrade everything optional.
fn salvage_risk(entry: &Value) -> Option<RiskReply> {
    let risk_type: RiskType = serde_json::from_value(entry.get("risk_type")?.clone()).ok()?;
    let line_number = entry.get("line_number")?.as_u64()?;
    if line_number < 1 || line_number > u64::from(u32::MAX) {
        return None;
    }

    let description = entry
        .get("description")
        .and_then(Value::as_str)
        .filter(|d| !d.trim().is_empty())
        .unwrap_or(DEFAULT_DESCRIPTION)
        .to_string();
    let confidence = entry
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| (c as f32).clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);
    let severity = entry
        .get("severity")
        .and_then(|s| serde_json::from_value(s.clone()).ok());
    let suggestion = entry
        .get("suggestion")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some(RiskReply {
        risk_type,
        line_number: line_number as u32,
        description,
        confidence,
        severity,
        suggestion,
    })
}
