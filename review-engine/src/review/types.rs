//! Data model for the review pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed risk classification used to group work units for expert reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskType {
    NullSafety,
    Concurrency,
    Security,
    BusinessIntent,
    Lifecycle,
    Syntax,
}

impl RiskType {
    /// All risk types in declaration order; also the group ordering used by
    /// the manager stage.
    pub const ALL: [RiskType; 6] = [
        RiskType::NullSafety,
        RiskType::Concurrency,
        RiskType::Security,
        RiskType::BusinessIntent,
        RiskType::Lifecycle,
        RiskType::Syntax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskType::NullSafety => "null-safety",
            RiskType::Concurrency => "concurrency",
            RiskType::Security => "security",
            RiskType::BusinessIntent => "business-intent",
            RiskType::Lifecycle => "lifecycle",
            RiskType::Syntax => "syntax",
        }
    }
}

impl fmt::Display for RiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a risk item through the pipeline.
///
/// Created as `Proposed` by intent analysis, re-emitted unchanged by the
/// manager, and transitioned exactly once by expert execution. Terminal
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskStatus {
    Proposed,
    Confirmed,
    Refuted,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Warning
    }
}

/// A single candidate or confirmed issue in the change under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    /// Stable id derived from location, used for dedup and traceability.
    pub id: String,
    pub risk_type: RiskType,
    pub file_path: String,
    /// 1-indexed line in the new version of the file. Always present;
    /// an item without a line number never enters the pipeline.
    pub line_number: u32,
    pub description: String,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
    pub status: RiskStatus,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl RiskItem {
    /// Stable id from location plus the ordinal of the item at that location.
    pub fn derive_id(file_path: &str, line_number: u32, ordinal: usize) -> String {
        format!("{}:{}:{}", file_path, line_number, ordinal)
    }
}

/// Per-file output of intent analysis. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    pub summary: String,
    pub candidate_risks: Vec<RiskItem>,
}

impl FileAnalysis {
    /// Placeholder emitted when a file's analysis unit fails; keeps the
    /// one-entry-per-file invariant intact.
    pub fn empty(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            summary: String::new(),
            candidate_risks: Vec::new(),
        }
    }
}

/// Items of one risk type, handed from the manager to expert execution.
/// Ephemeral; never persisted.
#[derive(Debug, Clone)]
pub struct RiskGroup {
    pub risk_type: RiskType,
    pub items: Vec<RiskItem>,
}

/// A recovered failure, recorded for traceability instead of propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub detail: String,
}

impl StageError {
    pub fn new(stage: &str, detail: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            detail: detail.into(),
        }
    }
}

/// Static-analysis finding injected as extra context; already materialized
/// by an external wrapper, never computed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintFinding {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
}

/// The code change handed to the engine, with all inputs pre-materialized.
#[derive(Debug, Clone, Default)]
pub struct ReviewRequest {
    /// Full unified diff of the change.
    pub diff_text: String,
    /// Touched files, in diff order.
    pub changed_files: Vec<String>,
    /// Per-file diff slices keyed by path. A file without a slice falls back
    /// to the full diff text in its intent prompt.
    pub file_diffs: BTreeMap<String, String>,
    /// Optional static-analysis findings.
    pub lint_findings: Vec<LintFinding>,
}

/// The single mutable context threaded through all stages. Owned exclusively
/// by the orchestrator; each stage writes only the fields it produces.
#[derive(Debug, Clone, Default)]
pub struct ReviewState {
    pub diff_text: String,
    pub changed_files: Vec<String>,
    pub file_analyses: BTreeMap<String, FileAnalysis>,
    pub work_list: Vec<RiskItem>,
    pub confirmed_issues: Vec<RiskItem>,
    pub errors: Vec<StageError>,
}

impl ReviewState {
    pub fn from_request(request: &ReviewRequest) -> Self {
        Self {
            diff_text: request.diff_text.clone(),
            changed_files: request.changed_files.clone(),
            ..Default::default()
        }
    }
}

/// The pipeline's only output: confirmed issues plus the narrative report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewReport {
    pub narrative: String,
    /// Confirmed and degraded items; degraded ones are visibly marked by
    /// their status.
    pub confirmed_issues: Vec<RiskItem>,
    pub confirmed_count: usize,
    pub degraded_count: usize,
    pub refuted_count: usize,
    /// Items whose expert unit was abandoned (timeout or unit error).
    pub unresolved_count: usize,
    pub generated_at: DateTime<Utc>,
}
