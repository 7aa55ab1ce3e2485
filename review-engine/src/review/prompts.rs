//! Prompt rendering for each stage
//!
//! Thin, swappable text builders. The engine's contracts live in the
//! validator and the stage logic, not here.

use crate::review::types::{LintFinding, RiskItem, RiskType};

/// Allowed risk_type values, rendered into format instructions.
fn risk_type_values() -> String {
    RiskType::ALL
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(", ")
}

fn risk_field_rules() -> String {
    format!(
        "- \"risk_type\" must be one of: {}\n\
         - \"line_number\" must be a positive integer (1-indexed, in the new file)\n\
         - \"confidence\" must be a float between 0.0 and 1.0\n\
         - \"severity\" is optional, one of: \"error\", \"warning\", \"info\"\n\
         - \"suggestion\" is optional and may be omitted\n\
         Return only the JSON object, without markdown code blocks or extra text.",
        risk_type_values()
    )
}

pub fn intent_system_prompt() -> String {
    "You are a code reviewer analyzing one changed file from a pull request. \
     Summarize the intent of the change and list concrete potential risks, \
     each anchored to a specific line in the new version of the file. \
     Only report risks you can point to in the diff."
        .to_string()
}

pub fn intent_user_prompt(
    file_path: &str,
    diff_slice: &str,
    repo_summary: &str,
    lints: &[LintFinding],
) -> String {
    let mut prompt = format!(
        "## File under review\n{}\n\n## Diff\n{}\n",
        file_path, diff_slice
    );

    if !repo_summary.is_empty() {
        prompt.push_str(&format!("\n## Repository structure\n{}\n", repo_summary));
    }

    if !lints.is_empty() {
        prompt.push_str("\n## Static-analysis findings for this file\n");
        for lint in lints {
            let code = lint.code.as_deref().unwrap_or("-");
            prompt.push_str(&format!("- line {} [{}] {}\n", lint.line, code, lint.message));
        }
    }

    prompt.push_str(&format!(
        "\n## Output format\nRespond with a JSON object: \
         {{\"summary\": \"<intent of the change>\", \"risks\": [{{\"risk_type\": ..., \
         \"line_number\": ..., \"description\": ..., \"confidence\": ...}}]}}\n{}",
        risk_field_rules()
    ));

    prompt
}

/// Corrective suffix appended when the first reply failed validation or the
/// call itself failed.
pub fn retry_prompt(feedback: &str) -> String {
    format!(
        "Your previous reply could not be used. {} \
         Reply again with a single valid JSON object in the required format.",
        feedback
    )
}

pub fn manager_system_prompt() -> String {
    "You are the review manager. You receive candidate risks collected across \
     all changed files. Merge near-duplicate descriptions, drop items that are \
     clearly the same finding reported twice, and re-order by priority. Do not \
     invent new risks."
        .to_string()
}

pub fn manager_user_prompt(work_list: &[RiskItem]) -> String {
    let mut listing = String::new();
    for item in work_list {
        listing.push_str(&format!(
            "- [{}] {}:{} (confidence {:.2}): {}\n",
            item.risk_type, item.file_path, item.line_number, item.confidence, item.description
        ));
    }

    format!(
        "## Candidate risks\n{}\n## Output format\nRespond with a JSON object: \
         {{\"items\": [{{\"file_path\": ..., \"risk_type\": ..., \"line_number\": ..., \
         \"description\": ..., \"confidence\": ...}}]}}\n{}",
        listing,
        risk_field_rules()
    )
}

pub fn expert_system_prompt(risk_type: RiskType) -> String {
    let specialty = match risk_type {
        RiskType::NullSafety => "null and absent-value handling",
        RiskType::Concurrency => "data races, deadlocks, and unsafe sharing",
        RiskType::Security => "injection, authentication, and data exposure",
        RiskType::BusinessIntent => "whether the change matches its stated intent",
        RiskType::Lifecycle => "resource acquisition, release, and ordering",
        RiskType::Syntax => "syntax and static-analysis findings",
    };

    format!(
        "You are an expert reviewer for {} issues, specializing in {}. \
         Decide whether the candidate risk is a real issue.\n\n\
         You may call read-only tools before answering. To call a tool, reply \
         with exactly one JSON object:\n\
         - {{\"tool\": \"read_file\", \"args\": {{\"path\": \"<path>\", \"start_line\": <n>, \"end_line\": <n>}}}}\n\
         - {{\"tool\": \"run_grep\", \"args\": {{\"pattern\": \"<string or regex>\", \"include\": \"<optional glob>\"}}}}\n\
         - {{\"tool\": \"fetch_repo_structure\", \"args\": {{}}}}\n\n\
         When you have decided, reply with a final JSON object:\n\
         {{\"status\": \"confirmed\" | \"refuted\", \"description\": \"<refined description>\", \
         \"confidence\": <0.0-1.0>, \"suggestion\": \"<optional fix>\"}}\n\
         Return only one JSON object per reply, no markdown fences.",
        risk_type, specialty
    )
}

pub fn expert_task_prompt(item: &RiskItem, diff_context: &str) -> String {
    let mut prompt = format!(
        "## Candidate risk\nrisk_type: {}\nfile: {}\nline: {}\ndescription: {}\nconfidence: {:.2}\n",
        item.risk_type, item.file_path, item.line_number, item.description, item.confidence
    );
    if !diff_context.is_empty() {
        prompt.push_str(&format!("\n## Diff context\n{}\n", diff_context));
    }
    prompt.push_str(
        "\nAnalyze the risk above. Call tools if you need more context, \
         then emit your final JSON verdict.",
    );
    prompt
}

pub fn reporter_prompt(
    confirmed: &[RiskItem],
    degraded_count: usize,
    refuted_count: usize,
    unresolved_count: usize,
) -> String {
    let mut listing = String::new();
    for item in confirmed {
        listing.push_str(&format!(
            "- [{}] {}:{} ({:?}): {}\n",
            item.risk_type, item.file_path, item.line_number, item.status, item.description
        ));
    }

    format!(
        "Write a concise code-review report in markdown from these findings. \
         Group by risk type, lead with the most severe items, and mention that \
         degraded items are unconfirmed.\n\n## Findings\n{}\n\
         ## Counts\nconfirmed: {}\ndegraded: {}\nrefuted: {}\nunresolved: {}\n",
        listing,
        confirmed.len().saturating_sub(degraded_count),
        degraded_count,
        refuted_count,
        unresolved_count
    )
}
