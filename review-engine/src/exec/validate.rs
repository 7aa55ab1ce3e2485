//! Structured response validation
//!
//! Model replies arrive as mixed text: JSON wrapped in markdown fences,
//! preceded by commentary, or occasionally bare. This module extracts the
//! JSON payload, decodes it into a typed reply, and enforces the reply's
//! field constraints. On failure it classifies what went wrong so the
//! calling stage can build a corrective retry prompt.
//!
//! Validation is pure and never retries itself: retry policy differs per
//! stage and belongs to the caller.

use serde::de::DeserializeOwned;
use std::fmt;

/// How a reply failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No parseable JSON object in the reply at all.
    MalformedSyntax,
    /// A required field was absent or had the wrong type.
    MissingField,
    /// A field decoded but violated its declared constraint
    /// (numeric range, enum membership, empty string).
    OutOfRange,
}

/// A classified validation failure, renderable as corrective feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl ValidationFailure {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::MalformedSyntax,
            detail: detail.into(),
        }
    }

    pub fn missing_field(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::MissingField,
            detail: detail.into(),
        }
    }

    pub fn out_of_range(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::OutOfRange,
            detail: detail.into(),
        }
    }

    /// Corrective sentence appended to a retry prompt.
    pub fn corrective_feedback(&self) -> String {
        let hint = match self.kind {
            FailureKind::MalformedSyntax => {
                "Your previous reply did not contain a valid JSON object. \
                 Respond with a single JSON object and nothing else."
            }
            FailureKind::MissingField => {
                "Your previous reply was missing or mistyped a required field."
            }
            FailureKind::OutOfRange => {
                "A field in your previous reply violated its allowed range or values."
            }
        };
        format!("{} Problem: {}", hint, self.detail)
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::MalformedSyntax => "malformed syntax",
            FailureKind::MissingField => "missing or invalid required field",
            FailureKind::OutOfRange => "out-of-range value",
        };
        write!(f, "{}: {}", kind, self.detail)
    }
}

/// Post-deserialization field constraints a reply type declares.
///
/// serde enforces presence and enum membership; this covers what the type
/// system cannot express (numeric ranges, non-empty strings).
pub trait ValidateFields {
    fn validate_fields(&self) -> Result<(), ValidationFailure>;
}

/// Extract a JSON object from mixed model output.
///
/// Tries, in order: fenced ```json blocks, any fenced block, the first
/// balanced-brace object in the text, and finally the whole trimmed text.
/// Each candidate must actually parse as JSON to be accepted.
pub fn extract_json(text: &str) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }

    for fence in ["```json", "```"] {
        let mut rest = text;
        while let Some(start) = rest.find(fence) {
            let body = &rest[start + fence.len()..];
            if let Some(end) = body.find("```") {
                let candidate = body[..end].trim();
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Some(candidate.to_string());
                }
                rest = &body[end + 3..];
            } else {
                break;
            }
        }
    }

    // Scan for the first balanced-brace span that parses
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut start_idx: Option<usize> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => {
                if depth == 0 {
                    start_idx = Some(i);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start_idx {
                        let candidate = &text[s..=i];
                        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                            return Some(candidate.to_string());
                        }
                        start_idx = None;
                    }
                }
            }
            _ => {}
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{')
        && trimmed.ends_with('}')
        && serde_json::from_str::<serde_json::Value>(trimmed).is_ok()
    {
        return Some(trimmed.to_string());
    }

    None
}

/// Decode and validate a raw model reply into `T`.
///
/// Returns either a fully-typed value satisfying all of `T`'s declared
/// constraints, or a classified failure. Never panics.
pub fn validate_reply<T>(raw: &str) -> Result<T, ValidationFailure>
where
    T: DeserializeOwned + ValidateFields,
{
    let json = extract_json(raw)
        .ok_or_else(|| ValidationFailure::malformed("no JSON object found in reply"))?;

    let value: T = serde_json::from_str(&json).map_err(classify_serde_error)?;
    value.validate_fields()?;
    Ok(value)
}

/// Map a serde decode error onto the failure taxonomy.
fn classify_serde_error(err: serde_json::Error) -> ValidationFailure {
    let msg = err.to_string();
    if msg.contains("missing field") || msg.contains("invalid type") || msg.contains("null") {
        ValidationFailure::missing_field(msg)
    } else if msg.contains("unknown variant") || msg.contains("invalid value") {
        ValidationFailure::out_of_range(msg)
    } else {
        ValidationFailure::malformed(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        score: f32,
    }

    impl ValidateFields for Sample {
        fn validate_fields(&self) -> Result<(), ValidationFailure> {
            if self.name.is_empty() {
                return Err(ValidationFailure::missing_field("name must be non-empty"));
            }
            if !(0.0..=1.0).contains(&self.score) {
                return Err(ValidationFailure::out_of_range(format!(
                    "score {} outside [0.0, 1.0]",
                    self.score
                )));
            }
            Ok(())
        }
    }

    #[test]
    fn extracts_from_json_fence() {
        let text = "Here is my answer:\n```json\n{\"name\": \"a\", \"score\": 0.5}\n```\nDone.";
        let json = extract_json(text).unwrap();
        assert_eq!(json, "{\"name\": \"a\", \"score\": 0.5}");
    }

    #[test]
    fn extracts_from_bare_fence() {
        let text = "```\n{\"name\": \"a\", \"score\": 0.5}\n```";
        assert!(extract_json(text).is_some());
    }

    #[test]
    fn extracts_embedded_object() {
        let text = "The result {\"name\": \"a\", \"score\": 0.9} as requested";
        let json = extract_json(text).unwrap();
        assert_eq!(json, "{\"name\": \"a\", \"score\": 0.9}");
    }

    #[test]
    fn skips_invalid_candidate_objects() {
        let text = "bad {not json} but then {\"name\": \"a\", \"score\": 0.1} works";
        let json = extract_json(text).unwrap();
        assert!(json.contains("\"name\""));
    }

    #[test]
    fn extracts_whole_text() {
        let text = "  {\"name\": \"a\", \"score\": 0.0}  ";
        assert!(extract_json(text).is_some());
    }

    #[test]
    fn no_json_is_none() {
        assert!(extract_json("just prose, no object").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn valid_reply_decodes() {
        let out: Sample = validate_reply("{\"name\": \"x\", \"score\": 0.7}").unwrap();
        assert_eq!(out.name, "x");
    }

    #[test]
    fn prose_classified_as_malformed() {
        let err = validate_reply::<Sample>("no json here").unwrap_err();
        assert_eq!(err.kind, FailureKind::MalformedSyntax);
    }

    #[test]
    fn missing_field_classified() {
        let err = validate_reply::<Sample>("{\"name\": \"x\"}").unwrap_err();
        assert_eq!(err.kind, FailureKind::MissingField);
    }

    #[test]
    fn range_violation_classified() {
        let err = validate_reply::<Sample>("{\"name\": \"x\", \"score\": 1.5}").unwrap_err();
        assert_eq!(err.kind, FailureKind::OutOfRange);
    }

    #[test]
    fn corrective_feedback_mentions_problem() {
        let err = validate_reply::<Sample>("{\"name\": \"\", \"score\": 0.2}").unwrap_err();
        assert!(err.corrective_feedback().contains("Problem:"));
    }
}
