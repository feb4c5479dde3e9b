//! Parsing of raw classifier output.
//!
//! Accepted shapes, tried in order:
//!
//! ```text
//! {"complexity": 4, "reasoning": "touches three modules"}
//! COMPLEXITY: 4
//! REASONING: touches three modules
//! 4 - touches three modules
//! ```

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

use super::complexity::ComplexityBucket;

static COMPLEXITY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**complexity\**\s*[:=]\s*(-?\d+)")
        .expect("COMPLEXITY_LINE regex should compile")
});

static REASONING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*\**reasoning\**\s*[:=]\s*(.+)$")
        .expect("REASONING_LINE regex should compile")
});

static LEADING_INT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d+)\b[\s.:)\-]*(.*)").expect("LEADING_INT regex should compile")
});

/// Why a classification could not be used. Always recovered by the fallback.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
    #[error("no classifier backend configured")]
    Unavailable,

    #[error("classifier timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("classifier backend failed: {0}")]
    Backend(String),

    #[error("unparseable classifier output: {preview}")]
    Unparseable { preview: String },

    #[error("complexity code {code} is outside 1..=6")]
    OutOfRange { code: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClassification {
    pub bucket: ComplexityBucket,
    pub reasoning: String,
}

/// Parse one classifier reply into a bucket plus reasoning.
pub fn parse_classifier_output(raw: &str) -> Result<ParsedClassification, ClassificationError> {
    let text = strip_code_fence(raw.trim());

    if let Some((code, reasoning)) = parse_json(text) {
        return to_parsed(code, reasoning);
    }

    if let Some(caps) = COMPLEXITY_LINE.captures(text) {
        let code = caps[1].parse::<i64>().map_err(|_| unparseable(raw))?;
        let reasoning = REASONING_LINE
            .captures(text)
            .map(|c| c[1].trim().to_string())
            .unwrap_or_default();
        return to_parsed(code, reasoning);
    }

    if let Some(caps) = LEADING_INT.captures(text) {
        let code = caps[1].parse::<i64>().map_err(|_| unparseable(raw))?;
        return to_parsed(code, caps[2].trim().to_string());
    }

    Err(unparseable(raw))
}

fn to_parsed(code: i64, reasoning: String) -> Result<ParsedClassification, ClassificationError> {
    let bucket = ComplexityBucket::from_code(code).ok_or(ClassificationError::OutOfRange { code })?;
    Ok(ParsedClassification { bucket, reasoning })
}

fn parse_json(text: &str) -> Option<(i64, String)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
    let code = match value.get("complexity")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, reasoning))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn unparseable(raw: &str) -> ClassificationError {
    let preview: String = raw.chars().take(80).collect();
    ClassificationError::Unparseable { preview }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let p = parse_classifier_output(r#"{"complexity": 4, "reasoning": "three modules"}"#)
            .unwrap();
        assert_eq!(p.bucket, ComplexityBucket::Complex);
        assert_eq!(p.reasoning, "three modules");
    }

    #[test]
    fn test_parse_fenced_json_with_string_code() {
        let raw = "```json\n{\"complexity\": \"2\"}\n```";
        let p = parse_classifier_output(raw).unwrap();
        assert_eq!(p.bucket, ComplexityBucket::Simple);
        assert_eq!(p.reasoning, "");
    }

    #[test]
    fn test_parse_block() {
        let raw = "Sure.\nCOMPLEXITY: 5\nREASONING: distributed lock redesign\n";
        let p = parse_classifier_output(raw).unwrap();
        assert_eq!(p.bucket, ComplexityBucket::Advanced);
        assert_eq!(p.reasoning, "distributed lock redesign");
    }

    #[test]
    fn test_parse_leading_integer() {
        let p = parse_classifier_output("3 - adds a parser").unwrap();
        assert_eq!(p.bucket, ComplexityBucket::Moderate);
        assert_eq!(p.reasoning, "adds a parser");
    }

    #[test]
    fn test_out_of_range_and_garbage() {
        assert_eq!(
            parse_classifier_output("9"),
            Err(ClassificationError::OutOfRange { code: 9 })
        );
        assert!(matches!(
            parse_classifier_output("I think this is hard"),
            Err(ClassificationError::Unparseable { .. })
        ));
        assert!(matches!(
            parse_classifier_output(""),
            Err(ClassificationError::Unparseable { .. })
        ));
    }
}
