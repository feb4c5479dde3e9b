//! Error signatures: failure messages normalized for repeat detection.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static ABS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"(=\[])(?:[a-z]:[\\/]|/)[^\s:'"(),\]]+"#)
        .expect("ABS_PATH regex should compile")
});

static LINE_COL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\d+(?::\d+)?\b").expect("LINE_COL_SUFFIX regex should compile"));

static LINE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(line|ln|col|column)\s*\d+").expect("LINE_WORD regex should compile")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("WHITESPACE regex should compile"));

/// Prefix used for signatures synthesized from capability errors.
pub const INTERNAL_EXCEPTION_PREFIX: &str = "internal exception: ";
/// Signature recorded when the session deadline cancels an attempt.
pub const CANCELLED_TIMEOUT: &str = "cancelled: timeout";
/// Signature recorded when the caller cancels the session.
pub const CANCELLED_CALLER: &str = "cancelled: caller";

/// A failure message plus its normalized form.
///
/// Equality and hashing use only the normalized form, so
/// `"Error at /a/b.rs:3"` and `"error at /c/d.rs:97"` compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorSignature {
    normalized: String,
    raw: String,
}

impl ErrorSignature {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            normalized: normalize(&raw),
            raw,
        }
    }

    /// Signature for a capability invocation that returned an error.
    pub fn internal_exception(message: impl std::fmt::Display) -> Self {
        Self::new(format!("{INTERNAL_EXCEPTION_PREFIX}{message}"))
    }

    pub fn cancelled_timeout() -> Self {
        Self::new(CANCELLED_TIMEOUT)
    }

    pub fn cancelled_caller() -> Self {
        Self::new(CANCELLED_CALLER)
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_cancellation(&self) -> bool {
        self.normalized == CANCELLED_TIMEOUT || self.normalized == CANCELLED_CALLER
    }
}

impl PartialEq for ErrorSignature {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for ErrorSignature {}

impl std::hash::Hash for ErrorSignature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Lowercase, replace absolute paths with `<path>`, strip `:line[:col]`
/// suffixes and `line N` numbers, collapse whitespace.
pub fn normalize(message: &str) -> String {
    let lower = message.to_lowercase();
    let no_paths = ABS_PATH.replace_all(&lower, "${1}<path>");
    let no_suffix = LINE_COL_SUFFIX.replace_all(&no_paths, "");
    let no_lines = LINE_WORD.replace_all(&no_suffix, "${1} n");
    WHITESPACE.replace_all(&no_lines, " ").trim().to_string()
}
