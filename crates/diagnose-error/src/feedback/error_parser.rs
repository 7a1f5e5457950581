//! Error extraction from captured compiler output
//!
//! A matching pattern is a regex with exactly two capture groups: the
//! 1-based line number and the error message body. The default pattern
//! recognizes the compiler's
//! `File "<path>", line <N>, characters <start>-<end>:` header followed by
//! one or more lines of message.

use crate::error::{DiagnoseError, DiagnoseResult};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Source of the default matching pattern.
pub const DEFAULT_ERROR_PATTERN: &str =
    r#"File "[^"]+", line ([0-9]+), characters [0-9-]+:\n((?:.|\n)+)"#;

/// Header shared by every generated pattern; the body is spliced in as group 2.
const GENERIC_PATTERN_PREFIX: &str = r#"File "[^"]+", line ([0-9]+), characters [0-9-]+:\n("#;

/// Compiled-size ceiling for a pattern. Generalized patterns carry the whole
/// escaped error body, which for large terms outgrows the regex default.
const PATTERN_SIZE_LIMIT: usize = 1 << 30;

/// Lazy-DFA cache ceiling for the same patterns.
const PATTERN_DFA_SIZE_LIMIT: usize = 1 << 28;

static DEFAULT_PATTERN: LazyLock<ErrorPattern> = LazyLock::new(|| ErrorPattern {
    regex: Regex::new(DEFAULT_ERROR_PATTERN).unwrap(),
});

/// A compiled two-group matching pattern.
///
/// Equality and hashing go by the pattern source text.
#[derive(Debug, Clone)]
pub struct ErrorPattern {
    regex: Regex,
}

impl ErrorPattern {
    /// Compile a pattern from its source text
    pub fn new(source: impl AsRef<str>) -> DiagnoseResult<Self> {
        let source = source.as_ref();
        let regex = RegexBuilder::new(source)
            .size_limit(PATTERN_SIZE_LIMIT)
            .dfa_size_limit(PATTERN_DFA_SIZE_LIMIT)
            .build()
            .map_err(|e| DiagnoseError::InvalidPattern {
                pattern: source.to_string(),
                source: e,
            })?;
        Ok(Self { regex })
    }

    /// Wrap a generalized message body into the generic two-group pattern
    pub fn from_body(body_pattern: &str) -> DiagnoseResult<Self> {
        Self::new(format!("{GENERIC_PATTERN_PREFIX}{body_pattern})"))
    }

    /// The shared default pattern
    pub fn default_pattern() -> &'static ErrorPattern {
        &DEFAULT_PATTERN
    }

    /// Pattern source text
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Whether the pattern matches anywhere in `output`
    pub fn is_match(&self, output: &str) -> bool {
        self.regex.is_match(output)
    }

    fn captures<'o>(&self, output: &'o str) -> DiagnoseResult<regex::Captures<'o>> {
        self.regex
            .captures(output)
            .ok_or_else(|| DiagnoseError::no_match(self.as_str()))
    }
}

impl Default for ErrorPattern {
    fn default() -> Self {
        DEFAULT_PATTERN.clone()
    }
}

impl PartialEq for ErrorPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ErrorPattern {}

impl std::hash::Hash for ErrorPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl std::fmt::Display for ErrorPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorPattern {
    type Err = DiagnoseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Line number and message body of one matched error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// 1-based line number
    pub line: usize,
    /// Message body, verbatim
    pub body: String,
}

/// Returns true if `pattern` matches anywhere in `output`.
pub fn has_error(output: &str, pattern: &ErrorPattern) -> bool {
    pattern.is_match(output)
}

/// Line number captured by group 1.
///
/// Precondition: `has_error(output, pattern)`; otherwise `NoMatch`.
pub fn line_number(output: &str, pattern: &ErrorPattern) -> DiagnoseResult<usize> {
    let caps = pattern.captures(output)?;
    let text = caps
        .get(1)
        .map(|m| m.as_str())
        .ok_or_else(|| DiagnoseError::no_match(pattern.as_str()))?;
    text.parse::<usize>()
        .map_err(|_| DiagnoseError::InvalidLineNumber {
            text: text.to_string(),
        })
}

/// Message body captured by group 2, not trimmed.
///
/// Precondition: `has_error(output, pattern)`; otherwise `NoMatch`.
pub fn error_body(output: &str, pattern: &ErrorPattern) -> DiagnoseResult<String> {
    let caps = pattern.captures(output)?;
    caps.get(2)
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| DiagnoseError::no_match(pattern.as_str()))
}

/// Apply `pattern` once and return both groups, or `None` if it does not match.
pub fn find_error(output: &str, pattern: &ErrorPattern) -> DiagnoseResult<Option<ErrorRecord>> {
    if !pattern.is_match(output) {
        return Ok(None);
    }
    Ok(Some(ErrorRecord {
        line: line_number(output, pattern)?,
        body: error_body(output, pattern)?,
    }))
}
