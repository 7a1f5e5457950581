//! Error-pattern generalization
//!
//! Turns one concrete compiler error into a matching pattern that keeps
//! matching "the same" error after temp-file names, line numbers and other
//! numeric details change. A few diagnostic families carry variable-length
//! detail that is cut off and replaced by a wildcard.

use crate::error::DiagnoseResult;
use crate::feedback::error_parser::{error_body, ErrorPattern};
use regex::{Captures, NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const UNIVERSE_INCONSISTENCY: &str = "Universe inconsistency";
const UNSATISFIED_CONSTRAINTS: &str = "Unsatisfied constraints";
const UNABLE_TO_SATISFY: &str = "Unable to satisfy the following constraints";

/// Numbers after this phrase are the point of the error and stay literal.
const UNIVERSE_INSTANCE_LENGTH: &str = "Universe instance should have length ";

const BECAUSE: &str = " because";

/// Matches anything, newlines included.
const ANYTHING: &str = "(?s:.*)";

/// Generated temp-file identifiers; the replacement is the pattern itself.
const TEMP_IDENT: &str = r"tmp[A-Za-z_\d]+";

/// Wildcard written in place of every ASCII digit run.
const DIGIT_RUN: &str = r"[\d]+";

static TEMP_IDENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(TEMP_IDENT).unwrap());

/// ASCII only; other scripts' digits stay literal.
static DIGIT_RUN_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new("[0-9]+").unwrap());

/// `<name>.<digits>` file-stem references, whitespace or start delimited,
/// as they appear after escaping.
static STEM_REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|\s)[^\s]+?\\\.([0-9]+)").unwrap());

static UNSATISFIED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Error: Unsatisfied constraints:.*\\\(maybe a bugged tactic\\\)").unwrap()
});

static UNABLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Error: Unable to satisfy the following constraints:.*").unwrap()
});

/// Diagnostic families with dedicated generalization rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticFamily {
    /// Universe constraint cycle; the explanation after "because" varies
    UniverseInconsistency,
    /// Leftover evars after a tactic, listed between header and footer
    UnsatisfiedConstraints,
    /// Typeclass resolution failure followed by a constraint dump
    UnsatisfiableConstraints,
    /// Everything else: escaping plus temp-name and number wildcards only
    Other,
}

impl DiagnosticFamily {
    /// Classify an unescaped error body. First match wins.
    pub fn classify(body: &str) -> Self {
        if body.contains(UNIVERSE_INCONSISTENCY) {
            Self::UniverseInconsistency
        } else if body.contains(UNSATISFIED_CONSTRAINTS) {
            Self::UnsatisfiedConstraints
        } else if body.contains(UNABLE_TO_SATISFY) {
            Self::UnsatisfiableConstraints
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for DiagnosticFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UniverseInconsistency => write!(f, "universe_inconsistency"),
            Self::UnsatisfiedConstraints => write!(f, "unsatisfied_constraints"),
            Self::UnsatisfiableConstraints => write!(f, "unsatisfiable_constraints"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Build a matching pattern for the error in `output`.
///
/// Precondition: the default pattern matches `output`; otherwise `NoMatch`.
pub fn generalize(output: &str) -> DiagnoseResult<ErrorPattern> {
    let body = error_body(output, ErrorPattern::default_pattern())?;
    ErrorPattern::from_body(&generalize_body(body.trim()))
}

/// Generalize a trimmed error body into the regex text for group 2.
pub fn generalize_body(body: &str) -> String {
    let escaped = regex::escape(body);
    let family = DiagnosticFamily::classify(body);
    tracing::debug!(%family, "generalizing error body");

    let rewritten = match family {
        DiagnosticFamily::UniverseInconsistency => truncate_universe_inconsistency(&escaped),
        DiagnosticFamily::UnsatisfiedConstraints => UNSATISFIED_PATTERN
            .replace(
                &escaped,
                NoExpand(r"Error: Unsatisfied constraints:(?s:.*)\(maybe a bugged tactic\)"),
            )
            .into_owned(),
        DiagnosticFamily::UnsatisfiableConstraints => UNABLE_PATTERN
            .replace(
                &escaped,
                NoExpand(r"Error: Unable to satisfy the following constraints:(?s:.*)"),
            )
            .into_owned(),
        DiagnosticFamily::Other => escaped,
    };

    let rewritten = TEMP_IDENT_PATTERN
        .replace_all(&rewritten, NoExpand(TEMP_IDENT))
        .into_owned();

    if rewritten.contains(UNIVERSE_INSTANCE_LENGTH) {
        rewritten
    } else {
        DIGIT_RUN_PATTERN
            .replace_all(&rewritten, NoExpand(DIGIT_RUN))
            .into_owned()
    }
}

fn truncate_universe_inconsistency(escaped: &str) -> String {
    let truncated = match escaped.find(UNIVERSE_INCONSISTENCY).and_then(|start| {
        escaped[start..]
            .find(BECAUSE)
            .map(|offset| start + offset + BECAUSE.len())
    }) {
        Some(end) => format!("{}{ANYTHING}", &escaped[..end]),
        None => escaped.to_string(),
    };

    STEM_REFERENCE_PATTERN
        .replace_all(&truncated, |caps: &Captures<'_>| {
            format!(r"{}[^\s]+?\.{}", &caps[1], &caps[2])
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnoseError;
    use crate::feedback::error_parser::{has_error, line_number};

    fn wrap(file: &str, line: usize, body: &str) -> String {
        format!("File \"{file}\", line {line}, characters 0-12:\n{body}\n")
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(
            DiagnosticFamily::classify("Universe inconsistency ... Unsatisfied constraints"),
            DiagnosticFamily::UniverseInconsistency
        );
        assert_eq!(
            DiagnosticFamily::classify(
                "Unsatisfied constraints / Unable to satisfy the following constraints"
            ),
            DiagnosticFamily::UnsatisfiedConstraints
        );
        assert_eq!(
            DiagnosticFamily::classify("Unable to satisfy the following constraints:"),
            DiagnosticFamily::UnsatisfiableConstraints
        );
        assert_eq!(
            DiagnosticFamily::classify("Error: Syntax error"),
            DiagnosticFamily::Other
        );
    }

    #[test]
    fn test_generalizes_temp_names_and_numbers() {
        let first = wrap(
            "/tmp/tmpa1B2_c.v",
            3,
            "Error: The reference tmpa1B2_c.foo was not found at depth 42.",
        );
        let second = wrap(
            "/tmp/tmpZZ9.v",
            17,
            "Error: The reference tmpZZ9.foo was not found at depth 7.",
        );

        let pattern = generalize(&first).unwrap();
        assert!(pattern
            .as_str()
            .contains(r"The reference tmp[A-Za-z_\d]+\.foo was not found at depth [\d]+\."));
        assert!(has_error(&second, &pattern));
        assert_eq!(line_number(&second, &pattern).unwrap(), 17);
    }

    #[test]
    fn test_only_ascii_digits_become_wildcards() {
        let generalized = generalize_body("Error: depth 12 exceeds \u{663}\u{664}.");
        assert!(generalized.contains(r"depth [\d]+ exceeds"));
        assert!(generalized.contains("\u{663}\u{664}"));
    }

    #[test]
    fn test_very_long_bodies_still_compile() {
        let body = format!("Error: The term {} has no type.", "(S ".repeat(150_000));
        let output = wrap("a.v", 4, &body);
        let pattern = generalize(&output).unwrap();
        assert!(pattern.as_str().len() > 600_000);
        assert!(has_error(&output, &pattern));
        assert_eq!(line_number(&output, &pattern).unwrap(), 4);
    }

    #[test]
    fn test_regex_special_characters_stay_literal() {
        let output = wrap("a.v", 1, "Error: (foo) [bar] * baz?");
        let pattern = generalize(&output).unwrap();
        assert!(has_error(&output, &pattern));
        assert!(!has_error(&wrap("a.v", 1, "Error: foo bar baz"), &pattern));
    }

    #[test]
    fn test_different_message_does_not_match() {
        let pattern = generalize(&wrap("a.v", 1, "Error: Syntax error: '.' expected.")).unwrap();
        assert!(!has_error(
            &wrap("a.v", 1, "Error: The term \"x\" has type \"nat\"."),
            &pattern
        ));
    }

    #[test]
    fn test_unsatisfied_constraints_ignore_middle() {
        let first = wrap(
            "a.v",
            5,
            "Error: Unsatisfied constraints:\n?X12 : nat\n?X13 : bool\n(maybe a bugged tactic).",
        );
        let second = wrap(
            "b.v",
            8,
            "Error: Unsatisfied constraints:\n?Goal : True\nwith context\n  H : False\n(maybe a bugged tactic).",
        );

        let pattern = generalize(&first).unwrap();
        assert!(pattern
            .as_str()
            .contains(r"Error: Unsatisfied constraints:(?s:.*)\(maybe a bugged tactic\)"));
        assert!(has_error(&second, &pattern));
    }

    #[test]
    fn test_unable_to_satisfy_keeps_header_only() {
        let first = wrap(
            "a.v",
            2,
            "Error: Unable to satisfy the following constraints:\nIn environment:\nx : nat\n?T : \"Type\"",
        );
        let second = wrap(
            "a.v",
            9,
            "Error: Unable to satisfy the following constraints:\n?inst : \"Monad M\"",
        );

        let pattern = generalize(&first).unwrap();
        assert!(pattern
            .as_str()
            .ends_with(r"Error: Unable to satisfy the following constraints:(?s:.*))"));
        assert!(has_error(&second, &pattern));
    }

    #[test]
    fn test_universe_inconsistency_truncates_and_generalizes_stems() {
        let first = wrap(
            "a.v",
            4,
            "Error: Universe inconsistency. Cannot enforce Top.1 < Top.2 because Top.2 <= Coq.Init.Logic.8 < Top.1.",
        );
        let second = wrap(
            "a.v",
            6,
            "Error: Universe inconsistency. Cannot enforce tmpQ.15 < tmpQ.9 because tmpQ.9 < tmpQ.15.",
        );

        let body = generalize_body(
            "Error: Universe inconsistency. Cannot enforce Top.1 < Top.2 because Top.2 <= Coq.Init.Logic.8 < Top.1.",
        );
        assert_eq!(
            body,
            r"Error: Universe inconsistency\. Cannot enforce [^\s]+?\.[\d]+ < [^\s]+?\.[\d]+ because(?s:.*)"
        );

        let pattern = generalize(&first).unwrap();
        assert!(has_error(&second, &pattern));
    }

    #[test]
    fn test_universe_instance_length_keeps_numbers() {
        let first = wrap(
            "a.v",
            1,
            "Error: Universe instance should have length 2.",
        );
        let pattern = generalize(&first).unwrap();
        assert!(pattern.as_str().contains("length 2"));
        assert!(has_error(&wrap("b.v", 30, "Error: Universe instance should have length 2."), &pattern));
        assert!(!has_error(&wrap("b.v", 30, "Error: Universe instance should have length 3."), &pattern));
    }

    #[test]
    fn test_generalized_pattern_has_two_groups() {
        let pattern = generalize(&wrap("a.v", 1, "Error: (x) 12")).unwrap();
        let regex = Regex::new(pattern.as_str()).unwrap();
        assert_eq!(regex.captures_len(), 3);
    }

    #[test]
    fn test_generalize_requires_match() {
        let err = generalize("no diagnostics here").unwrap_err();
        assert!(matches!(err, DiagnoseError::NoMatch { .. }));
    }

    #[test]
    fn test_body_is_trimmed() {
        let output = "File \"a.v\", line 1, characters 0-1:\n   Error: spaced   \n\n";
        assert_eq!(
            generalize(output).unwrap(),
            ErrorPattern::from_body("Error: spaced").unwrap()
        );
    }
}
