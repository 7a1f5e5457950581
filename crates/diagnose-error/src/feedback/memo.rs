//! Memoized extraction and generalization
//!
//! Minimization loops ask the same questions about the same output over
//! and over. `DiagnosticMemo` caches the four pure operations keyed on their
//! arguments. Nothing here performs I/O, so cached answers stay sound.

use crate::error::DiagnoseResult;
use crate::feedback::error_parser::{self, ErrorPattern};
use crate::feedback::generalize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

type OutputKey = (String, String);

/// Argument-keyed cache over `has_error`, `line_number`, `error_body` and
/// `generalize`.
///
/// Errors are not cached; a failing call is recomputed next time.
#[derive(Debug, Default)]
pub struct DiagnosticMemo {
    has_error: Mutex<HashMap<OutputKey, bool>>,
    line_number: Mutex<HashMap<OutputKey, usize>>,
    error_body: Mutex<HashMap<OutputKey, String>>,
    generalize: Mutex<HashMap<String, ErrorPattern>>,
}

fn key(output: &str, pattern: &ErrorPattern) -> OutputKey {
    (output.to_string(), pattern.as_str().to_string())
}

fn cached<K, V, F>(map: &Mutex<HashMap<K, V>>, key: K, compute: F) -> DiagnoseResult<V>
where
    K: std::hash::Hash + Eq,
    V: Clone,
    F: FnOnce() -> DiagnoseResult<V>,
{
    if let Some(hit) = map
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return Ok(hit.clone());
    }
    let value = compute()?;
    map.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_insert_with(|| value.clone());
    Ok(value)
}

impl DiagnosticMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized [`error_parser::has_error`]
    pub fn has_error(&self, output: &str, pattern: &ErrorPattern) -> bool {
        *self
            .has_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key(output, pattern))
            .or_insert_with(|| error_parser::has_error(output, pattern))
    }

    /// Memoized [`error_parser::line_number`]
    pub fn line_number(&self, output: &str, pattern: &ErrorPattern) -> DiagnoseResult<usize> {
        cached(&self.line_number, key(output, pattern), || {
            error_parser::line_number(output, pattern)
        })
    }

    /// Memoized [`error_parser::error_body`]
    pub fn error_body(&self, output: &str, pattern: &ErrorPattern) -> DiagnoseResult<String> {
        cached(&self.error_body, key(output, pattern), || {
            error_parser::error_body(output, pattern)
        })
    }

    /// Memoized [`generalize::generalize`]
    pub fn generalize(&self, output: &str) -> DiagnoseResult<ErrorPattern> {
        cached(&self.generalize, output.to_string(), || {
            generalize::generalize(output)
        })
    }

    /// Total number of cached answers across all four operations
    pub fn len(&self) -> usize {
        fn size<K, V>(map: &Mutex<HashMap<K, V>>) -> usize {
            map.lock().unwrap_or_else(PoisonError::into_inner).len()
        }
        size(&self.has_error)
            + size(&self.line_number)
            + size(&self.error_body)
            + size(&self.generalize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached answer
    pub fn clear(&self) {
        self.has_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.line_number
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.error_body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.generalize
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnoseError;

    const OUTPUT: &str = "File \"/tmp/tmpx1.v\", line 4, characters 2-9:\nError: Unknown tmpx1 at 10.\n";

    #[test]
    fn test_memo_matches_direct_calls() {
        let memo = DiagnosticMemo::new();
        let pattern = ErrorPattern::default_pattern();

        assert!(memo.has_error(OUTPUT, pattern));
        assert_eq!(memo.line_number(OUTPUT, pattern).unwrap(), 4);
        assert_eq!(
            memo.error_body(OUTPUT, pattern).unwrap(),
            error_parser::error_body(OUTPUT, pattern).unwrap()
        );
        assert_eq!(
            memo.generalize(OUTPUT).unwrap(),
            generalize::generalize(OUTPUT).unwrap()
        );
        assert_eq!(memo.len(), 4);
    }

    #[test]
    fn test_memo_reuses_entries() {
        let memo = DiagnosticMemo::new();
        let pattern = ErrorPattern::default_pattern();
        for _ in 0..3 {
            assert!(memo.has_error(OUTPUT, pattern));
            memo.generalize(OUTPUT).unwrap();
        }
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_memo_keys_on_pattern() {
        let memo = DiagnosticMemo::new();
        let other = ErrorPattern::new("never matches (1) (2)").unwrap();
        assert!(memo.has_error(OUTPUT, ErrorPattern::default_pattern()));
        assert!(!memo.has_error(OUTPUT, &other));
        assert_eq!(memo.len(), 2);
    }

    #[test]
    fn test_memo_does_not_cache_errors() {
        let memo = DiagnosticMemo::new();
        let err = memo
            .line_number("nothing", ErrorPattern::default_pattern())
            .unwrap_err();
        assert!(matches!(err, DiagnoseError::NoMatch { .. }));
        assert!(memo.is_empty());
    }

    #[test]
    fn test_memo_clear() {
        let memo = DiagnosticMemo::new();
        memo.generalize(OUTPUT).unwrap();
        assert!(!memo.is_empty());
        memo.clear();
        assert!(memo.is_empty());
    }
}
