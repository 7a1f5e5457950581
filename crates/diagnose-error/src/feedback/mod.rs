//! Diagnostic Feedback Module
//!
//! Answers the two questions a minimization loop asks about compiler output:
//! - does this output still show "the same" error (`has_error` against a pattern)
//! - what pattern captures the error in this output (`generalize`)
//!
//! # Architecture
//!
//! ```text
//! raw output → normalize → error_parser ──→ (line, body)
//!                              │
//!                              └→ generalize → ErrorPattern ─┐
//!                                                   ↑        │
//!                                                   └────────┘ reused on later outputs
//! ```

pub mod error_parser;
pub mod generalize;
pub mod memo;
pub mod normalize;

pub use error_parser::{
    error_body, find_error, has_error, line_number, ErrorPattern, ErrorRecord,
    DEFAULT_ERROR_PATTERN,
};
pub use generalize::{generalize, generalize_body, DiagnosticFamily};
pub use memo::DiagnosticMemo;
pub use normalize::normalize_output;
