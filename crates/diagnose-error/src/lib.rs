//! Diagnose Error Library
//!
//! Support code for test-case minimization against an external compiler:
//! - run the compiler on candidate source text, with a timeout it learns
//!   from the first run and a cache keyed by the exact inputs
//! - extract the line number and message of an error from its output
//! - generalize a concrete error message into a pattern that keeps matching
//!   "the same" error once temp-file names and numbers change
//!
//! # Modules
//!
//! - [`compiler`]: `CompilerSession`, scratch files, command logging
//! - [`process`]: timeout-bounded process execution with OS-error retry
//! - [`feedback`]: output normalization, error extraction, generalization
//! - [`config`]: session configuration from defaults, TOML, environment
//!
//! # Usage
//!
//! ```no_run
//! use diagnose_error::{generalize, has_error, CompileRequest, CompilerSession, DiagnoseConfig};
//!
//! # async fn demo() -> diagnose_error::DiagnoseResult<()> {
//! let session = CompilerSession::new(DiagnoseConfig::from_env());
//! let request = CompileRequest::new("coqc", ["-R", ".", "Top"], "Lemma x : False. Qed.");
//! let first = session.get_output(&request).await?;
//! let pattern = generalize(&first.output)?;
//!
//! let smaller = CompileRequest::new("coqc", ["-R", ".", "Top"], "Lemma y : False. Qed.");
//! let again = session.get_output(&smaller).await?;
//! assert!(has_error(&again.output, &pattern));
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod config;
pub mod error;
pub mod feedback;
pub mod process;

pub use compiler::{
    CacheStats, CommandLog, CompileRequest, CompilerOutput, CompilerSession, InvocationMode,
    NoOpCommandLog, ScratchFiles, TempScratch, TimeoutSpec, TracingCommandLog,
};
pub use config::DiagnoseConfig;
pub use error::{DiagnoseError, DiagnoseResult};
pub use feedback::{
    error_body, find_error, generalize, generalize_body, has_error, line_number,
    normalize_output, DiagnosticFamily, DiagnosticMemo, ErrorPattern, ErrorRecord,
    DEFAULT_ERROR_PATTERN,
};
pub use process::{ProcessOutput, ProcessRequest, ProcessRunner, RetryPolicy, TIMEOUT_MARKER};
