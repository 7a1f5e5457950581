//! Diagnose error types
//!
//! One error enum for every library operation. Extraction precondition
//! violations and non-transient launch failures surface here; transient
//! OS-level launch failures are retried by the process runner and only
//! appear when a bounded retry policy gives up.

use std::io;
use thiserror::Error;

/// Result type alias for diagnose operations
pub type DiagnoseResult<T> = Result<T, DiagnoseError>;

/// Errors produced by extraction, generalization and compiler execution
#[derive(Debug, Error)]
pub enum DiagnoseError {
    /// Extraction was requested on output the pattern does not match
    #[error("Output does not match error pattern: {}", abbreviate(.pattern))]
    NoMatch { pattern: String },

    /// A matching pattern failed to compile
    #[error("Invalid error pattern {}: {source}", abbreviate(.pattern))]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The captured line number is not a decimal integer that fits
    #[error("Invalid line number in diagnostic: {text}")]
    InvalidLineNumber { text: String },

    /// Launching the compiler failed for a reason retrying cannot fix
    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// A bounded retry policy ran out of attempts
    #[error("Failed to launch {program} after {attempts} attempts: {source}")]
    LaunchRetriesExhausted {
        program: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Temporary file creation failed
    #[error("Scratch file error: {message}")]
    Scratch { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// TOML configuration parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DiagnoseError {
    /// Create a no-match error for the given pattern source
    pub fn no_match(pattern: impl Into<String>) -> Self {
        Self::NoMatch {
            pattern: pattern.into(),
        }
    }

    /// Create a scratch-file error
    pub fn scratch(message: impl Into<String>) -> Self {
        Self::Scratch {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Only OS-level failures qualify; see [`is_transient_launch_error`].
    pub fn is_transient(&self) -> bool {
        match self {
            Self::LaunchRetriesExhausted { source, .. } | Self::Io(source) => {
                is_transient_launch_error(source)
            }
            _ => false,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoMatch { .. } => "NO_MATCH",
            Self::InvalidPattern { .. } => "INVALID_PATTERN",
            Self::InvalidLineNumber { .. } => "INVALID_LINE_NUMBER",
            Self::Launch { .. } => "LAUNCH_FAILED",
            Self::LaunchRetriesExhausted { .. } => "LAUNCH_RETRIES_EXHAUSTED",
            Self::Scratch { .. } => "SCRATCH_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Toml(_) => "TOML_ERROR",
        }
    }
}

/// Whether an OS-level launch failure is worth retrying.
///
/// Resource exhaustion (too many open files, no child processes left,
/// out of memory) clears up on its own; a missing or non-executable
/// program, or one the kernel cannot execute, does not.
pub fn is_transient_launch_error(err: &io::Error) -> bool {
    if is_exec_format_error(err) {
        return false;
    }
    !matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::InvalidInput
    )
}

/// ENOEXEC: not a binary and no shebang line.
fn is_exec_format_error(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(nix::errno::Errno::ENOEXEC as i32)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Longest pattern excerpt shown in error messages.
const PATTERN_EXCERPT_CHARS: usize = 200;

/// Generalized patterns embed whole error bodies; keep messages readable.
fn abbreviate(pattern: &str) -> String {
    match pattern.char_indices().nth(PATTERN_EXCERPT_CHARS) {
        Some((cut, _)) => format!(
            "{}... ({} bytes total)",
            &pattern[..cut],
            pattern.len()
        ),
        None => pattern.to_string(),
    }
}
