//! Session configuration: defaults, TOML file, environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DiagnoseError, DiagnoseResult};
use crate::process::retry::RetryPolicy;
use crate::process::DEFAULT_READER_GRACE_MS;

/// Top-level configuration for a compiler session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnoseConfig {
    /// Session verbosity; command lines are logged when it reaches a
    /// request's log threshold.
    pub verbosity: u8,
    /// Policy for OS-level launch failures.
    pub retry: RetryPolicy,
    /// Directory for scratch source files (None = OS temp dir).
    pub scratch_dir: Option<PathBuf>,
    /// Suffix of scratch source files.
    pub scratch_suffix: String,
    /// Capture standard error together with standard output.
    pub merge_stderr: bool,
    /// How long to wait for output pipes after a timeout kill.
    pub reader_grace_ms: u64,
}

impl Default for DiagnoseConfig {
    fn default() -> Self {
        Self {
            verbosity: 1,
            retry: RetryPolicy::default(),
            scratch_dir: None,
            scratch_suffix: ".v".to_string(),
            merge_stderr: true,
            reader_grace_ms: DEFAULT_READER_GRACE_MS,
        }
    }
}

impl DiagnoseConfig {
    /// Load from a TOML file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> DiagnoseResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DiagnoseError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Defaults overlaid with `DIAGNOSE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay `DIAGNOSE_*` environment variables onto this config.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("DIAGNOSE_VERBOSITY").and_then(|v| v.parse().ok()) {
            self.verbosity = v;
        }
        if let Some(ms) = var("DIAGNOSE_RETRY_BACKOFF_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.retry.initial_backoff_ms = ms;
            self.retry.max_backoff_ms = self.retry.max_backoff_ms.max(ms);
        }
        if let Some(max) = var("DIAGNOSE_MAX_LAUNCH_RETRIES") {
            let max = max.trim();
            if max.is_empty() || max.eq_ignore_ascii_case("unbounded") {
                self.retry.max_retries = None;
            } else if let Ok(n) = max.parse() {
                self.retry.max_retries = Some(n);
            }
        }
        if let Some(dir) = var("DIAGNOSE_SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(dir));
        }
        if let Some(suffix) = var("DIAGNOSE_SCRATCH_SUFFIX") {
            self.scratch_suffix = suffix;
        }
    }

    pub fn reader_grace(&self) -> Duration {
        Duration::from_millis(self.reader_grace_ms)
    }
}
