//! Retry policy for transient launch failures
//!
//! Long unattended minimization sessions must not die because the machine
//! briefly ran out of file descriptors or process slots. The default policy
//! therefore retries forever with a fixed 10s pause; bounded policies are
//! available for interactive use and tests.

use crate::error::{is_transient_launch_error, DiagnoseError, DiagnoseResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::time::Duration;
use tracing::warn;

/// Default pause between launch attempts.
pub const DEFAULT_BACKOFF_MS: u64 = 10_000;

/// Retry policy for OS-level launch failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (`None` = retry until the launch succeeds).
    pub max_retries: Option<u32>,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier (1.0 = fixed delay).
    pub backoff_multiplier: f64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub fn unbounded(backoff: Duration) -> Self {
        let ms = backoff.as_millis() as u64;
        Self {
            max_retries: None,
            initial_backoff_ms: ms,
            backoff_multiplier: 1.0,
            max_backoff_ms: ms,
        }
    }

    /// Retry at most `max_retries` times with a fixed delay.
    pub fn bounded(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            ..Self::unbounded(backoff)
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self::bounded(0, Duration::ZERO)
    }

    /// Calculate the backoff delay before retry number `attempt` (1-indexed).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let delay =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        (delay as u64).min(self.max_backoff_ms)
    }

    /// Whether another retry is allowed after `attempt` retries.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt < max)
    }

    /// Whether the policy ever gives up.
    pub fn is_bounded(&self) -> bool {
        self.max_retries.is_some()
    }

    /// Get the backoff as a Duration for a given attempt.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }
}

impl Default for RetryPolicy {
    /// Default: unbounded, 10s fixed backoff.
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(DEFAULT_BACKOFF_MS))
    }
}

/// Run `launch` until it succeeds, fails for a reason retrying cannot fix,
/// or `policy` runs out of retries.
///
/// `command` is the full command line (program first), used for errors and
/// the warning emitted before every retry.
pub async fn retry_launch<T, F, Fut>(
    policy: &RetryPolicy,
    command: &[String],
    mut launch: F,
) -> DiagnoseResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let program = command.first().cloned().unwrap_or_default();
    let mut retries = 0;
    loop {
        let err = match launch().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !is_transient_launch_error(&err) {
            return Err(DiagnoseError::Launch {
                program,
                source: err,
            });
        }
        if !policy.should_retry(retries) {
            return Err(DiagnoseError::LaunchRetriesExhausted {
                program,
                attempts: retries + 1,
                source: err,
            });
        }

        retries += 1;
        let delay = policy.backoff_duration(retries);
        warn!(
            command = ?command,
            error = %err,
            retry = retries,
            "Launching {} failed with {}; trying again in {:.1}s",
            program,
            err,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
    }
}
