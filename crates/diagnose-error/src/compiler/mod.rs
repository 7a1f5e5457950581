//! Compiler session: cached, timeout-adaptive compiler invocations
//!
//! A `CompilerSession` owns the state a minimization run accumulates:
//! - the result cache, keyed by (program, arguments, contents, timeout)
//! - the adaptive timeout, learned from the first observed run
//!
//! # Flow
//!
//! ```text
//! CompileRequest → resolve timeout → cache lookup ──hit──→ CompilerOutput
//!                                          │miss
//!                                          ↓
//!                  scratch file → ProcessRunner → cleanup → normalize → cache
//! ```

pub mod log;
pub mod scratch;

pub use log::{format_command_line, CommandLog, NoOpCommandLog, TracingCommandLog};
pub use scratch::{ScratchFiles, TempScratch};

use crate::config::DiagnoseConfig;
use crate::error::DiagnoseResult;
use crate::feedback::normalize::normalize_output;
use crate::process::{ProcessOutput, ProcessRequest, ProcessRunner, TIMEOUT_MARKER};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Flag that keeps the compiler from printing its banner and prompts.
const QUIET_FLAG: &str = "-q";

/// Interactive-toplevel directive that loads a source file by stem.
const LOAD_SOURCE_FLAG: &str = "-load-vernac-source";

/// How long a run may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutSpec {
    /// Use the learned session timeout; unbounded until one is learned
    Adaptive,
    /// Wait as long as it takes
    Unbounded,
    /// Kill the compiler after this long
    Limit(Duration),
}

impl TimeoutSpec {
    /// Map a signed second count: negative is adaptive, zero is unbounded.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Self::Adaptive,
            0 => Self::Unbounded,
            s => Self::Limit(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// The wall-clock limit to enforce, if any
    pub fn limit(&self) -> Option<Duration> {
        match self {
            Self::Limit(d) if !d.is_zero() => Some(*d),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeoutSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Adaptive => write!(f, "adaptive"),
            Self::Unbounded => write!(f, "unbounded"),
            Self::Limit(d) => write!(f, "{}s", d.as_secs_f64()),
        }
    }
}

/// How the compiler receives the scratch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// `<program> <args> <file> -q`
    #[default]
    Batch,
    /// `<program> <args> -load-vernac-source <file-stem> -q`
    Interactive,
}

/// One request for compiler output.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Compiler executable
    pub program: String,
    /// Compiler arguments, placed before the file reference
    pub args: Vec<String>,
    /// Source text fed to the compiler
    pub contents: String,
    pub timeout: TimeoutSpec,
    pub mode: InvocationMode,
    /// Command lines are logged when session verbosity reaches this
    pub log_threshold: u8,
}

impl CompileRequest {
    pub fn new<I, S>(program: impl Into<String>, args: I, contents: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            contents: contents.into(),
            timeout: TimeoutSpec::Adaptive,
            mode: InvocationMode::Batch,
            log_threshold: 1,
        }
    }

    pub fn timeout(mut self, timeout: TimeoutSpec) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn mode(mut self, mode: InvocationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn log_threshold(mut self, threshold: u8) -> Self {
        self.log_threshold = threshold;
        self
    }

    /// Full command line for a given scratch file: program first.
    pub fn command_line(&self, file: &Path) -> Vec<String> {
        let mut cmd = Vec::with_capacity(self.args.len() + 4);
        cmd.push(self.program.clone());
        cmd.extend(self.args.iter().cloned());
        match self.mode {
            InvocationMode::Interactive => {
                cmd.push(LOAD_SOURCE_FLAG.to_string());
                cmd.push(
                    scratch::path_without_extension(file)
                        .to_string_lossy()
                        .into_owned(),
                );
            }
            InvocationMode::Batch => cmd.push(file.to_string_lossy().into_owned()),
        }
        cmd.push(QUIET_FLAG.to_string());
        cmd
    }
}

/// Normalized compiler output plus the command line that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOutput {
    pub output: String,
    pub command_line: Vec<String>,
}

impl CompilerOutput {
    /// Whether the run was cut off by its timeout
    pub fn timed_out(&self) -> bool {
        self.output.ends_with(TIMEOUT_MARKER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    program: String,
    args: Vec<String>,
    contents: blake3::Hash,
    timeout: TimeoutSpec,
}

impl CacheKey {
    fn new(request: &CompileRequest, timeout: TimeoutSpec) -> Self {
        Self {
            program: request.program.clone(),
            args: request.args.clone(),
            contents: blake3::hash(request.contents.as_bytes()),
            timeout,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    /// Scratch file the output was produced from
    file_name: PathBuf,
    output: CompilerOutput,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Cached, timeout-adaptive compiler runner for one minimization session.
///
/// Both the cache and the adaptive timeout start empty and are cleared
/// only by explicit calls ([`reset`](Self::reset) and friends).
pub struct CompilerSession {
    config: DiagnoseConfig,
    runner: ProcessRunner,
    scratch: Box<dyn ScratchFiles>,
    log: Box<dyn CommandLog>,
    adaptive_timeout: Mutex<Option<Duration>>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for CompilerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerSession")
            .field("config", &self.config)
            .field("adaptive_timeout", &self.get_timeout())
            .field("cached", &self.cache_len())
            .finish()
    }
}

impl CompilerSession {
    /// Session with filesystem scratch files and tracing-backed command logging
    pub fn new(config: DiagnoseConfig) -> Self {
        let scratch = match &config.scratch_dir {
            Some(dir) => TempScratch::in_dir(dir),
            None => TempScratch::new(),
        };
        let runner = ProcessRunner::new(config.retry.clone(), config.reader_grace());
        Self {
            config,
            runner,
            scratch: Box::new(scratch),
            log: Box::new(TracingCommandLog),
            adaptive_timeout: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Replace the scratch-file collaborator
    pub fn with_scratch(mut self, scratch: impl ScratchFiles + 'static) -> Self {
        self.scratch = Box::new(scratch);
        self
    }

    /// Replace the command-log sink
    pub fn with_log(mut self, log: impl CommandLog + 'static) -> Self {
        self.log = Box::new(log);
        self
    }

    pub fn config(&self) -> &DiagnoseConfig {
        &self.config
    }

    /// Current adaptive timeout, without side effects
    pub fn get_timeout(&self) -> Option<Duration> {
        *self
            .adaptive_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget the learned timeout; the next run learns a new one
    pub fn reset_timeout(&self) {
        *self
            .adaptive_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn cache_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Clear both the cache and the adaptive timeout
    pub fn reset(&self) {
        self.clear_cache();
        self.reset_timeout();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Scratch file name recorded for a previously cached request
    pub fn recorded_file(&self, request: &CompileRequest) -> Option<PathBuf> {
        let key = CacheKey::new(request, self.resolve_timeout(request.timeout));
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|entry| entry.file_name.clone())
    }

    /// Compiler output for `request`, running the compiler only on a cache miss.
    pub async fn get_output(&self, request: &CompileRequest) -> DiagnoseResult<CompilerOutput> {
        let timeout = self.resolve_timeout(request.timeout);
        let key = CacheKey::new(request, timeout);

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(entry) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(file = %entry.file_name.display(), %timeout, "compiler output cache hit");
            self.log_command(request, &entry.output.command_line);
            return Ok(entry.output);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let file = self
            .scratch
            .create(&request.contents, &self.config.scratch_suffix)?;
        let command_line = request.command_line(&file);
        self.log_command(request, &command_line);

        let mut process =
            ProcessRequest::new(command_line[0].clone(), command_line[1..].to_vec())
                .timeout(timeout.limit());
        if !self.config.merge_stderr {
            process = process.separate_stderr();
        }
        let result = self.runner.run(&process).await;
        self.scratch.cleanup(&file);
        let run = result?;

        self.observe_duration(run.elapsed);

        let output = CompilerOutput {
            output: normalize_output(&combined_output(&run)),
            command_line,
        };
        debug!(
            file = %file.display(),
            %timeout,
            elapsed_ms = run.elapsed.as_millis() as u64,
            timed_out = run.timed_out,
            "compiler output cached"
        );

        let stored = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(CacheEntry {
                file_name: file,
                output,
            })
            .output
            .clone();
        Ok(stored)
    }

    fn resolve_timeout(&self, requested: TimeoutSpec) -> TimeoutSpec {
        match (requested, self.get_timeout()) {
            (TimeoutSpec::Adaptive, Some(learned)) => TimeoutSpec::Limit(learned),
            (requested, _) => requested,
        }
    }

    fn observe_duration(&self, elapsed: Duration) {
        let mut state = self
            .adaptive_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.is_none() {
            let learned = adaptive_timeout_for(elapsed);
            debug!(
                observed_ms = elapsed.as_millis() as u64,
                learned_secs = learned.as_secs(),
                "adaptive timeout set"
            );
            *state = Some(learned);
        }
    }

    fn log_command(&self, request: &CompileRequest, command_line: &[String]) {
        if self.config.verbosity >= request.log_threshold {
            self.log.log(&format!(
                "\nRunning command: {}",
                format_command_line(command_line)
            ));
        }
    }
}

/// Standard output, followed by standard error when it was captured apart.
/// The timeout marker appears once, at the very end.
fn combined_output(run: &ProcessOutput) -> String {
    if run.stderr.is_empty() {
        return run.stdout.clone();
    }
    let stdout = if run.timed_out {
        run.stdout
            .strip_suffix(TIMEOUT_MARKER)
            .unwrap_or(&run.stdout)
    } else {
        &run.stdout
    };
    format!("{stdout}{}", run.stderr)
}

/// Twice the observed duration, rounded up to whole seconds, at least 2s.
pub fn adaptive_timeout_for(elapsed: Duration) -> Duration {
    let whole = elapsed.as_secs() + u64::from(elapsed.subsec_nanos() > 0);
    Duration::from_secs(2 * whole.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_spec_from_secs() {
        assert_eq!(TimeoutSpec::from_secs(-1), TimeoutSpec::Adaptive);
        assert_eq!(TimeoutSpec::from_secs(0), TimeoutSpec::Unbounded);
        assert_eq!(
            TimeoutSpec::from_secs(5),
            TimeoutSpec::Limit(Duration::from_secs(5))
        );
        assert_eq!(TimeoutSpec::Adaptive.limit(), None);
        assert_eq!(TimeoutSpec::Unbounded.limit(), None);
        assert_eq!(
            TimeoutSpec::from_secs(3).limit(),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_adaptive_timeout_rounding() {
        assert_eq!(adaptive_timeout_for(Duration::ZERO), Duration::from_secs(2));
        assert_eq!(
            adaptive_timeout_for(Duration::from_millis(10)),
            Duration::from_secs(2)
        );
        assert_eq!(
            adaptive_timeout_for(Duration::from_secs(3)),
            Duration::from_secs(6)
        );
        assert_eq!(
            adaptive_timeout_for(Duration::from_millis(3001)),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_batch_command_line() {
        let request = CompileRequest::new("coqc", ["-R", ".", "Top"], "");
        assert_eq!(
            request.command_line(Path::new("/tmp/tmpab.v")),
            vec!["coqc", "-R", ".", "Top", "/tmp/tmpab.v", "-q"]
        );
    }

    #[test]
    fn test_interactive_command_line() {
        let request = CompileRequest::new("coqtop", Vec::<String>::new(), "")
            .mode(InvocationMode::Interactive);
        assert_eq!(
            request.command_line(Path::new("/tmp/tmpab.v")),
            vec!["coqtop", "-load-vernac-source", "/tmp/tmpab", "-q"]
        );
    }

    #[test]
    fn test_cache_key_depends_on_contents_and_timeout() {
        let a = CompileRequest::new("coqc", ["-q"], "Check nat.");
        let b = CompileRequest::new("coqc", ["-q"], "Check bool.");
        assert_ne!(
            CacheKey::new(&a, TimeoutSpec::Unbounded),
            CacheKey::new(&b, TimeoutSpec::Unbounded)
        );
        assert_ne!(
            CacheKey::new(&a, TimeoutSpec::Unbounded),
            CacheKey::new(&a, TimeoutSpec::from_secs(5))
        );
        assert_eq!(
            CacheKey::new(&a, TimeoutSpec::Adaptive),
            CacheKey::new(&a.clone(), TimeoutSpec::Adaptive)
        );
    }

    #[test]
    fn test_timed_out_marker() {
        let output = CompilerOutput {
            output: "partial\nTimeout!".to_string(),
            command_line: vec![],
        };
        assert!(output.timed_out());
    }

    #[test]
    fn test_combined_output_keeps_single_marker() {
        let run = ProcessOutput {
            stdout: format!("out\n{TIMEOUT_MARKER}"),
            stderr: format!("err\n{TIMEOUT_MARKER}"),
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(combined_output(&run), "out\nerr\n\nTimeout!");

        let merged = ProcessOutput {
            stdout: "both\n".to_string(),
            ..Default::default()
        };
        assert_eq!(combined_output(&merged), "both\n");
    }

    #[test]
    fn test_reset_timeout() {
        let session = CompilerSession::new(DiagnoseConfig::default());
        assert_eq!(session.get_timeout(), None);
        session.observe_duration(Duration::from_millis(1500));
        assert_eq!(session.get_timeout(), Some(Duration::from_secs(4)));
        // Only the first observation counts
        session.observe_duration(Duration::from_secs(30));
        assert_eq!(session.get_timeout(), Some(Duration::from_secs(4)));
        session.reset_timeout();
        assert_eq!(session.get_timeout(), None);
    }

    #[test]
    fn test_resolve_timeout_substitutes_learned_value() {
        let session = CompilerSession::new(DiagnoseConfig::default());
        assert_eq!(
            session.resolve_timeout(TimeoutSpec::Adaptive),
            TimeoutSpec::Adaptive
        );
        session.observe_duration(Duration::from_secs(3));
        assert_eq!(
            session.resolve_timeout(TimeoutSpec::Adaptive),
            TimeoutSpec::Limit(Duration::from_secs(6))
        );
        assert_eq!(
            session.resolve_timeout(TimeoutSpec::Unbounded),
            TimeoutSpec::Unbounded
        );
    }
}
