//! Timeout-bounded process execution
//!
//! Runs an external program, captures what it writes, and never hangs past
//! the requested limit. On timeout the child is killed and whatever was
//! captured so far comes back with a trailing [`TIMEOUT_MARKER`]; a timeout
//! is an outcome, not an error.
//!
//! The child leads its own process group, and a timeout kills the whole
//! group. Output streams are drained by reader threads into shared buffers,
//! so partial output survives a kill. Launch failures caused by the OS
//! (resource exhaustion and the like) are retried per [`RetryPolicy`].

pub mod retry;

pub use retry::{retry_launch, RetryPolicy};

use crate::error::DiagnoseResult;
use std::io::{self, Read};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::debug;

/// Appended to every captured stream when the limit fires.
pub const TIMEOUT_MARKER: &str = "\nTimeout!";

/// Default wait for pipe readers after a timeout kill.
pub const DEFAULT_READER_GRACE_MS: u64 = 500;

/// One process invocation.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// Executable path or name
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Bytes fed to standard input before it is closed
    pub stdin: Vec<u8>,
    /// Wall-clock limit (`None` = wait as long as it takes)
    pub timeout: Option<Duration>,
    /// Send standard error into the standard output capture
    pub merge_stderr: bool,
}

impl ProcessRequest {
    /// Create a request with empty stdin, no timeout and merged streams
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: Vec::new(),
            timeout: None,
            merge_stderr: true,
        }
    }

    /// Set the wall-clock limit
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Set standard input contents
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = input.into();
        self
    }

    /// Capture standard error on its own
    pub fn separate_stderr(mut self) -> Self {
        self.merge_stderr = false;
        self
    }

    /// Program followed by its arguments
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// What a process run produced.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Captured standard output (with standard error when merged)
    pub stdout: String,
    /// Captured standard error (empty when merged, marker only on timeout)
    pub stderr: String,
    /// Whether the limit fired and the process tree was killed
    pub timed_out: bool,
    /// Exit status when the process finished on its own
    pub status: Option<ExitStatus>,
    /// Wall-clock time of the successful attempt
    pub elapsed: Duration,
}

/// Launches processes under a timeout with OS-error retry.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    retry: RetryPolicy,
    reader_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(
            RetryPolicy::default(),
            Duration::from_millis(DEFAULT_READER_GRACE_MS),
        )
    }
}

impl ProcessRunner {
    pub fn new(retry: RetryPolicy, reader_grace: Duration) -> Self {
        Self {
            retry,
            reader_grace,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run the request, retrying the whole launch-and-wait on transient OS errors.
    pub async fn run(&self, request: &ProcessRequest) -> DiagnoseResult<ProcessOutput> {
        retry_launch(&self.retry, &request.command_line(), || self.run_once(request)).await
    }

    async fn run_once(&self, request: &ProcessRequest) -> io::Result<ProcessOutput> {
        let start = Instant::now();
        let (mut child, mut stdout, mut stderr) = spawn(request)?;
        // Also the process group id; read before the child is reaped.
        let pid = child.id();

        if let Some(mut stdin) = child.stdin.take() {
            let input = request.stdin.clone();
            tokio::spawn(async move {
                if !input.is_empty() {
                    // The child may exit without reading; a broken pipe is fine.
                    let _ = stdin.write_all(&input).await;
                }
            });
        }

        // The limit covers exit and end-of-output, so descendants that keep
        // the pipes open count against it too.
        let finished = async {
            let status = child.wait().await?;
            stdout.finished().await;
            if let Some(capture) = stderr.as_mut() {
                capture.finished().await;
            }
            Ok::<_, io::Error>(status)
        };
        let status = match request.timeout {
            Some(limit) => match tokio::time::timeout(limit, finished).await {
                Ok(status) => Some(status?),
                Err(_) => None,
            },
            None => Some(finished.await?),
        };

        let timed_out = status.is_none();
        if timed_out {
            debug!(
                program = %request.program,
                ?pid,
                limit = ?request.timeout,
                "process timed out, killing process group"
            );
            kill_process_tree(&mut child, pid);
            let _ = child.wait().await;
            let drained = tokio::time::timeout(self.reader_grace, async {
                stdout.finished().await;
                if let Some(capture) = stderr.as_mut() {
                    capture.finished().await;
                }
            })
            .await;
            if drained.is_err() {
                debug!("pipe still open after grace period; using partial capture");
            }
        }

        let mut stdout = stdout.text();
        let mut stderr = stderr.map(|capture| capture.text()).unwrap_or_default();
        if timed_out {
            stdout.push_str(TIMEOUT_MARKER);
            stderr.push_str(TIMEOUT_MARKER);
        }

        Ok(ProcessOutput {
            stdout,
            stderr,
            timed_out,
            status,
            elapsed: start.elapsed(),
        })
    }
}

fn spawn(request: &ProcessRequest) -> io::Result<(Child, StreamCapture, Option<StreamCapture>)> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::piped())
        .kill_on_drop(true);

    // Put the compiler in its own process group so a timeout can kill the
    // whole tree: wrapper scripts, shells and whatever they started.
    #[cfg(unix)]
    cmd.process_group(0);

    let (out_reader, out_writer) = io::pipe()?;
    let err_reader = if request.merge_stderr {
        cmd.stderr(out_writer.try_clone()?);
        None
    } else {
        let (err_reader, err_writer) = io::pipe()?;
        cmd.stderr(err_writer);
        Some(err_reader)
    };
    cmd.stdout(out_writer);

    let child = cmd.spawn()?;
    // Our copies of the write ends must close or the readers never see EOF.
    drop(cmd);

    let stdout = StreamCapture::start(out_reader)?;
    let stderr = err_reader.map(StreamCapture::start).transpose()?;
    Ok((child, stdout, stderr))
}

/// SIGKILL the process group led by `pid`, then the child itself.
fn kill_process_tree(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    // Already-exited children make start_kill fail; the caller reaps either way.
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(pgid, "killpg failed: {e}");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// A pipe drained on a detached reader thread into a buffer readable at any
/// time.
///
/// The thread is not a runtime blocking task, so a descendant that escapes
/// the kill and holds the pipe open cannot keep the runtime from shutting
/// down.
struct StreamCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    eof: Option<oneshot::Receiver<()>>,
}

impl StreamCapture {
    fn start(mut pipe: io::PipeReader) -> io::Result<Self> {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let (eof_tx, eof_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("diagnose-pipe-reader".to_string())
            .spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => sink
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = eof_tx.send(());
            })?;
        Ok(Self {
            buffer,
            eof: Some(eof_rx),
        })
    }

    /// Wait until the pipe reaches end of file. Cancel-safe.
    async fn finished(&mut self) {
        if let Some(eof) = self.eof.as_mut() {
            // A dropped sender means the reader stopped; same thing.
            let _ = eof.await;
            self.eof = None;
        }
    }

    /// Everything captured so far
    fn text(&self) -> String {
        let bytes = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let text = String::from_utf8_lossy(&bytes).into_owned();
        text
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::DiagnoseError;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(RetryPolicy::none(), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_captures_merged_output() {
        let request = ProcessRequest::new("sh", ["-c", "echo out; echo err 1>&2"]);
        let output = runner().run(&request).await.unwrap();
        assert!(!output.timed_out);
        assert!(output.stdout.contains("out\n"));
        assert!(output.stdout.contains("err\n"));
        assert_eq!(output.stderr, "");
        assert!(output.status.unwrap().success());
    }

    #[tokio::test]
    async fn test_captures_separate_streams() {
        let request =
            ProcessRequest::new("sh", ["-c", "echo out; echo err 1>&2"]).separate_stderr();
        let output = runner().run(&request).await.unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_stdin_is_delivered() {
        let request = ProcessRequest::new("cat", Vec::<String>::new()).stdin("hello");
        let output = runner().run(&request).await.unwrap();
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_output_with_marker() {
        let request = ProcessRequest::new("sh", ["-c", "echo started; exec sleep 30"])
            .timeout(Some(Duration::from_secs(1)));
        let start = Instant::now();
        let output = runner().run(&request).await.unwrap();

        assert!(output.timed_out);
        assert!(output.status.is_none());
        assert!(output.stdout.starts_with("started\n"));
        assert!(output.stdout.ends_with(TIMEOUT_MARKER));
        assert_eq!(output.stderr, TIMEOUT_MARKER);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_zero_timeout_means_unbounded() {
        let request = ProcessRequest::new("sh", ["-c", "sleep 0.2; echo done"])
            .timeout(Some(Duration::ZERO));
        assert_eq!(request.timeout, None);
        let output = runner().run(&request).await.unwrap();
        assert!(!output.timed_out);
        assert_eq!(output.stdout, "done\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_retried() {
        let runner = ProcessRunner::new(
            RetryPolicy::unbounded(Duration::from_secs(3600)),
            Duration::from_millis(10),
        );
        let request = ProcessRequest::new("/nonexistent/compiler-binary", ["x.v"]);
        let err = runner.run(&request).await.unwrap_err();
        assert!(matches!(err, DiagnoseError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let survived = dir.path().join("survived");
        // The shell does not exec, so the sleeper is a grandchild holding the pipe
        let script = format!(
            "echo started; sh -c 'sleep 4; touch {}'; echo after",
            survived.display()
        );
        let request = ProcessRequest::new("sh", ["-c", script.as_str()])
            .timeout(Some(Duration::from_secs(1)));
        let start = Instant::now();
        let output = runner().run(&request).await.unwrap();

        assert!(output.timed_out);
        assert_eq!(output.stdout, format!("started\n{TIMEOUT_MARKER}"));
        assert!(start.elapsed() < Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!survived.exists());
    }

    #[tokio::test]
    async fn test_background_descendant_holding_output_counts_against_limit() {
        let request = ProcessRequest::new("sh", ["-c", "echo quick; sleep 30 &"])
            .timeout(Some(Duration::from_secs(1)));
        let start = Instant::now();
        let output = runner().run(&request).await.unwrap();

        assert!(output.timed_out);
        assert!(output.stdout.starts_with("quick\n"));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_unexecutable_file_is_not_retried() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("coqc");
        std::fs::write(&bogus, b"\x00\x01\x02\x03 not a program").unwrap();
        std::fs::set_permissions(&bogus, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = ProcessRunner::new(
            RetryPolicy::bounded(3, Duration::from_millis(10)),
            Duration::from_millis(10),
        );
        let request = ProcessRequest::new(bogus.to_string_lossy(), ["x.v"]);
        let err = runner.run(&request).await.unwrap_err();
        assert!(matches!(err, DiagnoseError::Launch { .. }), "{err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_command_line() {
        let request = ProcessRequest::new("coqc", ["-R", ".", "Top"]);
        assert_eq!(request.command_line(), vec!["coqc", "-R", ".", "Top"]);
    }
}
