//! Command logging sink.

/// Receives human-readable progress messages, such as the command line
/// about to run. Only called when the session verbosity reaches the
/// request's log threshold.
pub trait CommandLog: Send + Sync {
    fn log(&self, message: &str);
}

/// Forwards messages to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCommandLog;

impl CommandLog for TracingCommandLog {
    fn log(&self, message: &str) {
        tracing::info!("{}", message.trim_start());
    }
}

/// Drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCommandLog;

impl CommandLog for NoOpCommandLog {
    fn log(&self, _message: &str) {}
}

impl<F> CommandLog for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, message: &str) {
        self(message)
    }
}

/// Render a command line the way it is logged: every word quoted.
pub fn format_command_line(command_line: &[String]) -> String {
    format!("\"{}\"", command_line.join("\" \""))
}
