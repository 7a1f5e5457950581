//! Command-line front end for compiler diagnostics
//!
//! # Usage
//!
//! ```bash
//! # Run the compiler on a file and print its normalized output
//! diagnose-error run coqc --arg -R --arg . --arg Top --file bug.v --timeout 30
//!
//! # Turn captured output into a reusable error pattern
//! diagnose-error generalize output.txt > pattern.txt
//!
//! # Check whether new output still shows the same error
//! diagnose-error has-error new-output.txt --pattern "$(cat pattern.txt)"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use diagnose_error::compiler::format_command_line;
use diagnose_error::{
    error_body, generalize, has_error, line_number, CompileRequest, CompilerSession,
    DiagnoseConfig, ErrorPattern, InvocationMode, TimeoutSpec,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raise verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// TOML configuration file (DIAGNOSE_* environment variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a compiler on a source file and print its normalized output
    Run {
        /// Compiler executable
        compiler: String,

        /// Compiler argument, placed before the file (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,

        /// Source file whose contents are compiled
        #[arg(long)]
        file: PathBuf,

        /// Seconds before the compiler is killed; 0 waits forever, negative is adaptive
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        timeout: i64,

        /// Load the file through the interactive toplevel
        #[arg(long, default_value_t = false)]
        interactive: bool,

        /// Print the effective command line before the output
        #[arg(long, default_value_t = false)]
        show_command: bool,
    },

    /// Report whether captured output contains the error
    HasError {
        /// File holding captured compiler output
        output: PathBuf,

        /// Error pattern (defaults to the compiler's standard error header)
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Print the line number of the error in captured output
    Line {
        output: PathBuf,

        #[arg(long)]
        pattern: Option<String>,
    },

    /// Print the message of the error in captured output
    Body {
        output: PathBuf,

        #[arg(long)]
        pattern: Option<String>,
    },

    /// Print a pattern that matches the error in captured output
    Generalize { output: PathBuf },
}

#[derive(Serialize)]
struct RunReport<'a> {
    command_line: &'a [String],
    output: &'a str,
    timed_out: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => DiagnoseConfig::from_file(path)?,
        None => DiagnoseConfig::default(),
    };
    config.apply_env();
    config.verbosity = config.verbosity.saturating_add(args.verbose);
    debug!(?config, "configuration loaded");

    match args.command {
        Command::Run {
            compiler,
            args: compiler_args,
            file,
            timeout,
            interactive,
            show_command,
        } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mode = if interactive {
                InvocationMode::Interactive
            } else {
                InvocationMode::Batch
            };
            let request = CompileRequest::new(compiler, compiler_args, contents)
                .timeout(TimeoutSpec::from_secs(timeout))
                .mode(mode);

            let session = CompilerSession::new(config);
            let result = session.get_output(&request).await?;
            info!(
                timed_out = result.timed_out(),
                learned_timeout = ?session.get_timeout(),
                "compiler finished"
            );

            if args.json {
                let report = RunReport {
                    command_line: &result.command_line,
                    output: &result.output,
                    timed_out: result.timed_out(),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                if show_command {
                    println!("{}", format_command_line(&result.command_line));
                }
                print!("{}", result.output);
            }
        }
        Command::HasError { output, pattern } => {
            let text = read_output(&output)?;
            let pattern = resolve_pattern(pattern.as_deref())?;
            let found = has_error(&text, &pattern);
            if args.json {
                println!("{}", serde_json::json!({ "has_error": found }));
            } else {
                println!("{found}");
            }
        }
        Command::Line { output, pattern } => {
            let text = read_output(&output)?;
            let pattern = resolve_pattern(pattern.as_deref())?;
            let line = line_number(&text, &pattern)?;
            if args.json {
                println!("{}", serde_json::json!({ "line": line }));
            } else {
                println!("{line}");
            }
        }
        Command::Body { output, pattern } => {
            let text = read_output(&output)?;
            let pattern = resolve_pattern(pattern.as_deref())?;
            let body = error_body(&text, &pattern)?;
            if args.json {
                println!("{}", serde_json::json!({ "body": body }));
            } else {
                println!("{body}");
            }
        }
        Command::Generalize { output } => {
            let text = read_output(&output)?;
            let pattern = generalize(&text)?;
            if args.json {
                println!("{}", serde_json::json!({ "pattern": pattern.as_str() }));
            } else {
                println!("{pattern}");
            }
        }
    }

    Ok(())
}

/// Captured output, normalized the way a session would have stored it
fn read_output(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(diagnose_error::normalize_output(&raw))
}

fn resolve_pattern(pattern: Option<&str>) -> Result<ErrorPattern> {
    match pattern {
        Some(source) => Ok(ErrorPattern::new(source)?),
        None => Ok(ErrorPattern::default_pattern().clone()),
    }
}
