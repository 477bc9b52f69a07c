//! CLI for the dbgtest harness.
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros. `execute()`
//! returns `CliResult<ExitCode>` instead of calling `process::exit`; only the
//! top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::fmt;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::Parser;

use crate::harness::{self, Config, HarnessError};

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: ExitCode::FAILURE,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

// ============================================================================
// Clap CLI definition
// ============================================================================

const DIRECTIVE_HELP: &str = "\
Test cases are Rust programs with inline comment directives:

    // BREAKPOINT
    // (gdb) print i
    // \\$1 = 5
    // (lldb) p i
    // \\(i32\\) 5

A comment group opening with BREAKPOINT sets a one-shot breakpoint at that
line. (gdb)/(lldb) lines are commands for the named debugger; the lines after
each command are the expected output, interpreted as an anchored Python
regular expression. Wrap a block in /* */ to deactivate it.";

/// Automated tests of rustc's gdb and lldb support
#[derive(Parser, Debug)]
#[command(name = "dbgtest")]
#[command(version)]
#[command(about = "Automated tests of rustc's gdb and lldb support", long_about = None)]
#[command(after_help = DIRECTIVE_HELP)]
pub struct Cli {
    /// Annotated test sources to run
    #[arg(value_name = "FILE", required = true)]
    pub sources: Vec<PathBuf>,

    /// Also print RUNNING/PASS detail (FAIL/ERROR always print)
    #[arg(short, long)]
    pub verbose: bool,

    /// Print lots of debug goop: rendered scripts, debugger output, temp dir
    #[arg(short, long)]
    pub debug: bool,

    /// Skip gdb
    #[arg(long = "no-gdb")]
    pub no_gdb: bool,

    /// Skip lldb
    #[arg(long = "no-lldb")]
    pub no_lldb: bool,

    /// Deadline in seconds for each debugger run before it is killed
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub timeout: u64,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            verbose: self.verbose,
            debug: self.debug,
            no_gdb: self.no_gdb,
            no_lldb: self.no_lldb,
            timeout: Duration::from_secs(self.timeout),
        }
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();

    // Structured logging with an env-based filter; -d raises the default to
    // debug so script dumps and spawn traces show up.
    let default_filter = if cli.debug { "dbgtest=debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init();

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Execute the batch and map its outcome to an exit code.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    let config = cli.config();
    match harness::run_files(&cli.sources, &config) {
        // Summary details were already printed; a failing batch needs no
        // second message, just a nonzero exit.
        Ok(summary) if summary.ok() => Ok(ExitCode::SUCCESS),
        Ok(_) => Err(CliError {
            message: String::new(),
            exit_code: ExitCode::FAILURE,
        }),
        Err(e @ (HarnessError::NoBackends | HarnessError::Toolchain(_))) => {
            Err(CliError::failure(e.to_string()))
        }
        Err(e) => Err(CliError::failure(format!("fatal: {e}"))),
    }
}

// ============================================================================
// Tests
// ============================================================================
