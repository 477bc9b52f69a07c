//! Orchestrator: compiles each test source, parses its directives, and runs
//! every available backend against the binary while draining the result
//! channel, aggregating outcomes into a batch summary.
//!
//! ## Policies
//!
//! - A file that fails to parse is skipped with a diagnostic; the batch
//!   continues.
//! - A file that fails to compile is skipped, its rustc diagnostics printed
//!   verbatim; the batch continues but the run is marked failed.
//! - Backend runs on the same file are serialized; the binary is never run
//!   under two debuggers at once.
//! - FAIL/ERROR detail is always printed; RUNNING/PASS only under verbose.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::backend::{self, Debugger, RenderContext};
use crate::channel::{ResultChannel, ResultEvent, Status};
use crate::directive::{self, Breakpoint, ParseError};

/// Run configuration, threaded explicitly through orchestrator, renderer and
/// backend constructors. Never ambient state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Print RUNNING/PASS detail in addition to FAIL/ERROR.
    pub verbose: bool,
    /// Trace internals: dump scripts, echo debugger output, keep the temp dir.
    pub debug: bool,
    pub no_gdb: bool,
    pub no_lldb: bool,
    /// Deadline for socket accept, event reads, and process wait.
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: false,
            no_gdb: false,
            no_lldb: false,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Errors that abort the whole batch. Everything file- or test-scoped is
/// handled inline and reflected in the [`Summary`] instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("no debuggers available")]
    NoBackends,

    #[error("required tool not found: {0}")]
    Toolchain(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Per-batch outcome tallies. FAIL and ERROR keep the batch exit nonzero, as
/// do build failures; parse-skipped files do not.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    pub files_run: usize,
    pub files_skipped: usize,
    pub build_failures: usize,
}

impl Summary {
    pub fn ok(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.build_failures == 0
    }

    fn absorb(&mut self, tally: Tally) {
        self.passed += tally.passed;
        self.failed += tally.failed;
        self.errored += tally.errored;
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![format!("{} passed", self.passed)];
        if self.failed > 0 {
            parts.push(format!("{} failed", self.failed));
        }
        if self.errored > 0 {
            parts.push(format!("{} errors", self.errored));
        }
        if self.build_failures > 0 {
            parts.push(format!("{} build failures", self.build_failures));
        }
        if self.files_skipped > 0 {
            parts.push(format!("{} files skipped", self.files_skipped));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Event counts for one (file, backend) run, produced by the reporter.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    passed: usize,
    failed: usize,
    errored: usize,
}

/// Compiler toolchain context discovered once per batch.
struct Toolchain {
    sysroot: PathBuf,
}

impl Toolchain {
    fn discover() -> Result<Self, HarnessError> {
        let output = Command::new("rustc")
            .args(["--print", "sysroot"])
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => HarnessError::Toolchain("rustc".to_string()),
                _ => HarnessError::Io(e),
            })?;
        if !output.status.success() {
            return Err(HarnessError::Toolchain(format!(
                "rustc --print sysroot exited with {}",
                output.status
            )));
        }
        let sysroot = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        Ok(Self { sysroot })
    }

    /// Compile one test source with debug info and optimizations off, so
    /// every annotated line resolves to a location.
    fn compile(&self, source: &Path, executable: &Path) -> Result<(), String> {
        let output = Command::new("rustc")
            .arg("-g")
            .args(["-C", "opt-level=0"])
            .args(["--edition", "2021"])
            .arg("-o")
            .arg(executable)
            .arg(source)
            .output()
            .map_err(|e| e.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).into_owned())
        }
    }
}

/// Run the whole batch: discover tooling, then compile, parse, and test each
/// source under every available backend.
pub fn run_files(sources: &[PathBuf], config: &Config) -> Result<Summary, HarnessError> {
    let started = Instant::now();
    let toolchain = Toolchain::discover()?;

    let backends = backend::available_backends(config);
    if backends.is_empty() {
        return Err(HarnessError::NoBackends);
    }

    let temp_dir = tempfile::Builder::new().prefix("dbgtest").tempdir()?;
    tracing::debug!("using temp dir {}", temp_dir.path().display());

    let mut summary = Summary::default();
    for (index, source) in sources.iter().enumerate() {
        run_file(
            source,
            index,
            &toolchain,
            &backends,
            temp_dir.path(),
            config,
            &mut summary,
        );
    }

    println!(
        "====== {summary} in {:.2}s ======",
        started.elapsed().as_secs_f64()
    );

    if config.debug {
        // Keep executables, scripts and sockets around for post-mortem.
        println!("keeping temp dir {}", temp_dir.keep().display());
    }
    Ok(summary)
}

fn run_file(
    source: &Path,
    index: usize,
    toolchain: &Toolchain,
    backends: &[Box<dyn Debugger>],
    temp_dir: &Path,
    config: &Config,
    summary: &mut Summary,
) {
    if source.extension().is_none_or(|ext| ext != "rs") {
        println!("SKIPPING test {}: not a .rs file", source.display());
        summary.files_skipped += 1;
        return;
    }
    tracing::debug!("running test {}", source.display());

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test".to_string());

    // Build the executable first; nothing below is meaningful without it.
    let executable = temp_dir.join(format!("{stem}-{index}"));
    if let Err(diagnostics) = toolchain.compile(source, &executable) {
        println!("FAILED to build {}:", source.display());
        print!("{diagnostics}");
        summary.build_failures += 1;
        return;
    }

    let breakpoints = match directive::parse_file(source) {
        Ok(bps) => bps,
        Err(e @ ParseError::Io { .. }) => {
            println!("SKIPPING test {}: {e}", source.display());
            summary.files_skipped += 1;
            return;
        }
        Err(e) => {
            println!("SKIPPING test {}: failed to parse: {e}", source.display());
            summary.files_skipped += 1;
            return;
        }
    };

    log_unmatched_backends(&breakpoints, backends);

    summary.files_run += 1;
    for debugger in backends {
        let tally = run_backend(
            debugger.as_ref(),
            &breakpoints,
            &executable,
            &toolchain.sysroot,
            temp_dir,
            &format!("{stem}-{index}"),
            config,
        );
        match tally {
            Ok(tally) => summary.absorb(tally),
            Err(e) => {
                println!(
                    "[{}] {} ERROR {e}",
                    debugger.identifier(),
                    source.display()
                );
                summary.errored += 1;
            }
        }
    }
}

/// One backend run: fresh result channel, rendered script, spawned debugger,
/// with reporting drained concurrently from the channel.
fn run_backend(
    debugger: &dyn Debugger,
    breakpoints: &[Breakpoint],
    executable: &Path,
    sysroot: &Path,
    temp_dir: &Path,
    run_id: &str,
    config: &Config,
) -> io::Result<Tally> {
    let name = debugger.identifier();
    let socket = temp_dir.join(format!("status-{run_id}.{name}.sock"));
    let script = temp_dir.join(format!("script-{run_id}.{name}"));

    // The listener must exist before the script can run.
    let channel = ResultChannel::bind(&socket)?;
    let cx = RenderContext {
        breakpoints,
        executable,
        sysroot,
        socket: channel.path(),
    };
    backend::write_script(debugger, &script, &cx)?;

    let (stream, events) = channel.listen(config.timeout)?;
    let verbose = config.verbose;
    let reporter = thread::Builder::new()
        .name(format!("report-{name}"))
        .spawn(move || report_events(&events, name, verbose))?;

    let report = debugger.run(executable, &script);
    stream.process_exited();
    stream.join();
    let mut tally = reporter
        .join()
        .unwrap_or_else(|_| panic!("reporter thread for {name} panicked"));

    let report = report?;
    if report.timed_out {
        println!("[{name}] ERROR debugger timed out and was killed");
        tally.errored += 1;
    } else if !report.success {
        // Coarse crash signal, distinct from "ran and some tests failed":
        // individual outcomes already arrived over the channel.
        println!(
            "[{name}] ERROR debugger exited abnormally: code {:?}, signal {:?}",
            report.exit_code, report.signal
        );
        tally.errored += 1;
    }
    Ok(tally)
}

/// Reporting task: consumes decoded events in order. FAIL/ERROR always
/// print; RUNNING/PASS only under verbose.
fn report_events(events: &Receiver<ResultEvent>, backend_name: &str, verbose: bool) -> Tally {
    let mut tally = Tally::default();
    for event in events.iter() {
        match event.status {
            Status::Running => {}
            Status::Pass => tally.passed += 1,
            Status::Fail => tally.failed += 1,
            Status::Error => tally.errored += 1,
        }
        let always = matches!(event.status, Status::Fail | Status::Error);
        if always || verbose {
            println!("[{backend_name}] {event}");
        }
    }
    tally
}

/// The silent-skip policy for unknown backend labels, made diagnosable:
/// every label that matches no available backend is logged at debug level.
fn log_unmatched_backends(breakpoints: &[Breakpoint], backends: &[Box<dyn Debugger>]) {
    for bp in breakpoints {
        for test in &bp.tests {
            if !backends.iter().any(|d| d.identifier() == test.backend) {
                tracing::debug!(
                    "{}:{}: no available backend matches ({}); test will not run",
                    bp.file,
                    test.line,
                    test.backend
                );
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_quiet_with_a_minute_deadline() {
        let config = Config::default();
        assert!(!config.verbose);
        assert!(!config.debug);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn summary_ok_requires_no_failures_of_any_kind() {
        let mut summary = Summary {
            passed: 3,
            ..Summary::default()
        };
        assert!(summary.ok());
        summary.failed = 1;
        assert!(!summary.ok());

        let build_broken = Summary {
            build_failures: 1,
            ..Summary::default()
        };
        assert!(!build_broken.ok());
    }

    #[test]
    fn summary_display_lists_only_nonzero_buckets() {
        let summary = Summary {
            passed: 2,
            ..Summary::default()
        };
        assert_eq!(summary.to_string(), "2 passed");

        let summary = Summary {
            passed: 2,
            failed: 1,
            errored: 1,
            files_skipped: 1,
            ..Summary::default()
        };
        assert_eq!(
            summary.to_string(),
            "2 passed, 1 failed, 1 errors, 1 files skipped"
        );
    }

    #[test]
    fn reporter_tallies_judged_events_only() {
        let (tx, rx) = std::sync::mpsc::channel();
        for status in [
            Status::Running,
            Status::Pass,
            Status::Running,
            Status::Fail,
            Status::Error,
        ] {
            tx.send(ResultEvent {
                status,
                file: Some("t.rs".to_string()),
                line: Some(1),
                msg: None,
            })
            .unwrap();
        }
        drop(tx);

        let tally = report_events(&rx, "gdb", false);
        assert_eq!(tally.passed, 1);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.errored, 1);
    }
}
