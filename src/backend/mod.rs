//! Debugger backend abstraction and shared script-rendering helpers.
//!
//! Each backend implements the same small capability set — probe, identify,
//! render, run — over the shared breakpoint model. Backend-specific logic is
//! confined to the two render implementations: the gdb dialect is a gdb
//! command file dropping into inline Python, the lldb dialect is a standalone
//! Python program. Both emit result events over the run's Unix socket rather
//! than through their own output streams, which are unparseable in batch mode.

pub mod gdb;
pub mod lldb;

use std::fs;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::directive::Breakpoint;
use crate::harness::Config;

pub use gdb::Gdb;
pub use lldb::Lldb;

/// Everything a renderer needs to produce an executable driver script.
pub struct RenderContext<'a> {
    pub breakpoints: &'a [Breakpoint],
    /// Compiled binary under test.
    pub executable: &'a Path,
    /// rustc sysroot, used to whitelist the bundled gdb pretty printers.
    pub sysroot: &'a Path,
    /// Unix socket the script connects back to with result events.
    pub socket: &'a Path,
}

/// Coarse outcome of one debugger process run. Individual test outcomes
/// travel out-of-band over the result channel; this only says whether the
/// process itself ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Signal that terminated the process, if any.
    pub signal: Option<i32>,
    /// Whether the deadline expired and the process was killed.
    pub timed_out: bool,
}

/// Why a backend is unavailable for this run. The orchestrator reports the
/// reason and skips the backend; probing never aborts the batch.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{tool} not found on PATH")]
    NotFound { tool: &'static str },

    #[error("{tool} is not usable: {reason}")]
    Unusable { tool: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The capability set shared by gdb and lldb. Probing happens in each
/// variant's constructor; a probed value is usable by construction.
pub trait Debugger {
    /// Stable name used for backend-tag matching against tests.
    fn identifier(&self) -> &'static str;

    /// Render a ready-to-execute driver script.
    fn render(&self, cx: &RenderContext<'_>) -> String;

    /// Execute the script against the compiled binary, blocking until the
    /// spawned process exits or the configured deadline kills it.
    fn run(&self, executable: &Path, script: &Path) -> io::Result<RunReport>;
}

/// Discover the backends usable for this run, honoring opt-out flags.
/// Unavailable backends are reported and skipped.
pub fn available_backends(config: &Config) -> Vec<Box<dyn Debugger>> {
    let mut backends: Vec<Box<dyn Debugger>> = Vec::new();
    if !config.no_gdb {
        match Gdb::probe(config) {
            Ok(gdb) => backends.push(Box::new(gdb)),
            Err(e) => println!("SKIPPING gdb: {e}"),
        }
    }
    if !config.no_lldb {
        match Lldb::probe(config) {
            Ok(lldb) => backends.push(Box::new(lldb)),
            Err(e) => println!("SKIPPING lldb: {e}"),
        }
    }
    backends
}

/// Render the backend's script and write it to `path`. Under debug the full
/// script is logged for post-mortem inspection.
pub fn write_script(
    debugger: &dyn Debugger,
    path: &Path,
    cx: &RenderContext<'_>,
) -> io::Result<()> {
    let script = debugger.render(cx);
    fs::write(path, &script)?;
    tracing::debug!(
        backend = debugger.identifier(),
        "script {}:\n----\n{script}----",
        path.display()
    );
    Ok(())
}

// ============================================================================
// Shared rendering helpers
// ============================================================================

/// Join a test's expected-output lines into one pattern and anchor it at both
/// ends. Anchors the author already wrote are kept as-is; a trailing `\$`
/// (an escaped literal dollar) does not count as an anchor.
pub fn anchored_pattern(expected: &[String]) -> String {
    let mut pattern = expected.join("\n");
    if !pattern.starts_with('^') {
        pattern.insert(0, '^');
    }
    if !pattern.ends_with('$') || pattern.ends_with("\\$") {
        pattern.push('$');
    }
    pattern
}

/// Quote a string as a Python double-quoted literal. Expected patterns are
/// full of backslashes, so this must escape rather than interpolate.
pub fn python_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Wait for a spawned debugger process with a deadline. On expiry the child
/// is killed and the report is marked timed out; the harness injects the
/// matching synthetic ERROR event on the result channel.
pub(crate) fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<RunReport> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(RunReport {
                success: status.success(),
                exit_code: status.code(),
                signal: status.signal(),
                timed_out: false,
            });
        }
        if Instant::now() >= deadline {
            // The child may have exited in the meantime; kill errors are moot.
            let _ = child.kill();
            let status = child.wait()?;
            return Ok(RunReport {
                success: false,
                exit_code: status.code(),
                signal: status.signal(),
                timed_out: true,
            });
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_bare_patterns_at_both_ends() {
        assert_eq!(anchored_pattern(&["foo".to_string()]), "^foo$");
    }

    #[test]
    fn keeps_existing_anchors() {
        assert_eq!(anchored_pattern(&["^foo$".to_string()]), "^foo$");
        assert_eq!(anchored_pattern(&["^foo".to_string()]), "^foo$");
        assert_eq!(anchored_pattern(&["foo$".to_string()]), "^foo$");
    }

    #[test]
    fn escaped_trailing_dollar_is_not_an_anchor() {
        assert_eq!(anchored_pattern(&["cost: 5\\$".to_string()]), "^cost: 5\\$$");
    }

    #[test]
    fn joins_multi_line_expectations_with_newline() {
        let lines = vec!["b = false".to_string(), "i = 5".to_string()];
        assert_eq!(anchored_pattern(&lines), "^b = false\ni = 5$");
    }

    #[test]
    fn python_str_escapes_regex_text() {
        assert_eq!(python_str("\\$1 = 5"), r#""\\$1 = 5""#);
        assert_eq!(python_str("say \"hi\""), r#""say \"hi\"""#);
        assert_eq!(python_str("a\nb"), r#""a\nb""#);
        assert_eq!(python_str("tab\there"), r#""tab\there""#);
    }
}
