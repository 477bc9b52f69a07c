//! gdb backend: a gdb command file that drops into inline Python for result
//! judgment and event emission.

use std::fmt::Write as _;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use super::{
    Debugger, ProbeError, RenderContext, RunReport, anchored_pattern, python_str,
    wait_with_timeout,
};
use crate::harness::Config;

/// All gdb-related context for one run.
pub struct Gdb {
    debug: bool,
    timeout: Duration,
}

impl Gdb {
    /// Check that a usable `gdb` is on PATH.
    pub fn probe(config: &Config) -> Result<Self, ProbeError> {
        let status = Command::new("gdb")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ProbeError::NotFound { tool: "gdb" },
                _ => ProbeError::Io(e),
            })?;
        if !status.success() {
            return Err(ProbeError::Unusable {
                tool: "gdb",
                reason: format!("gdb --version exited with {status}"),
            });
        }
        Ok(Self {
            debug: config.debug,
            timeout: config.timeout,
        })
    }
}

impl Debugger for Gdb {
    fn identifier(&self) -> &'static str {
        "gdb"
    }

    fn render(&self, cx: &RenderContext<'_>) -> String {
        render_script(cx)
    }

    fn run(&self, executable: &Path, script: &Path) -> io::Result<RunReport> {
        let mut cmd = Command::new("gdb");
        cmd.arg(executable)
            .arg("--batch")
            .arg("--return-child-result")
            .arg("--command")
            .arg(script)
            .arg("--nx"); // ignore .gdbinit
        if self.debug {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            tracing::debug!("running {cmd:?}");
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let mut child = cmd.spawn()?;
        wait_with_timeout(&mut child, self.timeout)
    }
}

/// Render the gdb driver script. Exposed as a free function so the rendering
/// contract is testable without a gdb installation.
pub fn render_script(cx: &RenderContext<'_>) -> String {
    let mut s = String::new();

    // Allow the sysroot's bundled pretty printers to auto-load.
    let _ = writeln!(
        s,
        "add-auto-load-safe-path {}",
        cx.sysroot.join("lib/rustlib/etc").display()
    );
    s.push_str("set breakpoint pending off\n");

    // Python prolog: socket plumbing and the per-test judgment routine.
    let _ = write!(
        s,
        r#"
python
import json
import re
import socket

sock = socket.socket(socket.AF_UNIX, socket.SOCK_STREAM)
sock.connect({socket})

def send_result(status, msg=None, filename=None, lineno=None):
    res = {{"status": status}}
    if msg is not None:
        res["msg"] = str(msg)
    if filename is not None:
        res["file"] = filename
    if lineno is not None:
        res["line"] = lineno
    sock.sendall((json.dumps(res) + "\n").encode("utf-8"))

def run_test(command, want, filename, lineno):
    send_result("RUNNING", command, filename, lineno)
    try:
        out = gdb.execute(command, False, True)
    except gdb.error as e:
        send_result("ERROR", "command " + command + " failed: " + str(e).strip(), filename, lineno)
        return
    if re.match(want, out) is None:
        send_result("FAIL", "want regex {{want}} have {{out}}".format(**locals()), filename, lineno)
    else:
        send_result("PASS", None, filename, lineno)
end
"#,
        socket = python_str(&cx.socket.to_string_lossy()),
    );

    // One temporary stop per breakpoint that has gdb tests; breakpoints
    // without any emit no control structures at all.
    for bp in cx.breakpoints.iter().filter(|b| b.has_tests_for("gdb")) {
        let file = python_str(&bp.file);
        let location = python_str(&format!("{}:{}", bp.file, bp.line));
        let _ = write!(
            s,
            r#"
python
try:
    bp = gdb.Breakpoint({location}, temporary=True)
except RuntimeError as e:
    send_result("ERROR", "failed to resolve breakpoint: " + str(e), {file}, {line})
    gdb.execute("quit 1")
if getattr(bp, "locations", None) is not None and len(bp.locations) != 1:
    send_result("ERROR", "breakpoint resolved to " + str(len(bp.locations)) + " locations", {file}, {line})
    gdb.execute("quit 1")
end
commands
silent
"#,
            line = bp.line,
        );
        for test in bp.tests_for("gdb") {
            let _ = writeln!(
                s,
                "python run_test({command}, {want}, {file}, {line})",
                command = python_str(&test.command),
                want = python_str(&anchored_pattern(&test.expected)),
                line = test.line,
            );
        }
        s.push_str("continue\nend\n");
    }

    s.push_str("run\n");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::parse_source;
    use std::path::PathBuf;

    fn context_fixture() -> (Vec<crate::directive::Breakpoint>, PathBuf, PathBuf, PathBuf) {
        let bps = parse_source(
            "// BREAKPOINT\n\
             // (gdb) print i\n\
             // \\$1 = 5\n\
             // (lldb) p i\n\
             // \\(i32\\) 5\n\
             fn f() {}\n\
             // BREAKPOINT\n\
             // (lldb) p j\n\
             // \\(i32\\) 6\n",
            "case.rs",
        )
        .unwrap();
        (
            bps,
            PathBuf::from("/tmp/run/case"),
            PathBuf::from("/opt/sysroot"),
            PathBuf::from("/tmp/run/status.sock"),
        )
    }

    #[test]
    fn renders_stops_only_for_gdb_tests() {
        let (bps, exe, sysroot, socket) = context_fixture();
        let cx = RenderContext {
            breakpoints: &bps,
            executable: &exe,
            sysroot: &sysroot,
            socket: &socket,
        };
        let script = render_script(&cx);

        // One stop for the breakpoint with a gdb test, none for the
        // lldb-only breakpoint.
        assert_eq!(script.matches("gdb.Breakpoint(").count(), 1);
        assert!(script.contains(r#"gdb.Breakpoint("case.rs:1", temporary=True)"#));
        assert!(!script.contains("case.rs:7"));

        // One judgment call per gdb test, fully anchored pattern.
        assert_eq!(script.matches("python run_test(").count(), 1);
        assert!(script.contains(r#"run_test("print i", "^\\$1 = 5$", "case.rs", 2)"#));

        // Socket address and the final launch command are present.
        assert!(script.contains(r#"sock.connect("/tmp/run/status.sock")"#));
        assert!(script.trim_end().ends_with("run"));
    }

    #[test]
    fn renders_no_control_structures_without_gdb_tests() {
        let bps = parse_source(
            "// BREAKPOINT\n\
             // (lldb) p i\n\
             // \\(i32\\) 5\n",
            "case.rs",
        )
        .unwrap();
        let exe = PathBuf::from("/tmp/run/case");
        let sysroot = PathBuf::from("/opt/sysroot");
        let socket = PathBuf::from("/tmp/run/status.sock");
        let cx = RenderContext {
            breakpoints: &bps,
            executable: &exe,
            sysroot: &sysroot,
            socket: &socket,
        };
        let script = render_script(&cx);
        assert!(!script.contains("gdb.Breakpoint"));
        assert!(!script.contains("commands"));
        assert!(script.contains("run\n"));
    }

    #[test]
    fn preserves_relative_test_order_at_a_stop() {
        let bps = parse_source(
            "// BREAKPOINT\n\
             // (gdb) first\n\
             // a\n\
             // (lldb) middle\n\
             // b\n\
             // (gdb) second\n\
             // c\n",
            "case.rs",
        )
        .unwrap();
        let exe = PathBuf::from("/x");
        let sysroot = PathBuf::from("/s");
        let socket = PathBuf::from("/sock");
        let cx = RenderContext {
            breakpoints: &bps,
            executable: &exe,
            sysroot: &sysroot,
            socket: &socket,
        };
        let script = render_script(&cx);
        let first = script.find(r#"run_test("first""#).unwrap();
        let second = script.find(r#"run_test("second""#).unwrap();
        assert!(first < second);
        assert!(!script.contains("middle"));
    }
}
