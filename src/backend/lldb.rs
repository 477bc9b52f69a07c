//! lldb backend: a standalone Python program driving the `lldb` module's
//! SB API, run under the interpreter lldb's module was built for.

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

/// All lldb-related context for one run.
pub struct Lldb {
    /// Python interpreter used to execute the driver script.
    python: String,
    /// Path to the lldb Python module, reported by `lldb --python-path`.
    python_module: String,
    debug: bool,
    timeout: Duration,
}

impl Lldb {
    /// Check that lldb, a Python interpreter, and the lldb Python module are
    /// all available.
    pub fn probe(config: &Config) -> Result<Self, ProbeError> {
        let output = Command::new("lldb")
            .arg("--python-path")
            .stderr(Stdio::null())
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => ProbeError::NotFound { tool: "lldb" },
                _ => ProbeError::Io(e),
            })?;
        if !output.status.success() {
            return Err(ProbeError::Unusable {
                tool: "lldb",
                reason: format!("lldb --python-path exited with {}", output.status),
            });
        }
        let python_module = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if python_module.is_empty() {
            return Err(ProbeError::Unusable {
                tool: "lldb",
                reason: "lldb --python-path reported no module path".to_string(),
            });
        }

        let python = ["python3", "python"]
            .into_iter()
            .find(|p| {
                Command::new(p)
                    .arg("--version")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .map(|s| s.success())
                    .unwrap_or(false)
            })
            .ok_or(ProbeError::NotFound { tool: "python" })?
            .to_string();

        Ok(Self {
            python,
            python_module,
            debug: config.debug,
            timeout: config.timeout,
        })
    }
}

impl Debugger for Lldb {
    fn identifier(&self) -> &'static str {
        "lldb"
    }

    fn render(&self, cx: &RenderContext<'_>) -> String {
        render_script(cx)
    }

    fn run(&self, _executable: &Path, script: &Path) -> io::Result<RunReport> {
        // The executable is baked into the script; lldb itself is driven
        // entirely through the Python module.
        let pythonpath = match std::env::var("PYTHONPATH") {
            Ok(existing) if !existing.is_empty() => {
                format!("{}:{existing}", self.python_module)
            }
            _ => self.python_module.clone(),
        };
        let mut cmd = Command::new(&self.python);
        cmd.arg(script).env("PYTHONPATH", pythonpath);
        if self.debug {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            tracing::debug!("running {cmd:?}");
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let mut child = cmd.spawn()?;
        let report = wait_with_timeout(&mut child, self.timeout)?;

        // A Python/module binary mismatch aborts the interpreter on import.
        // Catch it here and help out unsuspecting users.
        if report.signal == Some(SIGABRT) {
            eprintln!(
                "Failed to import the lldb Python module using {}.",
                self.python
            );
            eprintln!("This usually means the interpreter does not match the one lldb was built against.");
            eprintln!("Try the system Python, or adjust PATH/virtualenv.");
        }
        Ok(report)
    }
}

/// Signal raised by the interpreter on a binary mismatch while importing
/// the lldb module.
const SIGABRT: i32 = 6;

/// Render the lldb driver script. Exposed as a free function so the
/// rendering contract is testable without an lldb installation.
pub fn render_script(cx: &RenderContext<'_>) -> String {
    let mut s = String::new();

    let _ = write!(
        s,
        r#"import json
import os
import re
import socket
import sys

import lldb

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

debugger = lldb.SBDebugger.Create()
debugger.SkipLLDBInitFiles(True)
debugger.SetAsync(False)  # pause script execution while commands run

target = debugger.CreateTargetWithFileAndArch({executable}, lldb.LLDB_ARCH_DEFAULT)
if not target:
    send_result("ERROR", "failed to create target")
    sys.exit(1)

bps = {{}}
"#,
        socket = python_str(&cx.socket.to_string_lossy()),
        executable = python_str(&cx.executable.to_string_lossy()),
    );

    // Register one one-shot stop per breakpoint with lldb tests; the rest
    // are never registered, so execution passes them without pausing.
    for bp in cx.breakpoints.iter().filter(|b| b.has_tests_for("lldb")) {
        let _ = write!(
            s,
            r#"
filename = {file}
lineno = {line}
bp = target.BreakpointCreateByLocation(filename, lineno)
if bp.GetNumLocations() != 1:
    send_result("ERROR", "breakpoint resolved to " + str(bp.GetNumLocations()) + " locations", filename, lineno)
    sys.exit(1)
bp.SetOneShot(True)
tests = []
"#,
            file = python_str(&bp.file),
            line = bp.line,
        );
        for test in bp.tests_for("lldb") {
            let _ = writeln!(
                s,
                "tests.append(({command}, {want}, filename, {line}))",
                command = python_str(&test.command),
                want = python_str(&anchored_pattern(&test.expected)),
                line = test.line,
            );
        }
        s.push_str("bps[bp.GetID()] = tests\n");
    }

    s.push_str(
        r#"
process = target.LaunchSimple(None, None, os.getcwd())
if not process:
    send_result("ERROR", "failed to launch process")
    sys.exit(1)

while True:
    state = process.GetState()
    if state == lldb.eStateExited:
        # process has exited; we're done
        sys.exit(0)

    if state != lldb.eStateStopped:
        send_result("ERROR", "unexpected process state: " + str(state))
        sys.exit(1)

    # find the breakpoint we stopped on
    bp_id = None
    for thread in process:
        if thread.GetStopReason() == lldb.eStopReasonBreakpoint:
            bp_id = thread.GetStopReasonDataAtIndex(0)
            break

    if bp_id is None:
        send_result("ERROR", "stopped but not on a breakpoint")
        sys.exit(1)

    tests = bps.get(bp_id)
    if tests is None:
        send_result("ERROR", "stopped at an unrecognized breakpoint")
        sys.exit(1)

    # run the commands, judge the results
    for command, want, filename, lineno in tests:
        send_result("RUNNING", command, filename, lineno)
        ret = lldb.SBCommandReturnObject()
        debugger.GetCommandInterpreter().HandleCommand(command, ret)
        if not ret.Succeeded():
            send_result("ERROR", "command " + command + " failed: " + ret.GetError().strip(), filename, lineno)
            continue

        out = ret.GetOutput()
        if re.match(want, out) is None:
            send_result("FAIL", "want regex {want} have {out}".format(**locals()), filename, lineno)
        else:
            send_result("PASS", None, filename, lineno)

    process.Continue()
"#,
    );

    s
}
