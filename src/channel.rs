//! Result channel: the per-run Unix socket carrying structured outcome
//! events from the running debugger script back to the harness.
//!
//! The harness is the passive listener and must exist before the script runs;
//! the script is the active connector. One event per line, JSON-encoded.
//! Events are forwarded in the exact order the script emitted them.
//!
//! The channel enforces the run deadline on its own side: if no script
//! connects, or the stream stalls past the deadline, a synthetic ERROR event
//! is injected so the run ends with a diagnosable outcome instead of hanging.

use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Outcome tag carried by every event. `RUNNING` announces a test is about
/// to execute; exactly one of the other three follows per test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Running,
    Pass,
    Fail,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Running => "RUNNING",
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One wire-level record emitted by a running script. Created transiently by
/// the script, consumed exactly once by the reporter, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl ResultEvent {
    /// A harness-side event standing in for a script that never reported.
    fn synthetic_error(msg: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            file: None,
            line: None,
            msg: Some(msg.into()),
        }
    }
}

impl fmt::Display for ResultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line} {}", self.status)?,
            (Some(file), None) => write!(f, "{file} {}", self.status)?,
            _ => write!(f, "{}", self.status)?,
        }
        if let Some(msg) = &self.msg {
            write!(f, " {msg}")?;
        }
        Ok(())
    }
}

/// A bound, not-yet-listening result channel. Binding happens before the
/// debugger process is spawned so the connect cannot race the listener.
pub struct ResultChannel {
    listener: UnixListener,
    path: PathBuf,
}

/// Handle over the reader thread draining one run's events. The matching
/// [`Receiver`] yields decoded events in emission order and closes when the
/// script disconnects, the deadline expires, or process exit is signaled.
pub struct EventStream {
    process_exited: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl EventStream {
    /// Tell the reader the debugger process has exited, so it stops waiting
    /// for a connection that can no longer arrive. Any already-queued
    /// connection and its buffered events are still drained.
    pub fn process_exited(&self) {
        self.process_exited.store(true, Ordering::Release);
    }

    /// Wait for the reader thread to finish draining.
    pub fn join(self) {
        let _ = self.reader.join();
    }
}

/// Poll interval for the bounded accept loop and stalled reads.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

impl ResultChannel {
    /// Create the socket at `path`. The path must not already exist; callers
    /// allocate one fresh socket per (file, backend) run.
    pub fn bind(path: &Path) -> io::Result<Self> {
        let listener = UnixListener::bind(path)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the reader: accept one connection and decode its line-delimited
    /// events until EOF or the deadline. Consumes the channel; the socket
    /// file lives in the run's temp dir and is cleaned up with it.
    pub fn listen(self, deadline: Duration) -> io::Result<(EventStream, Receiver<ResultEvent>)> {
        let (tx, rx) = mpsc::channel();
        let process_exited = Arc::new(AtomicBool::new(false));
        let exited = Arc::clone(&process_exited);
        let reader = thread::Builder::new()
            .name("result-channel".to_string())
            .spawn(move || read_events(self.listener, deadline, &exited, &tx))?;
        Ok((
            EventStream {
                process_exited,
                reader,
            },
            rx,
        ))
    }
}

fn read_events(
    listener: UnixListener,
    deadline: Duration,
    process_exited: &AtomicBool,
    tx: &mpsc::Sender<ResultEvent>,
) {
    let give_up = Instant::now() + deadline;

    // Accept with a deadline. A connection queued before the process exited
    // is still picked up here.
    let stream = loop {
        match listener.accept() {
            Ok((stream, _)) => break stream,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if process_exited.load(Ordering::Acquire) {
                    // Process is gone and nothing ever connected; the run
                    // outcome comes from the exit status instead.
                    return;
                }
                if Instant::now() >= give_up {
                    let _ = tx.send(ResultEvent::synthetic_error(
                        "timed out waiting for the debugger script to connect",
                    ));
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = tx.send(ResultEvent::synthetic_error(format!(
                    "result channel accept failed: {e}"
                )));
                return;
            }
        }
    };

    if stream.set_nonblocking(false).is_err() || stream.set_read_timeout(Some(POLL_INTERVAL)).is_err() {
        let _ = tx.send(ResultEvent::synthetic_error(
            "result channel could not configure stream",
        ));
        return;
    }

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    // Once the process exits, allow a short grace period so events already
    // buffered in the socket still drain before the reader gives up.
    let mut exit_grace: Option<Instant> = None;
    loop {
        // A timed-out read may leave a partial line in the buffer; it is
        // only cleared after a full line has been processed.
        match reader.read_line(&mut line) {
            Ok(0) => return, // clean EOF: script finished and closed
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    match serde_json::from_str::<ResultEvent>(trimmed) {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(ResultEvent::synthetic_error(format!(
                                "malformed result event {trimmed:?}: {e}"
                            )));
                            return;
                        }
                    }
                }
                line.clear();
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                if Instant::now() >= give_up {
                    let _ = tx.send(ResultEvent::synthetic_error(
                        "timed out waiting for result events",
                    ));
                    return;
                }
                if process_exited.load(Ordering::Acquire) {
                    let grace =
                        *exit_grace.get_or_insert_with(|| Instant::now() + 20 * POLL_INTERVAL);
                    if Instant::now() >= grace {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(ResultEvent::synthetic_error(format!(
                    "result channel read failed: {e}"
                )));
                return;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
