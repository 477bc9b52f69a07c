#![forbid(unsafe_code)]
//! dbgtest — automated tests of rustc's gdb and lldb support.
//!
//! Test cases are ordinary Rust programs with special inline comments. The
//! comments say where to set breakpoints, which debugger commands to run when
//! a breakpoint is hit, and what output the debugger should produce:
//!
//! ```rust,ignore
//! fn simple() -> (i32, bool) {
//!     let i = 5;
//!     let b = false;
//!     // BREAKPOINT
//!     // (gdb) print i
//!     // \$1 = 5
//!     // (gdb) info locals
//!     // b = false
//!     // i = 5
//!     // (lldb) p i
//!     // \(i32\) 5
//!     (i, b)
//! }
//! ```
//!
//! The parser looks for comment groups beginning with a `BREAKPOINT` line.
//! A breakpoint is set at that line in the code. Breakpoints are temporary;
//! any given breakpoint triggers exactly once. Commands are prefaced with
//! `(gdb)` or `(lldb)` depending on which debugger they run under, and can be
//! intermingled freely. Expected output is interpreted as a Python regular
//! expression anchored at both ends, hence the escaped dollar signs and
//! parens above. Wrapping a directive block in `/* */` deactivates it; the
//! parser never looks inside block comments.
//!
//! ## How it works
//!
//! 1. Find `rustc`, the sysroot, and the available debuggers.
//! 2. Compile each test source with debug info into a private temp directory.
//! 3. Parse the source, extracting breakpoints and associated tests.
//! 4. Render a driver script per debugger: the gdb script is a sequence of
//!    gdb commands dropping down to Python where needed; the lldb script is a
//!    Python program driving the `lldb` module.
//! 5. Listen on a Unix socket for structured result events. (Far more robust
//!    than scraping the debugger's own output.)
//! 6. Run the script, draining and reporting events concurrently.
//!
//! ## Panic Policy
//!
//! Production code uses `Result` with `?`; `.unwrap()`/`.expect()` are
//! reserved for tests and for invariants documented at the call site.

pub mod backend;
pub mod channel;
pub mod cli;
pub mod directive;
pub mod harness;

pub use backend::{Debugger, RenderContext};
pub use channel::{ResultEvent, Status};
pub use directive::{Breakpoint, ParseError, Test};
pub use harness::{Config, HarnessError, Summary};
