//! Directive parser: extracts breakpoint/command/expected-output directives
//! from the comment structure of an annotated test source.
//!
//! ## Grammar
//!
//! A *comment group* is a maximal run of consecutive whole-line `//` comments.
//! A group whose first line is exactly `BREAKPOINT` opens a breakpoint at that
//! line; any other group is ignored entirely. Within an open group, a line of
//! the shape `(<backend>) <command>` opens a test, and every other comment
//! line is one more expected-output line for the open test. A further
//! `BREAKPOINT` line closes the current breakpoint and opens a new one.
//!
//! Block comments (`/* ... */`) are invisible to the parser, which is how a
//! broken test block is deactivated without deleting it.
//!
//! ## Notes
//! - The scanner works on the comment structure, not raw text, so code lines
//!   and blank lines end a group the same way they end a `go`/`rustdoc`
//!   comment group.
//! - Expected-output lines are stored verbatim; joining and anchoring happen
//!   at render time (see [`crate::backend::anchored_pattern`]).

use std::fs;
use std::path::Path;

use thiserror::Error;

/// Sentinel marker opening a breakpoint group.
const SENTINEL: &str = "BREAKPOINT";

/// One verification step attached to a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    /// Backend label from the `(<backend>)` marker. Arbitrary at parse time;
    /// labels matching no available backend are skipped at render time.
    pub backend: String,
    /// Line the command directive appeared on (for error reporting).
    pub line: usize,
    /// Debugger-native command to run at the stop.
    pub command: String,
    /// Expected output, one regex fragment per directive line. Joined with
    /// `\n` and anchored when the script is rendered.
    pub expected: Vec<String>,
}

/// A one-shot stop request at a source location, owning its tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub file: String,
    /// Line of the `BREAKPOINT` sentinel in the original source.
    pub line: usize,
    /// Tests in directive order. May be empty (valid but inert).
    pub tests: Vec<Test>,
}

impl Breakpoint {
    /// Tests targeting the given backend, in their original relative order.
    pub fn tests_for<'a>(&'a self, backend: &'a str) -> impl Iterator<Item = &'a Test> {
        self.tests.iter().filter(move |t| t.backend == backend)
    }

    /// Whether any test targets the given backend. A breakpoint with none
    /// must not be registered with that backend at all.
    pub fn has_tests_for(&self, backend: &str) -> bool {
        self.tests.iter().any(|t| t.backend == backend)
    }
}

/// Errors raised while parsing directives. All variants carry the file and
/// the exact line of the offending directive.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{file}:{line}: expected a (<debugger>) command before output line {text:?}")]
    OutputBeforeCommand {
        file: String,
        line: usize,
        text: String,
    },

    #[error("{file}:{line}: ({backend}) {command:?} has no expected output")]
    MissingOutput {
        file: String,
        line: usize,
        backend: String,
        command: String,
    },

    #[error("failed to read {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parse a test source file into its breakpoint list.
///
/// ## Errors
/// Returns a [`ParseError`] identifying file and line on malformed
/// directives, or on I/O failure.
pub fn parse_file(path: &Path) -> Result<Vec<Breakpoint>, ParseError> {
    let file = path.to_string_lossy().into_owned();
    let source = fs::read_to_string(path).map_err(|source| ParseError::Io {
        file: file.clone(),
        source,
    })?;
    parse_source(&source, &file)
}

/// Parse directives out of in-memory source text.
#[tracing::instrument(skip_all, fields(file = file, source_len = source.len()))]
pub fn parse_source(source: &str, file: &str) -> Result<Vec<Breakpoint>, ParseError> {
    Parser::new(file).parse(source)
}

// ============================================================================
// Scanner: comment structure
// ============================================================================

/// Classification of one source line.
enum Line<'a> {
    /// A whole-line `//` comment, content with the marker and padding removed.
    Comment(&'a str),
    /// Anything else: code, blank line, or block-comment interior. Ends the
    /// current comment group.
    Other,
}

/// Tracks `/* */` nesting across lines so directives inside block comments
/// never reach the directive state machine.
struct Scanner {
    block_depth: usize,
}

impl Scanner {
    fn new() -> Self {
        Self { block_depth: 0 }
    }

    /// Classify a single line, updating block-comment state.
    fn classify<'a>(&mut self, raw: &'a str) -> Line<'a> {
        let mut rest = raw.trim();

        if self.block_depth == 0 {
            if let Some(content) = rest.strip_prefix("//") {
                return Line::Comment(content.trim());
            }
        }

        // Scan for block delimiters. Rust block comments nest.
        while !rest.is_empty() {
            let open = rest.find("/*");
            let close = rest.find("*/");
            match (open, close) {
                (Some(o), Some(c)) if o < c => {
                    self.block_depth += 1;
                    rest = &rest[o + 2..];
                }
                (_, Some(c)) if self.block_depth > 0 => {
                    self.block_depth -= 1;
                    rest = &rest[c + 2..];
                }
                (Some(o), _) => {
                    self.block_depth += 1;
                    rest = &rest[o + 2..];
                }
                _ => break,
            }
        }

        Line::Other
    }
}

// ============================================================================
// Parser: directive state machine
// ============================================================================

/// Directive parser state. One state per position in the grammar, as opposed
/// to a pair of lookahead booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Outside a sentinel group (includes the remainder of ignored groups).
    Idle,
    /// Sentinel seen; the next directive must be a `(<backend>)` command.
    AwaitCommand,
    /// A test is open and accepting expected-output lines or a new command.
    AwaitOutput,
}

struct Parser<'a> {
    file: &'a str,
    state: State,
    /// Whether the next comment line begins a new comment group.
    group_start: bool,
    breakpoints: Vec<Breakpoint>,
    open_breakpoint: Option<Breakpoint>,
    open_test: Option<Test>,
}

impl<'a> Parser<'a> {
    fn new(file: &'a str) -> Self {
        Self {
            file,
            state: State::Idle,
            group_start: true,
            breakpoints: Vec::new(),
            open_breakpoint: None,
            open_test: None,
        }
    }

    fn parse(mut self, source: &str) -> Result<Vec<Breakpoint>, ParseError> {
        let mut scanner = Scanner::new();

        for (idx, raw) in source.lines().enumerate() {
            let lineno = idx + 1;
            match scanner.classify(raw) {
                Line::Comment(content) => self.comment_line(content, lineno)?,
                Line::Other => self.end_group()?,
            }
        }
        self.end_group()?;

        Ok(self.breakpoints)
    }

    fn comment_line(&mut self, content: &str, lineno: usize) -> Result<(), ParseError> {
        if self.group_start {
            self.group_start = false;
            if content == SENTINEL {
                self.open_breakpoint(lineno);
            }
            // A group opening with anything else is ignored entirely.
            return Ok(());
        }

        match self.state {
            State::Idle => Ok(()),
            State::AwaitCommand | State::AwaitOutput => {
                if content == SENTINEL {
                    // A new sentinel closes the current breakpoint in place.
                    self.finish_breakpoint()?;
                    self.open_breakpoint(lineno);
                    return Ok(());
                }
                if let Some((backend, command)) = command_marker(content) {
                    self.finish_test()?;
                    self.open_test = Some(Test {
                        backend: backend.to_string(),
                        line: lineno,
                        command: command.to_string(),
                        expected: Vec::new(),
                    });
                    self.state = State::AwaitOutput;
                    return Ok(());
                }
                if self.state == State::AwaitCommand {
                    return Err(ParseError::OutputBeforeCommand {
                        file: self.file.to_string(),
                        line: lineno,
                        text: content.to_string(),
                    });
                }
                if let Some(test) = self.open_test.as_mut() {
                    test.expected.push(content.to_string());
                }
                Ok(())
            }
        }
    }

    fn open_breakpoint(&mut self, lineno: usize) {
        self.open_breakpoint = Some(Breakpoint {
            file: self.file.to_string(),
            line: lineno,
            tests: Vec::new(),
        });
        self.state = State::AwaitCommand;
    }

    fn finish_test(&mut self) -> Result<(), ParseError> {
        let Some(test) = self.open_test.take() else {
            return Ok(());
        };
        if test.expected.is_empty() {
            return Err(ParseError::MissingOutput {
                file: self.file.to_string(),
                line: test.line,
                backend: test.backend,
                command: test.command,
            });
        }
        if let Some(bp) = self.open_breakpoint.as_mut() {
            bp.tests.push(test);
        }
        Ok(())
    }

    fn finish_breakpoint(&mut self) -> Result<(), ParseError> {
        self.finish_test()?;
        if let Some(bp) = self.open_breakpoint.take() {
            self.breakpoints.push(bp);
        }
        Ok(())
    }

    fn end_group(&mut self) -> Result<(), ParseError> {
        self.finish_breakpoint()?;
        self.state = State::Idle;
        self.group_start = true;
        Ok(())
    }
}

/// Match the `(<backend>) <command>` shape. The backend label is an arbitrary
/// identifier-like word; everything after the closing paren is the command.
/// Lines like `\(int\) 5` (escaped parens in expected output) do not match.
fn command_marker(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix('(')?;
    let close = rest.find(')')?;
    let backend = &rest[..close];
    if backend.is_empty()
        || !backend
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
    {
        return None;
    }
    let command = rest[close + 1..].trim();
    if command.is_empty() {
        return None;
    }
    Some((backend, command))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Breakpoint> {
        parse_source(source, "test.rs").unwrap()
    }

    #[test]
    fn parses_basic_group() {
        let bps = parse(
            "fn main() {\n\
             let i = 5;\n\
             // BREAKPOINT\n\
             // (gdb) print i\n\
             // \\$1 = 5\n\
             let _ = i;\n\
             }\n",
        );
        assert_eq!(
            bps,
            vec![Breakpoint {
                file: "test.rs".to_string(),
                line: 3,
                tests: vec![Test {
                    backend: "gdb".to_string(),
                    line: 4,
                    command: "print i".to_string(),
                    expected: vec!["\\$1 = 5".to_string()],
                }],
            }]
        );
    }

    #[test]
    fn accumulates_multi_line_expected_output() {
        let bps = parse(
            "// BREAKPOINT\n\
             // (gdb) info locals\n\
             // b = false\n\
             // i = 5\n",
        );
        assert_eq!(bps[0].tests[0].expected, vec!["b = false", "i = 5"]);
    }

    #[test]
    fn interleaves_backends_under_one_breakpoint() {
        let bps = parse(
            "// BREAKPOINT\n\
             // (gdb) cmd1\n\
             // want1\n\
             // (lldb) cmd2\n\
             // want2a\n\
             // want2b\n\
             // (gdb) cmd3\n\
             // want3\n",
        );
        assert_eq!(bps.len(), 1);
        let tests = &bps[0].tests;
        assert_eq!(tests.len(), 3);
        assert_eq!(tests[0].backend, "gdb");
        assert_eq!(tests[1].backend, "lldb");
        assert_eq!(tests[1].expected, vec!["want2a", "want2b"]);
        assert_eq!(tests[2].backend, "gdb");

        let gdb: Vec<_> = bps[0].tests_for("gdb").map(|t| t.command.as_str()).collect();
        assert_eq!(gdb, vec!["cmd1", "cmd3"]);
    }

    #[test]
    fn breakpoint_without_tests_is_valid() {
        let bps = parse("// BREAKPOINT\nfn main() {}\n");
        assert_eq!(bps.len(), 1);
        assert!(bps[0].tests.is_empty());
        assert!(!bps[0].has_tests_for("gdb"));
    }

    #[test]
    fn produces_breakpoints_in_file_order() {
        let bps = parse(
            "// BREAKPOINT\n\
             // (gdb) a\n\
             // x\n\
             fn f() {}\n\
             // BREAKPOINT\n\
             // (gdb) b\n\
             // y\n\
             fn g() {}\n\
             // BREAKPOINT\n\
             // (lldb) c\n\
             // z\n",
        );
        let lines: Vec<_> = bps.iter().map(|b| b.line).collect();
        assert_eq!(lines, vec![1, 5, 9]);
    }

    #[test]
    fn adjacent_sentinel_closes_previous_breakpoint() {
        let bps = parse(
            "// BREAKPOINT\n\
             // (gdb) a\n\
             // x\n\
             // BREAKPOINT\n\
             // (gdb) b\n\
             // y\n",
        );
        assert_eq!(bps.len(), 2);
        assert_eq!(bps[0].line, 1);
        assert_eq!(bps[1].line, 4);
        assert_eq!(bps[0].tests.len(), 1);
        assert_eq!(bps[1].tests.len(), 1);
    }

    #[test]
    fn ignores_groups_not_opening_with_sentinel() {
        let bps = parse(
            "// just a comment\n\
             // BREAKPOINT\n\
             // (gdb) never parsed\n\
             // because the group started above\n",
        );
        assert!(bps.is_empty());
    }

    #[test]
    fn block_comment_deactivates_directives() {
        let bps = parse(
            "fn main() {\n\
             /* BROKEN, SKIPPED:\n\
             // BREAKPOINT\n\
             // (gdb) print i\n\
             // \\$1 = 5\n\
             */\n\
             // BREAKPOINT\n\
             // (gdb) print 1\n\
             // \\$1 = 1\n\
             }\n",
        );
        assert_eq!(bps.len(), 1);
        assert_eq!(bps[0].line, 7);
    }

    #[test]
    fn nested_block_comments_stay_closed() {
        let bps = parse(
            "/* outer /* inner */ still outer\n\
             // BREAKPOINT\n\
             // (gdb) x\n\
             // y\n\
             */\n",
        );
        assert!(bps.is_empty());
    }

    #[test]
    fn output_before_command_is_an_error_with_line() {
        let err = parse_source(
            "// BREAKPOINT\n\
             // stray expected output\n",
            "bad.rs",
        )
        .unwrap_err();
        match err {
            ParseError::OutputBeforeCommand { file, line, .. } => {
                assert_eq!(file, "bad.rs");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_without_output_is_an_error() {
        let err = parse_source(
            "// BREAKPOINT\n\
             // (gdb) print i\n\
             fn main() {}\n",
            "bad.rs",
        )
        .unwrap_err();
        match err {
            ParseError::MissingOutput { line, backend, .. } => {
                assert_eq!(line, 2);
                assert_eq!(backend, "gdb");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_backend_labels_parse_as_plain_tests() {
        let bps = parse(
            "// BREAKPOINT\n\
             // (windbg) dv\n\
             // whatever\n",
        );
        assert_eq!(bps[0].tests[0].backend, "windbg");
    }

    #[test]
    fn escaped_parens_are_expected_output_not_commands() {
        let bps = parse(
            "// BREAKPOINT\n\
             // (lldb) p 2\n\
             // \\(int\\) 2\n",
        );
        assert_eq!(bps[0].tests.len(), 1);
        assert_eq!(bps[0].tests[0].expected, vec!["\\(int\\) 2"]);
    }

    #[test]
    fn command_marker_shapes() {
        assert_eq!(command_marker("(gdb) print i"), Some(("gdb", "print i")));
        assert_eq!(command_marker("(rr-1.0) cont"), Some(("rr-1.0", "cont")));
        assert_eq!(command_marker("\\(int\\) 5"), None);
        assert_eq!(command_marker("(gdb)"), None);
        assert_eq!(command_marker("() cmd"), None);
        assert_eq!(command_marker("(two words) cmd"), None);
        assert_eq!(command_marker("no marker"), None);
    }
}
