//! Reporting of test progress and results.
//!
//! The scope engine calls a [`TestLogger`] as tests start, fail, finish or get skipped.
//! [`ConsoleTestLogger`] is the plain-text implementation used by the binary.

use std::io::{self, Write};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::logging::CapturedOutput;
use crate::scope::{Results, TestId};

/// Receives status information about each test.
pub trait TestLogger: Send + Sync {
    fn test_started(&self, id: &TestId);
    fn test_error(&self, id: &TestId, message: &str);
    fn test_finished(&self, id: &TestId, failed: bool, debug_output: &CapturedOutput);
    fn test_skipped(&self, id: &TestId, reason: Option<&str>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTestLogger;

impl TestLogger for NullTestLogger {
    fn test_started(&self, _id: &TestId) {}
    fn test_error(&self, _id: &TestId, _message: &str) {}
    fn test_finished(&self, _id: &TestId, _failed: bool, _debug_output: &CapturedOutput) {}
    fn test_skipped(&self, _id: &TestId, _reason: Option<&str>) {}
}

/// When a finished test's captured debug output is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugOutputPolicy {
    #[default]
    Never,
    OnFailure,
    OnSuccess,
    Always,
}

impl DebugOutputPolicy {
    pub fn shows(self, failed: bool) -> bool {
        match self {
            DebugOutputPolicy::Never => false,
            DebugOutputPolicy::OnFailure => failed,
            DebugOutputPolicy::OnSuccess => !failed,
            DebugOutputPolicy::Always => true,
        }
    }
}

/// Plain-text test logger.
pub struct ConsoleTestLogger<W: Write + Send> {
    out: Mutex<W>,
    policy: DebugOutputPolicy,
}

impl ConsoleTestLogger<io::Stdout> {
    /// Logger writing to standard output.
    pub fn stdout(policy: DebugOutputPolicy) -> Self {
        Self::new(io::stdout(), policy)
    }
}

impl<W: Write + Send> ConsoleTestLogger<W> {
    pub fn new(out: W, policy: DebugOutputPolicy) -> Self {
        Self {
            out: Mutex::new(out),
            policy,
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    // Write errors on the console are not worth failing a test run over.
    fn write_lines(&self, f: impl FnOnce(&mut W) -> io::Result<()>) {
        let mut out = self.out.lock();
        if let Err(e) = f(&mut *out).and_then(|_| out.flush()) {
            tracing::warn!("Failed to write test output: {}", e);
        }
    }
}

impl<W: Write + Send> TestLogger for ConsoleTestLogger<W> {
    fn test_started(&self, id: &TestId) {
        self.write_lines(|out| writeln!(out, "[{}]", id));
    }

    fn test_error(&self, _id: &TestId, message: &str) {
        self.write_lines(|out| {
            for line in message.lines() {
                writeln!(out, "  {}", line)?;
            }
            Ok(())
        });
    }

    fn test_finished(&self, id: &TestId, failed: bool, debug_output: &CapturedOutput) {
        let show_debug = !debug_output.is_empty() && self.policy.shows(failed);
        self.write_lines(|out| {
            if failed {
                writeln!(out, "  FAILED: {}", id)?;
            }
            if show_debug {
                debug_output.dump(out, "    DEBUG ")?;
            }
            Ok(())
        });
    }

    fn test_skipped(&self, id: &TestId, reason: Option<&str>) {
        self.write_lines(|out| match reason {
            Some(reason) if !reason.is_empty() => writeln!(out, "  SKIPPED: {} ({})", id, reason),
            _ => writeln!(out, "  SKIPPED: {}", id),
        });
    }
}

/// Prints the end-of-run summary.
pub fn print_results(results: &Results, out: &mut dyn Write) -> io::Result<()> {
    writeln!(
        out,
        "{} passed, {} failed, {} skipped",
        results.passed_count(),
        results.failures.len(),
        results.skipped_count()
    )?;
    if results.ok() {
        writeln!(out, "All tests passed")?;
    } else {
        writeln!(out, "FAILED TESTS ({}):", results.failures.len())?;
        for f in &results.failures {
            writeln!(out, "  * {}", f.id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::DebugLogger;

    fn id(path: &[&str]) -> TestId {
        path.iter().fold(TestId::root(), |id, name| id.plus(name))
    }

    fn render(policy: DebugOutputPolicy, failed: bool) -> String {
        let logger = ConsoleTestLogger::new(Vec::new(), policy);
        let debug = DebugLogger::new();
        debug.log("some detail");
        logger.test_finished(&id(&["a", "b"]), failed, &debug.output());
        String::from_utf8(logger.into_inner()).unwrap()
    }

    #[test]
    fn test_debug_output_policy() {
        assert!(!render(DebugOutputPolicy::Never, true).contains("DEBUG"));
        assert!(render(DebugOutputPolicy::OnFailure, true).contains("some detail"));
        assert!(!render(DebugOutputPolicy::OnFailure, false).contains("DEBUG"));
        assert!(render(DebugOutputPolicy::OnSuccess, false).contains("some detail"));
        assert!(render(DebugOutputPolicy::Always, false).contains("some detail"));
    }

    #[test]
    fn test_failed_and_skipped_lines() {
        let logger = ConsoleTestLogger::new(Vec::new(), DebugOutputPolicy::Never);
        logger.test_started(&id(&["x"]));
        logger.test_error(&id(&["x"]), "line one\nline two");
        logger.test_finished(&id(&["x"]), true, &CapturedOutput::default());
        logger.test_skipped(&id(&["y"]), Some("no capability"));
        logger.test_skipped(&id(&["z"]), None);

        let text = String::from_utf8(logger.into_inner()).unwrap();
        assert_eq!(
            text,
            "[x]\n  line one\n  line two\n  FAILED: x\n  SKIPPED: y (no capability)\n  SKIPPED: z\n"
        );
    }
}
