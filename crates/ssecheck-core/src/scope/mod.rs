//! Hierarchical test scopes.
//!
//! A test run is a tree of named scopes executed one at a time on the calling thread.
//! Test bodies return an [`Outcome`]: `Err(Abort::Failed)` ends the body early as a
//! failure, `Err(Abort::Skipped)` ends it as skipped. Both are usually produced through
//! the scope's helpers and propagated with `?`:
//!
//! ```ignore
//! run_tests(config, |t| {
//!     t.run("comments", |t| {
//!         t.require_capability("comments")?;
//!         let value = t.require(do_something())?;
//!         t.check_eq("comment text", value.as_str(), "event data");
//!         Ok(())
//!     });
//!     Ok(())
//! });
//! ```
//!
//! A panic inside a body is caught at that scope's boundary and recorded as a failure
//! with its location and backtrace; it never crosses into the parent. Cleanups registered
//! with [`TestScope::defer`] always run, newest first, before the result is recorded.

mod filter;
mod panic;
mod result;

pub use filter::{Filter, RegexFilters, RegexList};
pub use result::{Results, TestId, TestResult, TestStatus};

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::logging::DebugLogger;
use crate::report::{NullTestLogger, TestLogger};
use crate::service::Capabilities;

/// Reason given for tests rejected by the run's filter.
pub const EXCLUDED_BY_FILTER: &str = "excluded by filter parameters";

/// Early exit from a test body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    Failed,
    Skipped,
}

impl Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::Failed => f.write_str("test failed"),
            Abort::Skipped => f.write_str("test skipped"),
        }
    }
}

/// What a test body returns.
pub type Outcome<T = ()> = Result<T, Abort>;

/// Options for an entire test run.
pub struct TestConfiguration {
    /// Decides which tests run based on their ids. `None` runs everything.
    pub filter: Option<Filter>,

    /// Receives status information about each test.
    pub test_logger: Box<dyn TestLogger>,

    /// Capabilities consulted by `has_capability` and `require_capability`.
    pub capabilities: Capabilities,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            filter: None,
            test_logger: Box::new(NullTestLogger),
            capabilities: Capabilities::default(),
        }
    }
}

struct Environment {
    config: TestConfiguration,
    results: Mutex<Results>,
}

/// One node of the execution tree.
pub struct TestScope {
    env: Arc<Environment>,
    id: TestId,
    debug: DebugLogger,
    failed: bool,
    skip_reason: Option<String>,
    errors: Vec<String>,
    cleanups: Vec<Box<dyn FnOnce()>>,
}

/// Runs a whole test tree and returns its results.
///
/// The root scope itself is only recorded if it fails outside of any named subtest.
pub fn run_tests(config: TestConfiguration, body: impl FnOnce(&mut TestScope) -> Outcome) -> Results {
    let env = Arc::new(Environment {
        config,
        results: Mutex::new(Results::default()),
    });

    let mut root = TestScope::new(Arc::clone(&env), TestId::root());
    let status = root.execute(body);
    if status == TestStatus::Failed {
        root.record(status);
    }
    drop(root);

    let results = std::mem::take(&mut *env.results.lock());
    results
}

impl TestScope {
    fn new(env: Arc<Environment>, id: TestId) -> Self {
        Self {
            env,
            id,
            debug: DebugLogger::new(),
            failed: false,
            skip_reason: None,
            errors: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    fn logger(&self) -> &dyn TestLogger {
        self.env.config.test_logger.as_ref()
    }

    /// The full name of this scope.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// Runs a named subtest in its own scope and returns how it ended.
    pub fn run(&mut self, name: &str, body: impl FnOnce(&mut TestScope) -> Outcome) -> TestStatus {
        let id = self.id.plus(name);
        self.logger().test_started(&id);

        if let Some(filter) = &self.env.config.filter {
            if !filter(&id) {
                self.logger().test_skipped(&id, Some(EXCLUDED_BY_FILTER));
                self.env.results.lock().record(TestResult {
                    id,
                    errors: Vec::new(),
                    failed: false,
                    skipped: true,
                    skip_reason: Some(EXCLUDED_BY_FILTER.to_string()),
                });
                return TestStatus::Skipped;
            }
        }

        let mut child = TestScope::new(Arc::clone(&self.env), id);
        let status = child.execute(body);
        child.record(status);

        match status {
            TestStatus::Skipped => {
                self.logger().test_skipped(&child.id, child.skip_reason.as_deref());
            }
            _ => {
                let failed = status == TestStatus::Failed;
                self.logger().test_finished(&child.id, failed, &child.debug.output());
            }
        }
        status
    }

    fn execute(&mut self, body: impl FnOnce(&mut TestScope) -> Outcome) -> TestStatus {
        let outcome = panic::catch(|| body(self));

        let mut skipped = false;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(Abort::Skipped)) => skipped = true,
            Ok(Err(Abort::Failed)) => self.failed = true,
            Err(report) => self.error(format!("unexpected panic in test: {}", report)),
        }
        // `fail_now` may be followed by a normal return.
        if self.failed && self.errors.is_empty() {
            self.error("test failed with no failure message");
        }

        self.run_cleanups();

        if self.failed {
            TestStatus::Failed
        } else if skipped {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        }
    }

    fn run_cleanups(&mut self) {
        while let Some(cleanup) = self.cleanups.pop() {
            if let Err(report) = panic::catch(cleanup) {
                self.error(format!("unexpected panic in cleanup: {}", report));
            }
        }
    }

    fn record(&self, status: TestStatus) {
        self.env.results.lock().record(TestResult {
            id: self.id.clone(),
            errors: self.errors.clone(),
            failed: status == TestStatus::Failed,
            skipped: status == TestStatus::Skipped,
            skip_reason: self.skip_reason.clone(),
        });
    }

    // ------------------------------------------------------------------------
    // Failures
    // ------------------------------------------------------------------------

    /// Records a failure without ending the test.
    pub fn error(&mut self, message: impl Display) {
        let message = message.to_string();
        self.failed = true;
        self.logger().test_error(&self.id, &message);
        self.errors.push(message);
    }

    /// Records a failure; return the result to end the test.
    pub fn fail(&mut self, message: impl Display) -> Abort {
        self.error(message);
        Abort::Failed
    }

    /// Ends the test as failed without adding a message.
    pub fn fail_now(&mut self) -> Abort {
        self.failed = true;
        Abort::Failed
    }

    /// Unwraps `result`, failing the test with the error if there is one.
    pub fn require<T, E: Display>(&mut self, result: Result<T, E>) -> Outcome<T> {
        result.map_err(|e| self.fail(e))
    }

    /// Records a failure if `condition` is false. Returns `condition`.
    pub fn check(&mut self, condition: bool, message: impl Display) -> bool {
        if !condition {
            self.error(message);
        }
        condition
    }

    /// Records a failure if the values differ. Returns whether they were equal.
    pub fn check_eq<T: PartialEq + Debug + ?Sized>(&mut self, expected: &T, actual: &T, what: &str) -> bool {
        self.check(
            expected == actual,
            format_args!("{}: expected {:?}, got {:?}", what, expected, actual),
        )
    }

    /// Like [`check_eq`](Self::check_eq) but ends the test on mismatch.
    pub fn require_eq<T: PartialEq + Debug + ?Sized>(&mut self, expected: &T, actual: &T, what: &str) -> Outcome {
        if self.check_eq(expected, actual, what) {
            Ok(())
        } else {
            Err(Abort::Failed)
        }
    }

    /// Whether anything has been recorded as a failure so far.
    pub fn failed(&self) -> bool {
        self.failed
    }

    // ------------------------------------------------------------------------
    // Skipping
    // ------------------------------------------------------------------------

    /// Ends the test as skipped.
    pub fn skip(&mut self) -> Abort {
        Abort::Skipped
    }

    /// Ends the test as skipped, with a reason for the report.
    pub fn skip_with_reason(&mut self, reason: impl Into<String>) -> Abort {
        self.skip_reason = Some(reason.into());
        Abort::Skipped
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.env.config.capabilities
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities().has(name)
    }

    /// Skips the rest of the test unless the test service has `name`.
    pub fn require_capability(&mut self, name: &str) -> Outcome {
        if self.has_capability(name) {
            Ok(())
        } else {
            Err(self.skip_with_reason(format!("test service does not have capability {:?}", name)))
        }
    }

    // ------------------------------------------------------------------------
    // Debug output and cleanup
    // ------------------------------------------------------------------------

    /// Writes a line to this scope's debug output.
    pub fn debug(&self, message: impl Display) {
        self.debug.log(message);
    }

    /// Handle to this scope's debug output, for components that log on their own.
    pub fn debug_logger(&self) -> DebugLogger {
        self.debug.clone()
    }

    /// Schedules `cleanup` to run when this scope exits for any reason.
    ///
    /// Cleanups run in reverse order of registration.
    pub fn defer(&mut self, cleanup: impl FnOnce() + 'static) {
        self.cleanups.push(Box::new(cleanup));
    }
}
