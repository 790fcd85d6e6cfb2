use std::fmt;

/// Hierarchical test name. Rendered as the slash-joined path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TestId(Vec<String>);

impl TestId {
    /// The unnamed id of the top-level scope.
    pub fn root() -> Self {
        Self::default()
    }

    /// A child id with one more path segment.
    pub fn plus(&self, name: &str) -> Self {
        let mut path = self.0.clone();
        path.push(name.to_string());
        Self(path)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Terminal state of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one scope, appended once when the scope finishes.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub id: TestId,
    pub errors: Vec<String>,
    pub failed: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

impl TestResult {
    pub fn status(&self) -> TestStatus {
        if self.failed || !self.errors.is_empty() {
            TestStatus::Failed
        } else if self.skipped {
            TestStatus::Skipped
        } else {
            TestStatus::Passed
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default)]
pub struct Results {
    pub tests: Vec<TestResult>,
    pub failures: Vec<TestResult>,
}

impl Results {
    /// True when nothing failed.
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, result: TestResult) {
        if result.status() == TestStatus::Failed {
            self.failures.push(result.clone());
        }
        self.tests.push(result);
    }

    pub fn find(&self, id: &str) -> Option<&TestResult> {
        self.tests.iter().find(|r| r.id.to_string() == id)
    }

    pub fn passed_count(&self) -> usize {
        self.count(TestStatus::Passed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(TestStatus::Skipped)
    }

    fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|r| r.status() == status).count()
    }
}
