use std::sync::Arc;

use parking_lot::Mutex;
use ssecheck_core::logging::CapturedOutput;
use ssecheck_core::scope::{RegexFilters, EXCLUDED_BY_FILTER};
use ssecheck_core::{
    run_tests, Capabilities, Outcome, Results, TestConfiguration, TestId, TestLogger, TestScope, TestStatus,
};

/// Test logger that records every call as a line of text.
#[derive(Clone, Default)]
struct RecordingLogger(Arc<Mutex<Vec<String>>>);

impl RecordingLogger {
    fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl TestLogger for RecordingLogger {
    fn test_started(&self, id: &TestId) {
        self.0.lock().push(format!("start {}", id));
    }
    fn test_error(&self, id: &TestId, message: &str) {
        self.0.lock().push(format!("error {}: {}", id, message));
    }
    fn test_finished(&self, id: &TestId, failed: bool, debug_output: &CapturedOutput) {
        self.0
            .lock()
            .push(format!("finish {} failed={} debug={}", id, failed, debug_output.len()));
    }
    fn test_skipped(&self, id: &TestId, reason: Option<&str>) {
        self.0.lock().push(format!("skip {} {:?}", id, reason));
    }
}

fn run(body: impl FnOnce(&mut TestScope) -> Outcome) -> Results {
    run_tests(TestConfiguration::default(), body)
}

fn status_of(results: &Results, id: &str) -> TestStatus {
    results.find(id).unwrap_or_else(|| panic!("no result for {}", id)).status()
}

#[test]
fn test_pass_fail_skip() {
    let results = run(|t| {
        t.run("passes", |_| Ok(()));
        t.run("fails", |t| Err(t.fail("bad value")));
        t.run("skips", |t| Err(t.skip_with_reason("not today")));
        Ok(())
    });

    assert_eq!(results.tests.len(), 3);
    assert_eq!(status_of(&results, "passes"), TestStatus::Passed);
    assert_eq!(status_of(&results, "fails"), TestStatus::Failed);
    assert_eq!(status_of(&results, "skips"), TestStatus::Skipped);
    assert_eq!(results.failures.len(), 1);
    assert_eq!(results.failures[0].errors, vec!["bad value"]);
    assert_eq!(
        results.find("skips").unwrap().skip_reason.as_deref(),
        Some("not today")
    );
}

#[test]
fn test_run_returns_status() {
    let mut statuses = Vec::new();
    run(|t| {
        statuses.push(t.run("a", |_| Ok(())));
        statuses.push(t.run("b", |t| Err(t.fail_now())));
        statuses.push(t.run("c", |t| Err(t.skip())));
        Ok(())
    });
    assert_eq!(
        statuses,
        vec![TestStatus::Passed, TestStatus::Failed, TestStatus::Skipped]
    );
}

#[test]
fn test_nested_ids() {
    let results = run(|t| {
        t.run("outer", |t| {
            t.run("inner", |t| {
                assert_eq!(t.id().to_string(), "outer/inner");
                Ok(())
            });
            Ok(())
        });
        Ok(())
    });

    let ids: Vec<String> = results.tests.iter().map(|r| r.id.to_string()).collect();
    assert_eq!(ids, vec!["outer/inner", "outer"]);
}

#[test]
fn test_non_fatal_errors_keep_running() {
    let mut reached_end = false;
    let results = run(|t| {
        t.run("checks", |t| {
            t.check(false, "first problem");
            t.check_eq(&1, &2, "count");
            reached_end = true;
            Ok(())
        });
        Ok(())
    });

    assert!(reached_end);
    let result = results.find("checks").unwrap();
    assert_eq!(result.status(), TestStatus::Failed);
    assert_eq!(result.errors, vec!["first problem", "count: expected 1, got 2"]);
}

#[test]
fn test_abort_without_message() {
    let results = run(|t| {
        t.run("silent", |t| Err(t.fail_now()));
        Ok(())
    });
    assert_eq!(
        results.find("silent").unwrap().errors,
        vec!["test failed with no failure message"]
    );
}

#[test]
fn test_fail_now_then_normal_return_is_failed() {
    let mut status = TestStatus::Passed;
    let results = run(|t| {
        status = t.run("flagged", |t| {
            let _ = t.fail_now();
            Ok(())
        });
        Ok(())
    });

    assert_eq!(status, TestStatus::Failed);
    let result = results.find("flagged").unwrap();
    assert!(result.failed);
    assert_eq!(result.status(), TestStatus::Failed);
    assert_eq!(results.failures.len(), 1);
    assert!(!results.ok());
}

#[test]
fn test_failure_wins_over_skip() {
    let results = run(|t| {
        t.run("both", |t| {
            t.error("something broke");
            Err(t.skip())
        });
        Ok(())
    });
    assert_eq!(status_of(&results, "both"), TestStatus::Failed);
}

#[test]
fn test_cleanups_run_in_reverse_order() {
    for outcome in ["pass", "fail", "skip", "panic"] {
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        run(move |t| {
            t.run(outcome, move |t| {
                for name in ["A", "B", "C"] {
                    let o = Arc::clone(&o);
                    t.defer(move || o.lock().push(name));
                }
                match outcome {
                    "pass" => Ok(()),
                    "fail" => Err(t.fail("failed")),
                    "skip" => Err(t.skip()),
                    _ => panic!("unexpected"),
                }
            });
            Ok(())
        });
        assert_eq!(*order.lock(), vec!["C", "B", "A"], "when the test did {}", outcome);
    }
}

#[test]
fn test_panicking_cleanup_fails_scope_and_others_still_run() {
    let ran = Arc::new(Mutex::new(Vec::new()));
    let r = Arc::clone(&ran);
    let results = run(move |t| {
        t.run("cleanup panics", move |t| {
            let first = Arc::clone(&r);
            t.defer(move || first.lock().push("first"));
            t.defer(|| panic!("cleanup went wrong"));
            Ok(())
        });
        Ok(())
    });

    assert_eq!(*ran.lock(), vec!["first"]);
    let result = results.find("cleanup panics").unwrap();
    assert_eq!(result.status(), TestStatus::Failed);
    assert!(result.errors[0].contains("cleanup went wrong"));
}

#[test]
fn test_panic_is_contained() {
    let results = run(|t| {
        t.run("panics", |t| {
            let v: Vec<u8> = Vec::new();
            let value = v[3];
            t.check_eq(&0, &value, "value");
            Ok(())
        });
        t.run("still runs", |_| Ok(()));
        Ok(())
    });

    let result = results.find("panics").unwrap();
    assert_eq!(result.status(), TestStatus::Failed);
    assert!(result.errors[0].starts_with("unexpected panic in test:"));
    assert!(result.errors[0].contains("index out of bounds"));
    assert_eq!(status_of(&results, "still runs"), TestStatus::Passed);
}

#[test]
fn test_require_capability() {
    let cleaned_up = Arc::new(Mutex::new(false));
    let c = Arc::clone(&cleaned_up);
    let mut reached_end = false;

    let config = TestConfiguration {
        capabilities: ["comments"].into_iter().collect::<Capabilities>(),
        ..Default::default()
    };
    let results = run_tests(config, |t| {
        t.run("has it", |t| t.require_capability("comments"));
        t.run("lacks it", |t| {
            t.defer(move || *c.lock() = true);
            t.require_capability("restart")?;
            reached_end = true;
            Ok(())
        });
        Ok(())
    });

    assert!(!reached_end);
    assert!(*cleaned_up.lock());
    assert_eq!(status_of(&results, "has it"), TestStatus::Passed);
    let lacking = results.find("lacks it").unwrap();
    assert_eq!(lacking.status(), TestStatus::Skipped);
    assert!(lacking.skip_reason.as_deref().unwrap().contains("restart"));
}

#[test]
fn test_filter_excludes_without_running() {
    let filters = RegexFilters::new(&["^group/keep".to_string()], &[]).unwrap();
    let config = TestConfiguration {
        filter: Some(filters.into_filter()),
        ..Default::default()
    };
    let mut ran = Vec::new();

    let results = run_tests(config, |t| {
        t.run("group", |t| {
            t.run("keep me", |_| {
                ran.push("keep me");
                Ok(())
            });
            t.run("drop me", |_| {
                ran.push("drop me");
                Ok(())
            });
            Ok(())
        });
        Ok(())
    });

    // "group" itself does not match the pattern, so nothing inside it runs either.
    assert!(ran.is_empty());
    let group = results.find("group").unwrap();
    assert_eq!(group.status(), TestStatus::Skipped);
    assert_eq!(group.skip_reason.as_deref(), Some(EXCLUDED_BY_FILTER));
}

#[test]
fn test_root_failure_is_recorded() {
    let results = run(|t| Err(t.fail("setup failed")));
    assert_eq!(results.failures.len(), 1);
    assert!(results.failures[0].id.is_root());

    let results = run(|_| Ok(()));
    assert!(results.tests.is_empty());
    assert!(results.ok());
}

#[test]
fn test_logger_sees_lifecycle() {
    let logger = RecordingLogger::default();
    let config = TestConfiguration {
        test_logger: Box::new(logger.clone()),
        ..Default::default()
    };

    run_tests(config, |t| {
        t.run("good", |t| {
            t.debug("some detail");
            Ok(())
        });
        t.run("bad", |t| Err(t.fail("oops")));
        t.run("lazy", |t| Err(t.skip_with_reason("later")));
        Ok(())
    });

    assert_eq!(
        logger.lines(),
        vec![
            "start good",
            "finish good failed=false debug=1",
            "start bad",
            "error bad: oops",
            "finish bad failed=true debug=0",
            "start lazy",
            "skip lazy Some(\"later\")",
        ]
    );
}

#[test]
fn test_require_converts_errors() {
    let results = run(|t| {
        t.run("require", |t| {
            let n: u32 = t.require("12".parse::<u32>())?;
            t.require_eq(&12, &n, "parsed")?;
            let _: u32 = t.require("x".parse::<u32>())?;
            unreachable!("require should have ended the test");
        });
        Ok(())
    });
    let result = results.find("require").unwrap();
    assert_eq!(result.status(), TestStatus::Failed);
    assert_eq!(result.errors, vec!["invalid digit found in string"]);
}
