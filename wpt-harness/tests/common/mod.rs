use std::collections::HashMap;
use std::time::Duration;
use wpt_harness::HarnessStatus;
use wpt_harness::Result;
use wpt_harness::TestCaseResult;
use wpt_harness::TestExecutor;
use wpt_harness::TestResult;
use wpt_harness::TestToRun;

/// Executor backed by canned results, keyed by test path. Paths without a
/// canned result crash, so a test exercising discovery cannot silently pass.
pub struct StubExecutor {
  results: HashMap<String, TestResult>,
}

impl StubExecutor {
  pub fn new(results: impl IntoIterator<Item = (&'static str, TestResult)>) -> StubExecutor {
    StubExecutor {
      results: results
        .into_iter()
        .map(|(path, result)| (path.to_string(), result))
        .collect(),
    }
  }
}

impl TestExecutor for StubExecutor {
  fn run_single_test(
    &self,
    test: &TestToRun,
    _timeout: Duration,
    progress: &(dyn Fn(&TestCaseResult) + Sync),
  ) -> Result<TestResult> {
    let result = self
      .results
      .get(&test.path)
      .cloned()
      .unwrap_or_else(|| crash(86));
    for case in &result.cases {
      progress(case);
    }
    Ok(result)
  }
}

pub fn case(name: &str, passed: bool) -> TestCaseResult {
  TestCaseResult {
    name: name.to_string(),
    passed,
    status: if passed { 0 } else { 1 },
    message: None,
    stack: None,
  }
}

pub fn finished(cases: Vec<TestCaseResult>) -> TestResult {
  TestResult {
    status: 0,
    harness_status: Some(HarnessStatus {
      status: 0,
      message: None,
    }),
    cases,
    stderr: String::new(),
    duration_ms: 3,
  }
}

pub fn crash(status: i32) -> TestResult {
  TestResult {
    status,
    harness_status: None,
    cases: Vec::new(),
    stderr: String::new(),
    duration_ms: 3,
  }
}
