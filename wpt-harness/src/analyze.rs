use crate::expectation::FileExpectation;
use crate::runtime::TestResult;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileStatus {
  Ok,
  Fail,
  Crash,
  Error,
}

impl fmt::Display for FileStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      FileStatus::Ok => "OK",
      FileStatus::Fail => "FAIL",
      FileStatus::Crash => "CRASH",
      FileStatus::Error => "ERROR",
    };
    f.write_str(name)
  }
}

/// Classification of one file's result against its recorded expectation.
#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysis {
  pub status: FileStatus,
  /// Cases that failed without a recorded failure expectation.
  pub failing_cases: Vec<String>,
  /// Cases recorded as failing that now pass; the baseline needs attention.
  pub expected_failed_but_passed: Vec<String>,
  pub passed_count: usize,
  pub failed_count: usize,
  pub expected_failed_count: usize,
  pub total_count: usize,
  /// A crash or error the baseline already records as a whole-file failure.
  pub expected_failure: bool,
}

impl FileAnalysis {
  /// Whether this file should fail the run.
  pub fn file_failed(&self) -> bool {
    match self.status {
      FileStatus::Crash | FileStatus::Error => !self.expected_failure,
      FileStatus::Ok | FileStatus::Fail => self.failed_count > 0,
    }
  }
}

/// Classifies every case of `result` against `expectation`.
///
/// `passed_count + failed_count + expected_failed_count == total_count`
/// always holds; `failed_count` folds in both genuine failures and recorded
/// failures that now pass.
pub fn analyze(result: &TestResult, expectation: &FileExpectation) -> FileAnalysis {
  let mut failing_cases = Vec::new();
  let mut expected_failed_but_passed = Vec::new();
  let mut passed_count = 0;
  let mut expected_failed_count = 0;

  for case in &result.cases {
    let expect_fail = expectation.expects_case_failure(&case.name);
    match (case.passed, expect_fail) {
      (true, false) => passed_count += 1,
      (true, true) => expected_failed_but_passed.push(case.name.clone()),
      (false, false) => failing_cases.push(case.name.clone()),
      (false, true) => expected_failed_count += 1,
    }
  }

  let failed_count = failing_cases.len() + expected_failed_but_passed.len();
  let total_count = result.cases.len();
  let crashed = result.status != 0 || result.harness_status.is_none();

  // A non-zero exit or a missing harness status makes the whole file a
  // crash/error regardless of any case data.
  let status = if result.status != 0 {
    FileStatus::Crash
  } else if result.harness_status.is_none() {
    FileStatus::Error
  } else if failed_count > 0 {
    FileStatus::Fail
  } else {
    FileStatus::Ok
  };

  let expected_failure = crashed && matches!(expectation, FileExpectation::All(false));

  FileAnalysis {
    status,
    failing_cases,
    expected_failed_but_passed,
    passed_count,
    failed_count,
    expected_failed_count,
    total_count,
    expected_failure,
  }
}

/// Run-wide aggregation over per-file analyses.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunTotals {
  pub files: usize,
  pub failed_files: usize,
  pub cases: usize,
  pub passed_cases: usize,
  pub failed_cases: usize,
  pub expected_failed_cases: usize,
}

impl RunTotals {
  pub fn add(&mut self, analysis: &FileAnalysis) {
    self.files += 1;
    self.cases += analysis.total_count;
    self.passed_cases += analysis.passed_count;
    self.failed_cases += analysis.failed_count;
    self.expected_failed_cases += analysis.expected_failed_count;
    if analysis.file_failed() {
      self.failed_files += 1;
    }
  }

  pub fn run_failed(&self) -> bool {
    self.failed_files > 0
  }
}
