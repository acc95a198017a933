use crate::analyze::analyze;
use crate::analyze::FileAnalysis;
use crate::analyze::FileStatus;
use crate::analyze::RunTotals;
use crate::manifest::TestToRun;
use crate::runtime::TestCaseResult;
use crate::runtime::TestResult;
use crate::HarnessError;
use crate::Result;
use serde::Serialize;
use std::env;
use std::fs;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Message reported when the runtime exited cleanly without a harness status.
pub const EVENT_LOOP_EXHAUSTED: &str = "the event loop ran out of tasks during the test";

pub struct ReportEntry {
  pub test: TestToRun,
  pub result: TestResult,
  pub analysis: FileAnalysis,
}

/// Classifies raw results and sorts them by path so every report downstream
/// is deterministic regardless of bucket completion order.
pub fn collect_entries(results: Vec<(TestToRun, TestResult)>) -> (Vec<ReportEntry>, RunTotals) {
  let mut entries: Vec<ReportEntry> = results
    .into_iter()
    .map(|(test, result)| {
      let analysis = analyze(&result, &test.expectation);
      ReportEntry {
        test,
        result,
        analysis,
      }
    })
    .collect();
  entries.sort_by(|a, b| a.test.path.cmp(&b.test.path));

  let mut totals = RunTotals::default();
  for entry in &entries {
    totals.add(&entry.analysis);
  }
  (entries, totals)
}

/// Overall message for a file: harness message, else trimmed stderr, else
/// the fixed exhausted-event-loop string for a clean exit with no harness
/// status.
pub fn overall_message(result: &TestResult) -> String {
  if let Some(harness) = &result.harness_status {
    if let Some(message) = &harness.message {
      return message.clone();
    }
  }
  let stderr = result.stderr.trim();
  if !stderr.is_empty() {
    return stderr.to_string();
  }
  if result.status == 0 && result.harness_status.is_none() {
    return EVENT_LOOP_EXHAUSTED.to_string();
  }
  format!("runtime exited with status {}", result.status)
}

pub fn print_live_case(test: &TestToRun, case: &TestCaseResult) {
  let verdict = if case.passed { "ok" } else { "FAIL" };
  println!("{verdict} {} ({})", case.name, test.path);
}

pub fn print_file_line(entry: &ReportEntry, quiet: bool) {
  let analysis = &entry.analysis;
  let path = &entry.test.path;

  if !analysis.file_failed() {
    if !quiet {
      println!("ok {path} ({})", case_counts(analysis));
    }
    return;
  }

  println!("{} {path} ({})", analysis.status, case_counts(analysis));
  for name in &analysis.failing_cases {
    println!("  failed: {name}");
  }
  for name in &analysis.expected_failed_but_passed {
    println!("  expected failure but passed: {name}");
  }
  if matches!(analysis.status, FileStatus::Crash | FileStatus::Error) {
    println!("  {}", overall_message(&entry.result));
  }
}

fn case_counts(analysis: &FileAnalysis) -> String {
  format!(
    "{} passed, {} failed, {} expected failed, {} total",
    analysis.passed_count,
    analysis.failed_count,
    analysis.expected_failed_count,
    analysis.total_count
  )
}

pub fn print_summary(entries: &[ReportEntry], totals: &RunTotals) {
  let mut failing_cases: Vec<String> = Vec::new();
  let mut failing_files: Vec<&str> = Vec::new();
  for entry in entries {
    for name in &entry.analysis.failing_cases {
      failing_cases.push(format!("{}: {name}", entry.test.path));
    }
    if !entry.analysis.file_failed() {
      continue;
    }
    let fully_failed = matches!(
      entry.analysis.status,
      FileStatus::Crash | FileStatus::Error
    ) || (entry.analysis.total_count > 0
      && entry.analysis.failed_count == entry.analysis.total_count);
    if fully_failed {
      failing_files.push(&entry.test.path);
    }
  }

  println!();
  if !failing_cases.is_empty() {
    println!("failing cases:");
    for line in &failing_cases {
      println!("  {line}");
    }
  }
  if !failing_files.is_empty() {
    println!("failing files:");
    for path in &failing_files {
      println!("  {path}");
    }
  }
  println!(
    "{} cases: {} passed, {} failed, {} expected failures ({} files, {} failed)",
    totals.cases,
    totals.passed_cases,
    totals.failed_cases,
    totals.expected_failed_cases,
    totals.files,
    totals.failed_files
  );
}

/// Machine-readable run summary written behind `--json`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
  pub total: usize,
  pub passed: usize,
  pub failed: usize,
  pub expected_failed: usize,
  pub files: usize,
  pub failed_files: usize,
  pub results: Vec<FileSummary>,
}

#[derive(Debug, Serialize)]
pub struct FileSummary {
  pub path: String,
  pub status: FileStatus,
  pub message: Option<String>,
  pub passed: usize,
  pub failed: usize,
  pub expected_failed: usize,
  pub total: usize,
  pub expected_failure: bool,
}

pub fn run_summary(entries: &[ReportEntry], totals: &RunTotals) -> RunSummary {
  let results = entries
    .iter()
    .map(|entry| FileSummary {
      path: entry.test.path.clone(),
      status: entry.analysis.status,
      message: entry
        .analysis
        .file_failed()
        .then(|| overall_message(&entry.result)),
      passed: entry.analysis.passed_count,
      failed: entry.analysis.failed_count,
      expected_failed: entry.analysis.expected_failed_count,
      total: entry.analysis.total_count,
      expected_failure: entry.analysis.expected_failure,
    })
    .collect();

  RunSummary {
    total: totals.cases,
    passed: totals.passed_cases,
    failed: totals.failed_cases,
    expected_failed: totals.expected_failed_cases,
    files: totals.files,
    failed_files: totals.failed_files,
    results,
  }
}

/// WPT-report-shaped JSON written behind `--wptreport`.
#[derive(Debug, Serialize)]
pub struct WptReport {
  pub run_info: RunInfo,
  pub time_start: u64,
  pub time_end: u64,
  pub results: Vec<WptResult>,
}

#[derive(Debug, Serialize)]
pub struct RunInfo {
  pub product: String,
  pub os: String,
  pub processor: String,
}

#[derive(Debug, Serialize)]
pub struct WptResult {
  pub test: String,
  pub subtests: Vec<WptSubtest>,
  pub status: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  pub duration: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expected: Option<String>,
  pub known_intermittent: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WptSubtest {
  pub name: String,
  pub status: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expected: Option<String>,
  pub known_intermittent: Vec<String>,
}

pub fn wpt_report(
  entries: &[ReportEntry],
  product: &str,
  time_start: u64,
  time_end: u64,
) -> WptReport {
  let results = entries
    .iter()
    .map(|entry| {
      let subtests = entry
        .result
        .cases
        .iter()
        .map(|case| {
          let expect_fail = entry.test.expectation.expects_case_failure(&case.name);
          // `expected` is present only when the outcome diverged.
          let expected = match (case.passed, expect_fail) {
            (true, true) => Some("FAIL".to_string()),
            (false, false) => Some("PASS".to_string()),
            _ => None,
          };
          WptSubtest {
            name: case.name.clone(),
            status: if case.passed { "PASS" } else { "FAIL" }.to_string(),
            message: case.message.clone(),
            expected,
            known_intermittent: Vec::new(),
          }
        })
        .collect();

      WptResult {
        test: entry.test.path.clone(),
        subtests,
        status: entry.analysis.status.to_string(),
        message: (entry.analysis.status != FileStatus::Ok)
          .then(|| overall_message(&entry.result)),
        duration: entry.result.duration_ms,
        expected: entry.analysis.file_failed().then(|| "OK".to_string()),
        known_intermittent: Vec::new(),
      }
    })
    .collect();

  WptReport {
    run_info: RunInfo {
      product: product.to_string(),
      os: env::consts::OS.to_string(),
      processor: env::consts::ARCH.to_string(),
    },
    time_start,
    time_end,
    results,
  }
}

/// Writes a pretty, deterministic JSON report with a trailing newline,
/// creating parent directories as needed.
pub fn write_json_report<T: Serialize>(path: &Path, report: &T) -> Result<()> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent)?;
    }
  }
  let file = fs::File::create(path)?;
  let mut writer = BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, report).map_err(|source| HarnessError::Json {
    path: path.display().to_string(),
    source,
  })?;
  writeln!(&mut writer)?;
  writer.flush()?;
  Ok(())
}

pub fn unix_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as u64)
    .unwrap_or(0)
}
