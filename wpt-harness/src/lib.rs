use std::io;
use thiserror::Error;

pub mod analyze;
pub mod expectation;
pub mod manifest;
pub mod report;
pub mod runtime;
pub mod schedule;
pub mod update;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("{path}: {source}")]
  Json {
    path: String,
    #[source]
    source: serde_json::Error,
  },
  #[error("invalid catalogue: {0}")]
  Manifest(String),
  #[error("expectation at {path} must be a boolean or an array of subtest names")]
  MalformedExpectation { path: String },
  #[error("baseline entries with no matching test:\n  {}", .0.join("\n  "))]
  OrphanExpectations(Vec<String>),
  #[error("runtime under test: {0}")]
  Runtime(String),
}

pub use analyze::analyze;
pub use analyze::FileAnalysis;
pub use analyze::FileStatus;
pub use analyze::RunTotals;
pub use expectation::assert_all_expectations_have_tests;
pub use expectation::Expectation;
pub use expectation::ExpectationNode;
pub use expectation::FileExpectation;
pub use manifest::discover;
pub use manifest::DiscoverOptions;
pub use manifest::Manifest;
pub use manifest::ManifestEntry;
pub use manifest::TestToRun;
pub use manifest::Variation;
pub use report::collect_entries;
pub use report::run_summary;
pub use report::wpt_report;
pub use report::write_json_report;
pub use report::ReportEntry;
pub use report::RunSummary;
pub use report::WptReport;
pub use runtime::HarnessStatus;
pub use runtime::RuntimeExecutor;
pub use runtime::TestCaseResult;
pub use runtime::TestExecutor;
pub use runtime::TestResult;
pub use schedule::effective_parallelism;
pub use schedule::partition;
pub use schedule::run_tests;
pub use schedule::Bucket;
pub use schedule::ScheduleOptions;
pub use schedule::Timeouts;
pub use update::update_expectations;
