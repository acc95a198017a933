use crate::manifest::TestToRun;
use crate::runtime::TestCaseResult;
use crate::runtime::TestExecutor;
use crate::runtime::TestResult;
use crate::HarnessError;
use crate::Result;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::env;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Deadline for a test not marked long-running.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);
/// Deadline for long-running tests, and for every test under CI.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(240);

/// Tests sharing a top-level suite directory, scheduled as one unit.
#[derive(Debug, Clone)]
pub struct Bucket {
  pub key: String,
  pub tests: Vec<TestToRun>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
  pub default: Duration,
  pub long: Duration,
}

impl Timeouts {
  /// Under CI both deadlines are raised to the long value.
  pub fn from_environment() -> Timeouts {
    if env::var_os("CI").is_some() {
      Timeouts {
        default: LONG_TIMEOUT,
        long: LONG_TIMEOUT,
      }
    } else {
      Timeouts {
        default: DEFAULT_TIMEOUT,
        long: LONG_TIMEOUT,
      }
    }
  }

  pub fn for_test(&self, test: &TestToRun) -> Duration {
    if test.long_timeout {
      self.long
    } else {
      self.default
    }
  }
}

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
  pub parallelism: usize,
  pub timeouts: Timeouts,
}

/// Groups tests by their leading path segment, preserving discovery order
/// within each bucket. Unrelated suites interfere when interleaved, so the
/// bucket, not the test, is the unit of concurrency.
pub fn partition(tests: Vec<TestToRun>) -> Vec<Bucket> {
  let mut buckets: Vec<Bucket> = Vec::new();
  let mut index: HashMap<String, usize> = HashMap::new();
  for test in tests {
    let key = leading_segment(&test.path).to_string();
    match index.get(&key) {
      Some(&slot) => buckets[slot].tests.push(test),
      None => {
        index.insert(key.clone(), buckets.len());
        buckets.push(Bucket {
          key,
          tests: vec![test],
        });
      }
    }
  }
  buckets
}

fn leading_segment(path: &str) -> &str {
  let trimmed = path.strip_prefix('/').unwrap_or(path);
  trimmed.split('/').next().unwrap_or(trimmed)
}

/// Worker width: one worker when there is nothing to parallelize or only one
/// core, else the hardware concurrency.
pub fn effective_parallelism(test_count: usize) -> usize {
  let cores = num_cpus::get();
  if test_count < 2 || cores < 2 {
    1
  } else {
    cores
  }
}

/// Drains buckets through a fixed-size worker pool. Within a bucket tests run
/// strictly sequentially in discovery order; append order across buckets is
/// undefined.
pub fn run_tests<E: TestExecutor>(
  tests: Vec<TestToRun>,
  executor: &E,
  options: &ScheduleOptions,
  progress: &(dyn Fn(&TestToRun, &TestCaseResult) + Sync),
) -> Result<Vec<(TestToRun, TestResult)>> {
  let total = tests.len();
  let parallelism = options.parallelism.max(1);
  let queue = Mutex::new(VecDeque::from(partition(tests)));
  let sink: Mutex<Vec<(TestToRun, TestResult)>> = Mutex::new(Vec::with_capacity(total));
  let failure: Mutex<Option<HarnessError>> = Mutex::new(None);

  std::thread::scope(|scope| {
    for _ in 0..parallelism {
      scope.spawn(|| loop {
        if failure.lock().unwrap().is_some() {
          return;
        }
        let Some(bucket) = queue.lock().unwrap().pop_front() else {
          return;
        };
        debug!(bucket = %bucket.key, tests = bucket.tests.len(), "bucket claimed");

        for test in bucket.tests {
          let timeout = options.timeouts.for_test(&test);
          let case_progress = |case: &TestCaseResult| progress(&test, case);
          match executor.run_single_test(&test, timeout, &case_progress) {
            Ok(result) => sink.lock().unwrap().push((test, result)),
            Err(err) => {
              let mut slot = failure.lock().unwrap();
              if slot.is_none() {
                *slot = Some(err);
              }
              return;
            }
          }
        }
      });
    }
  });

  if let Some(err) = failure.into_inner().unwrap() {
    return Err(err);
  }
  Ok(sink.into_inner().unwrap())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::expectation::FileExpectation;
  use crate::runtime::HarnessStatus;
  use std::collections::BTreeMap;
  use std::collections::HashSet;
  use url::Url;

  fn test_at(path: &str) -> TestToRun {
    TestToRun {
      path: path.to_string(),
      url: Url::parse("http://web-platform.test:8000/").unwrap(),
      options: BTreeMap::new(),
      expectation: FileExpectation::All(true),
      long_timeout: false,
    }
  }

  fn clean_result() -> TestResult {
    TestResult {
      status: 0,
      harness_status: Some(HarnessStatus {
        status: 0,
        message: None,
      }),
      cases: Vec::new(),
      stderr: String::new(),
      duration_ms: 1,
    }
  }

  struct EchoExecutor;

  impl TestExecutor for EchoExecutor {
    fn run_single_test(
      &self,
      _test: &TestToRun,
      _timeout: Duration,
      _progress: &(dyn Fn(&TestCaseResult) + Sync),
    ) -> Result<TestResult> {
      Ok(clean_result())
    }
  }

  #[test]
  fn partition_is_a_set_partition_of_the_input() {
    let paths = [
      "/a/one.html",
      "/b/two.html",
      "/a/three.html",
      "/c/four.html",
      "/b/five.html",
    ];
    let tests: Vec<TestToRun> = paths.iter().map(|p| test_at(p)).collect();

    let buckets = partition(tests);
    let keys: Vec<&str> = buckets.iter().map(|b| b.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);

    let mut seen = HashSet::new();
    for bucket in &buckets {
      for test in &bucket.tests {
        assert!(seen.insert(test.path.clone()), "{} appears twice", test.path);
        assert_eq!(leading_segment(&test.path), bucket.key);
      }
    }
    assert_eq!(seen.len(), paths.len());
  }

  #[test]
  fn partition_preserves_discovery_order_within_buckets() {
    let tests = vec![test_at("/a/1.html"), test_at("/b/1.html"), test_at("/a/2.html")];
    let buckets = partition(tests);
    let a_paths: Vec<&str> = buckets[0].tests.iter().map(|t| t.path.as_str()).collect();
    assert_eq!(a_paths, vec!["/a/1.html", "/a/2.html"]);
  }

  #[test]
  fn run_keeps_bucket_order_under_concurrency() {
    let tests = vec![
      test_at("/a/1.html"),
      test_at("/a/2.html"),
      test_at("/b/1.html"),
      test_at("/b/2.html"),
    ];
    let options = ScheduleOptions {
      parallelism: 2,
      timeouts: Timeouts {
        default: DEFAULT_TIMEOUT,
        long: LONG_TIMEOUT,
      },
    };

    let results = run_tests(tests, &EchoExecutor, &options, &|_, _| {}).unwrap();
    assert_eq!(results.len(), 4);

    for key in ["a", "b"] {
      let order: Vec<&str> = results
        .iter()
        .map(|(test, _)| test.path.as_str())
        .filter(|path| leading_segment(path) == key)
        .collect();
      assert_eq!(order, vec![format!("/{key}/1.html"), format!("/{key}/2.html")]);
    }
  }

  #[test]
  fn executor_errors_abort_the_run() {
    struct FailingExecutor;
    impl TestExecutor for FailingExecutor {
      fn run_single_test(
        &self,
        _test: &TestToRun,
        _timeout: Duration,
        _progress: &(dyn Fn(&TestCaseResult) + Sync),
      ) -> Result<TestResult> {
        Err(HarnessError::Runtime("boom".to_string()))
      }
    }

    let options = ScheduleOptions {
      parallelism: 2,
      timeouts: Timeouts {
        default: DEFAULT_TIMEOUT,
        long: LONG_TIMEOUT,
      },
    };
    let err = run_tests(vec![test_at("/a/1.html")], &FailingExecutor, &options, &|_, _| {})
      .unwrap_err();
    assert!(matches!(err, HarnessError::Runtime(_)));
  }

  #[test]
  fn long_running_tests_use_the_long_deadline() {
    let timeouts = Timeouts {
      default: DEFAULT_TIMEOUT,
      long: LONG_TIMEOUT,
    };
    let mut test = test_at("/a/slow.html");
    assert_eq!(timeouts.for_test(&test), DEFAULT_TIMEOUT);
    test.long_timeout = true;
    assert_eq!(timeouts.for_test(&test), LONG_TIMEOUT);
  }
}
