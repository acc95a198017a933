use crate::manifest::TestToRun;
use crate::HarnessError;
use crate::Result;
use serde::Deserialize;
use serde::Serialize;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;
use tracing::warn;

/// Env var carrying the variation options to the runner process.
pub const OPTIONS_ENV: &str = "WPT_HARNESS_OPTIONS";

/// Harness status reported for a test file that exceeded its deadline.
pub const HARNESS_TIMEOUT: i64 = 2;

/// One named assertion inside a test file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseResult {
  pub name: String,
  pub passed: bool,
  pub status: i64,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub stack: Option<String>,
}

/// Summary the harness inside the runtime reports once a file finishes,
/// distinct from the runtime's own process exit status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessStatus {
  pub status: i64,
  #[serde(default)]
  pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
  /// Process exit status of the runtime under test; 0 is a clean exit.
  pub status: i32,
  /// `None` with a clean exit means the event loop ran out of tasks before
  /// the harness reported.
  pub harness_status: Option<HarnessStatus>,
  pub cases: Vec<TestCaseResult>,
  pub stderr: String,
  pub duration_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RunnerMessage {
  Case(TestCaseResult),
  Harness(HarnessStatus),
}

/// The single-test execution collaborator. A timeout is a terminal but
/// normal outcome of one test, surfaced as an ordinary `TestResult`; an
/// `Err` means the runtime could not be driven at all.
pub trait TestExecutor: Sync {
  fn run_single_test(
    &self,
    test: &TestToRun,
    timeout: Duration,
    progress: &(dyn Fn(&TestCaseResult) + Sync),
  ) -> Result<TestResult>;
}

/// Drives one test file through the runtime under test.
///
/// The runtime is invoked as `<binary> run <url>` with the variation options
/// in [`OPTIONS_ENV`], and is expected to emit one JSON message per line on
/// stdout: `{"kind":"case",...}` per finished subtest and a final
/// `{"kind":"harness",...}` once the harness reports.
#[derive(Debug, Clone)]
pub struct RuntimeExecutor {
  binary: PathBuf,
}

impl RuntimeExecutor {
  pub fn new(binary: PathBuf) -> Self {
    Self { binary }
  }

  /// Probes whether the runtime binary can be spawned at all.
  pub fn available(&self) -> bool {
    Command::new(&self.binary)
      .arg("--version")
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .status()
      .map(|status| status.success())
      .unwrap_or(false)
  }
}

impl TestExecutor for RuntimeExecutor {
  fn run_single_test(
    &self,
    test: &TestToRun,
    timeout: Duration,
    progress: &(dyn Fn(&TestCaseResult) + Sync),
  ) -> Result<TestResult> {
    let start = Instant::now();

    let mut command = Command::new(&self.binary);
    command
      .arg("run")
      .arg(test.url.as_str())
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if !test.options.is_empty() {
      let options = serde_json::to_string(&test.options).map_err(|err| {
        HarnessError::Runtime(format!("encode options for {}: {err}", test.path))
      })?;
      command.env(OPTIONS_ENV, options);
    }

    let mut child = command.spawn().map_err(|err| {
      HarnessError::Runtime(format!("spawn {}: {err}", self.binary.display()))
    })?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| HarnessError::Runtime("runtime stdout was not captured".to_string()))?;
    let mut stderr = child
      .stderr
      .take()
      .ok_or_else(|| HarnessError::Runtime("runtime stderr was not captured".to_string()))?;

    let child = Arc::new(Mutex::new(child));
    let watchdog = Watchdog::arm(Arc::clone(&child), timeout, &test.path);

    let stderr_reader = std::thread::spawn(move || {
      let mut buffered = String::new();
      stderr.read_to_string(&mut buffered).ok();
      buffered
    });

    let mut cases = Vec::new();
    let mut harness_status = None;
    for line in BufReader::new(stdout).lines() {
      // A kill mid-line surfaces as a read error; treat it as end of stream.
      let Ok(line) = line else { break };
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<RunnerMessage>(&line) {
        Ok(RunnerMessage::Case(case)) => {
          progress(&case);
          cases.push(case);
        }
        Ok(RunnerMessage::Harness(status)) => harness_status = Some(status),
        // Anything else on stdout is runtime noise, not a protocol message.
        Err(_) => {}
      }
    }

    // A child may close stdout and keep running; poll instead of holding the
    // lock across a blocking wait so the watchdog can still kill it.
    let exit = loop {
      if let Some(status) = child.lock().unwrap().try_wait()? {
        break status;
      }
      std::thread::sleep(Duration::from_millis(25));
    };
    let timed_out = watchdog.disarm();
    let stderr = stderr_reader.join().unwrap_or_default();
    let duration_ms = start.elapsed().as_millis() as u64;

    let status = match exit.code() {
      Some(code) => code,
      // Killed by a signal, including the watchdog.
      None => 1,
    };

    if timed_out {
      warn!(path = %test.path, "test exceeded its deadline and was killed");
      return Ok(TestResult {
        status: if status == 0 { 1 } else { status },
        harness_status: Some(HarnessStatus {
          status: HARNESS_TIMEOUT,
          message: Some(format!("test timed out after {}s", timeout.as_secs())),
        }),
        cases,
        stderr,
        duration_ms,
      });
    }

    Ok(TestResult {
      status,
      harness_status,
      cases,
      stderr,
      duration_ms,
    })
  }
}

/// Kills the child once the deadline passes, unless disarmed first.
struct Watchdog {
  finished: Arc<(Mutex<bool>, Condvar)>,
  timed_out: Arc<AtomicBool>,
  handle: Option<std::thread::JoinHandle<()>>,
}

impl Watchdog {
  fn arm(child: Arc<Mutex<Child>>, timeout: Duration, path: &str) -> Watchdog {
    let finished = Arc::new((Mutex::new(false), Condvar::new()));
    let timed_out = Arc::new(AtomicBool::new(false));
    let thread_finished = Arc::clone(&finished);
    let thread_timed_out = Arc::clone(&timed_out);
    let path = path.to_string();

    let handle = std::thread::spawn(move || {
      let (lock, cv) = &*thread_finished;
      let deadline = Instant::now() + timeout;
      let mut done = lock.lock().unwrap();
      while !*done {
        let now = Instant::now();
        if now >= deadline {
          thread_timed_out.store(true, Ordering::Relaxed);
          if let Err(err) = child.lock().unwrap().kill() {
            warn!(%path, "failed to kill timed-out runtime: {err}");
          }
          return;
        }
        let (next, _) = cv.wait_timeout(done, deadline - now).unwrap();
        done = next;
      }
    });

    Watchdog {
      finished,
      timed_out,
      handle: Some(handle),
    }
  }

  fn disarm(mut self) -> bool {
    {
      let (lock, cv) = &*self.finished;
      *lock.lock().unwrap() = true;
      cv.notify_one();
    }
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
    self.timed_out.load(Ordering::Relaxed)
  }
}
