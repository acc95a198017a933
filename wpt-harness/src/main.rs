use clap::Args;
use clap::Parser;
use clap::Subcommand;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;
use wpt_harness::assert_all_expectations_have_tests;
use wpt_harness::collect_entries;
use wpt_harness::discover;
use wpt_harness::effective_parallelism;
use wpt_harness::report;
use wpt_harness::run_summary;
use wpt_harness::run_tests;
use wpt_harness::update_expectations;
use wpt_harness::wpt_report;
use wpt_harness::write_json_report;
use wpt_harness::DiscoverOptions;
use wpt_harness::Expectation;
use wpt_harness::Manifest;
use wpt_harness::Result;
use wpt_harness::RuntimeExecutor;
use wpt_harness::ScheduleOptions;
use wpt_harness::TestCaseResult;
use wpt_harness::TestResult;
use wpt_harness::TestToRun;
use wpt_harness::Timeouts;

const DEFAULT_BINARY: &str = "runtime-js";
const DEFAULT_MANIFEST: &str = "tests/wpt/manifest.json";
const DEFAULT_EXPECTATIONS: &str = "tests/wpt/expectation.json";

#[derive(Parser)]
#[command(author, version, about = "Web platform conformance-test orchestrator", long_about = None)]
struct Cli {
  /// Enable tracing output from the harness
  #[arg(long, global = true)]
  trace: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Check that the environment can run the suite
  Setup(SuiteArgs),

  /// Execute the suite against the baseline; exits 1 on any divergence
  Run(RunArgs),

  /// Re-run the suite and rewrite the baseline from the outcomes
  Update(RunArgs),
}

#[derive(Args)]
struct SuiteArgs {
  /// Runtime binary under test
  #[arg(long, default_value = DEFAULT_BINARY)]
  binary: PathBuf,

  /// Path to the suite catalogue
  #[arg(long, default_value = DEFAULT_MANIFEST)]
  manifest: PathBuf,

  /// Path to the expectation baseline
  #[arg(long, default_value = DEFAULT_EXPECTATIONS)]
  expectations: PathBuf,
}

#[derive(Args)]
struct RunArgs {
  #[command(flatten)]
  suite: SuiteArgs,

  /// Only run tests whose path starts with one of these prefixes
  #[arg(value_name = "FILTER")]
  filters: Vec<String>,

  /// Run tests marked `ignore` in the baseline
  #[arg(long)]
  run_ignored: bool,

  /// Suppress per-file `ok` lines
  #[arg(long)]
  quiet: bool,

  /// Number of worker threads (default: available cores)
  #[arg(long)]
  jobs: Option<usize>,

  /// Write a machine-readable run summary to this path
  #[arg(long, value_name = "PATH")]
  json: Option<PathBuf>,

  /// Write a WPT-report-shaped JSON file to this path
  #[arg(long, value_name = "PATH")]
  wptreport: Option<PathBuf>,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.trace);

  let outcome = match cli.command {
    Commands::Setup(args) => setup(&args),
    Commands::Run(args) => run(&args),
    Commands::Update(args) => update(&args),
  };

  match outcome {
    Ok(code) => code,
    Err(err) => print_error(err),
  }
}

fn setup(args: &SuiteArgs) -> Result<ExitCode> {
  let mut ok = true;

  let executor = RuntimeExecutor::new(args.binary.clone());
  if executor.available() {
    println!("ok runtime binary {}", args.binary.display());
  } else {
    println!("MISSING runtime binary {}", args.binary.display());
    ok = false;
  }

  match Manifest::load(&args.manifest) {
    Ok(manifest) => println!(
      "ok catalogue {} ({} top-level suites)",
      args.manifest.display(),
      manifest.root.len()
    ),
    Err(err) => {
      println!("BAD catalogue {}: {err}", args.manifest.display());
      ok = false;
    }
  }

  match Expectation::load(&args.expectations) {
    Ok(_) => println!("ok baseline {}", args.expectations.display()),
    Err(err) => {
      println!("BAD baseline {}: {err}", args.expectations.display());
      ok = false;
    }
  }

  Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
}

fn run(args: &RunArgs) -> Result<ExitCode> {
  let expectations = Expectation::load(&args.suite.expectations)?;
  let time_start = report::unix_millis();
  let results = execute(args, &expectations)?;
  let time_end = report::unix_millis();

  let (entries, totals) = collect_entries(results);
  for entry in &entries {
    report::print_file_line(entry, args.quiet);
  }
  report::print_summary(&entries, &totals);

  write_reports(args, &entries, &totals, time_start, time_end)?;

  Ok(if totals.run_failed() {
    ExitCode::from(1)
  } else {
    ExitCode::SUCCESS
  })
}

fn update(args: &RunArgs) -> Result<ExitCode> {
  let mut expectations = Expectation::load(&args.suite.expectations)?;
  let time_start = report::unix_millis();
  let results = execute(args, &expectations)?;
  let time_end = report::unix_millis();

  update_expectations(&mut expectations, &results);
  expectations.save(&args.suite.expectations)?;

  let (entries, totals) = collect_entries(results);
  for entry in &entries {
    report::print_file_line(entry, args.quiet);
  }
  report::print_summary(&entries, &totals);
  println!("updated {}", args.suite.expectations.display());

  write_reports(args, &entries, &totals, time_start, time_end)?;

  Ok(ExitCode::SUCCESS)
}

fn execute(args: &RunArgs, expectations: &Expectation) -> Result<Vec<(TestToRun, TestResult)>> {
  let manifest = Manifest::load(&args.suite.manifest)?;
  let discover_options = DiscoverOptions {
    filters: args.filters.clone(),
    run_ignored: args.run_ignored,
  };
  let tests = discover(&manifest, expectations, &discover_options)?;

  let discovered: HashSet<String> = tests.iter().map(|test| test.path.clone()).collect();
  assert_all_expectations_have_tests(expectations, &discovered, &args.filters, args.run_ignored)?;

  let parallelism = args
    .jobs
    .unwrap_or_else(|| effective_parallelism(tests.len()))
    .max(1);
  let options = ScheduleOptions {
    parallelism,
    timeouts: Timeouts::from_environment(),
  };
  let executor = RuntimeExecutor::new(args.suite.binary.clone());
  info!(tests = tests.len(), parallelism, "starting run");

  // Live per-case lines are only readable when a single worker runs.
  let quiet = args.quiet;
  let live = move |test: &TestToRun, case: &TestCaseResult| {
    if !case.passed || !quiet {
      report::print_live_case(test, case);
    }
  };
  let silent = |_: &TestToRun, _: &TestCaseResult| {};
  let progress: &(dyn Fn(&TestToRun, &TestCaseResult) + Sync) =
    if parallelism == 1 { &live } else { &silent };

  run_tests(tests, &executor, &options, progress)
}

fn write_reports(
  args: &RunArgs,
  entries: &[report::ReportEntry],
  totals: &wpt_harness::RunTotals,
  time_start: u64,
  time_end: u64,
) -> Result<()> {
  if let Some(path) = &args.json {
    write_json_report(path, &run_summary(entries, totals))?;
  }
  if let Some(path) = &args.wptreport {
    let product = args
      .suite
      .binary
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| "unknown".to_string());
    write_json_report(path, &wpt_report(entries, &product, time_start, time_end))?;
  }
  Ok(())
}

fn print_error(err: impl std::fmt::Display) -> ExitCode {
  eprintln!("error: {err}");
  ExitCode::from(1)
}

fn init_tracing(enable: bool) {
  if !enable {
    return;
  }

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr);
  if let Err(err) = builder.try_init() {
    eprintln!("failed to install tracing subscriber: {err}");
  }
}
