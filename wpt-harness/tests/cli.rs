use assert_cmd::Command;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tempfile::tempdir;

fn write_fixture_suite(root: &Path) -> (PathBuf, PathBuf) {
  let manifest = root.join("manifest.json");
  fs::write(
    &manifest,
    serde_json::to_string_pretty(&serde_json::json!({
      "a": ["meta", ["x.html", {}]],
    }))
    .unwrap(),
  )
  .unwrap();

  let expectations = root.join("expectation.json");
  fs::write(
    &expectations,
    serde_json::to_string_pretty(&serde_json::json!({
      "a": { "x.html": true },
    }))
    .unwrap(),
  )
  .unwrap();

  (manifest, expectations)
}

fn harness() -> Command {
  #[allow(deprecated)]
  Command::cargo_bin("wpt-harness").expect("binary")
}

#[test]
fn help_smoke() {
  harness().arg("--help").assert().success();
}

#[test]
fn setup_fails_when_catalogue_is_missing() {
  let dir = tempdir().unwrap();
  let missing = dir.path().join("nope.json");

  harness()
    .arg("setup")
    .arg("--manifest")
    .arg(&missing)
    .arg("--expectations")
    .arg(&missing)
    .assert()
    .failure();
}

#[cfg(unix)]
mod unix {
  use super::*;
  use std::os::unix::fs::PermissionsExt;

  fn write_runtime_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut permissions = fs::metadata(path).unwrap().permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).unwrap();
  }

  fn passing_runtime(root: &Path) -> PathBuf {
    let script = root.join("runtime.sh");
    write_runtime_script(
      &script,
      "#!/bin/sh\n\
       printf '%s\\n' '{\"kind\":\"case\",\"name\":\"case1\",\"passed\":true,\"status\":0}'\n\
       printf '%s\\n' '{\"kind\":\"harness\",\"status\":0,\"message\":null}'\n",
    );
    script
  }

  fn failing_runtime(root: &Path) -> PathBuf {
    let script = root.join("failing-runtime.sh");
    write_runtime_script(
      &script,
      "#!/bin/sh\n\
       printf '%s\\n' '{\"kind\":\"case\",\"name\":\"case1\",\"passed\":true,\"status\":0}'\n\
       printf '%s\\n' '{\"kind\":\"case\",\"name\":\"case2\",\"passed\":false,\"status\":1}'\n\
       printf '%s\\n' '{\"kind\":\"harness\",\"status\":0,\"message\":null}'\n",
    );
    script
  }

  #[test]
  fn setup_succeeds_with_fixture_suite() {
    let dir = tempdir().unwrap();
    let (manifest, expectations) = write_fixture_suite(dir.path());
    let runtime = passing_runtime(dir.path());

    harness()
      .arg("setup")
      .arg("--binary")
      .arg(&runtime)
      .arg("--manifest")
      .arg(&manifest)
      .arg("--expectations")
      .arg(&expectations)
      .assert()
      .success();
  }

  #[test]
  fn run_exits_clean_when_outcomes_match_the_baseline() {
    let dir = tempdir().unwrap();
    let (manifest, expectations) = write_fixture_suite(dir.path());
    let runtime = passing_runtime(dir.path());
    let summary = dir.path().join("summary.json");

    harness()
      .arg("run")
      .arg("--binary")
      .arg(&runtime)
      .arg("--manifest")
      .arg(&manifest)
      .arg("--expectations")
      .arg(&expectations)
      .arg("--json")
      .arg(&summary)
      .assert()
      .success();

    let report: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(report["total"], 1);
    assert_eq!(report["passed"], 1);
    assert_eq!(report["results"][0]["path"], "/a/x.html");
  }

  #[test]
  fn run_exits_nonzero_on_divergence() {
    let dir = tempdir().unwrap();
    let (manifest, expectations) = write_fixture_suite(dir.path());
    let runtime = failing_runtime(dir.path());
    let report = dir.path().join("wptreport.json");

    harness()
      .arg("run")
      .arg("--binary")
      .arg(&runtime)
      .arg("--manifest")
      .arg(&manifest)
      .arg("--expectations")
      .arg(&expectations)
      .arg("--wptreport")
      .arg(&report)
      .assert()
      .code(1);

    let report: serde_json::Value =
      serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(report["results"][0]["test"], "/a/x.html");
    assert_eq!(report["results"][0]["status"], "FAIL");
    assert_eq!(report["results"][0]["subtests"][1]["expected"], "PASS");
  }

  #[test]
  fn update_rewrites_the_baseline_and_is_idempotent() {
    let dir = tempdir().unwrap();
    let (manifest, expectations) = write_fixture_suite(dir.path());
    let runtime = failing_runtime(dir.path());

    let update = |harness: &mut Command| {
      harness
        .arg("update")
        .arg("--binary")
        .arg(&runtime)
        .arg("--manifest")
        .arg(&manifest)
        .arg("--expectations")
        .arg(&expectations)
        .assert()
        .success();
    };

    update(&mut harness());
    let first = fs::read_to_string(&expectations).unwrap();
    let baseline: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(baseline["a"]["x.html"], serde_json::json!(["case2"]));

    update(&mut harness());
    let second = fs::read_to_string(&expectations).unwrap();
    assert_eq!(first, second);
  }
}
