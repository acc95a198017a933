use crate::expectation::matches_filters;
use crate::expectation::Expectation;
use crate::expectation::FileExpectation;
use crate::HarnessError;
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use url::Url;

/// Synthetic origin every variation path is resolved against.
pub const BASE_ORIGIN: &str = "http://web-platform.test:8000";

/// File kinds the orchestrator knows how to drive.
const RUNNABLE_SUFFIXES: &[&str] = &[".any.html", ".window.html", ".worker.html", ".html"];

/// Variations that need server capabilities the harness does not stand up.
const UNSUPPORTED_MARKERS: &[&str] = &[
  ".h2.",      // HTTP/2-only endpoints
  ".h3.",      // HTTP/3-only endpoints
  ".chunked.", // chunked request bodies
];

/// One level of the externally supplied test catalogue.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
  Folder(BTreeMap<String, ManifestEntry>),
  /// Concrete runnable renderings of one catalogue key. Slot 0 is catalogue
  /// metadata (a content digest) and is never run.
  Variations(Vec<Variation>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variation {
  pub path: Option<String>,
  pub options: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct Manifest {
  pub root: BTreeMap<String, ManifestEntry>,
}

/// A runnable test produced by discovery. Created once, immutable, consumed
/// exactly once by the scheduler.
#[derive(Debug, Clone)]
pub struct TestToRun {
  /// Canonical `/`-separated path, starting with `/`, including the query.
  pub path: String,
  /// Request target on the synthetic origin.
  pub url: Url,
  pub options: BTreeMap<String, Value>,
  pub expectation: FileExpectation,
  pub long_timeout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
  /// Path prefixes (minus the leading slash) to keep; empty keeps everything.
  pub filters: Vec<String>,
  /// Run tests whose baseline entry carries the `ignore` marker.
  pub run_ignored: bool,
}

impl ManifestEntry {
  fn from_value(value: &Value, path: &str) -> Result<ManifestEntry> {
    match value {
      Value::Object(members) => {
        let mut children = BTreeMap::new();
        for (key, child) in members {
          let child_path = format!("{path}/{key}");
          children.insert(key.clone(), ManifestEntry::from_value(child, &child_path)?);
        }
        Ok(ManifestEntry::Folder(children))
      }
      Value::Array(items) => {
        let mut variations = Vec::with_capacity(items.len());
        for item in items {
          variations.push(Variation::from_value(item, path)?);
        }
        Ok(ManifestEntry::Variations(variations))
      }
      _ => Err(HarnessError::Manifest(format!(
        "unsupported catalogue value at {path}"
      ))),
    }
  }
}

impl Variation {
  fn from_value(value: &Value, path: &str) -> Result<Variation> {
    match value {
      Value::String(raw) => Ok(Variation {
        path: Some(raw.clone()),
        options: BTreeMap::new(),
      }),
      Value::Null => Ok(Variation::default()),
      Value::Array(parts) => {
        let mut variation = Variation::default();
        match parts.first() {
          None | Some(Value::Null) => {}
          Some(Value::String(raw)) => variation.path = Some(raw.clone()),
          Some(_) => {
            return Err(HarnessError::Manifest(format!(
              "variation path at {path} must be a string or null"
            )))
          }
        }
        if let Some(options) = parts.get(1) {
          match options {
            Value::Object(members) => {
              variation.options = members
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            }
            _ => {
              return Err(HarnessError::Manifest(format!(
                "variation options at {path} must be an object"
              )))
            }
          }
        }
        Ok(variation)
      }
      _ => Err(HarnessError::Manifest(format!(
        "unsupported variation at {path}"
      ))),
    }
  }
}

impl Manifest {
  pub fn load(path: &Path) -> Result<Manifest> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| HarnessError::Json {
      path: path.display().to_string(),
      source,
    })?;
    Manifest::from_value(&value)
  }

  pub fn from_value(value: &Value) -> Result<Manifest> {
    // Full catalogues nest the tree under `items.testharness`; accept both
    // that and a bare tree.
    let tree = value
      .get("items")
      .and_then(|items| items.get("testharness"))
      .unwrap_or(value);
    match ManifestEntry::from_value(tree, "")? {
      ManifestEntry::Folder(root) => Ok(Manifest { root }),
      ManifestEntry::Variations(_) => Err(HarnessError::Manifest(
        "catalogue root must be a folder".to_string(),
      )),
    }
  }
}

/// Pairs the catalogue with the baseline and emits the flat runnable list.
pub fn discover(
  manifest: &Manifest,
  expectations: &Expectation,
  options: &DiscoverOptions,
) -> Result<Vec<TestToRun>> {
  let base = Url::parse(BASE_ORIGIN)
    .map_err(|err| HarnessError::Manifest(format!("base origin: {err}")))?;
  let mut tests = Vec::new();
  walk_folder(&manifest.root, Some(expectations), "", &base, options, &mut tests)?;
  debug!(tests = tests.len(), "discovery complete");
  Ok(tests)
}

fn walk_folder(
  children: &BTreeMap<String, ManifestEntry>,
  context: Option<&Expectation>,
  prefix: &str,
  base: &Url,
  options: &DiscoverOptions,
  tests: &mut Vec<TestToRun>,
) -> Result<()> {
  // An ignored grouping is skipped wholesale unless overridden.
  if let Some(Expectation::Node(node)) = context {
    if node.ignore && !options.run_ignored {
      return Ok(());
    }
  }

  for (key, entry) in children {
    let child_context = context.and_then(|expectation| expectation.resolve_child(key));
    let child_prefix = format!("{prefix}/{key}");
    match entry {
      ManifestEntry::Folder(grandchildren) => {
        walk_folder(grandchildren, child_context, &child_prefix, base, options, tests)?;
      }
      ManifestEntry::Variations(variations) => {
        for variation in variations.iter().skip(1) {
          if let Some(test) =
            resolve_variation(variation, child_context, &child_prefix, base, options)?
          {
            tests.push(test);
          }
        }
      }
    }
  }
  Ok(())
}

fn resolve_variation(
  variation: &Variation,
  context: Option<&Expectation>,
  prefix: &str,
  base: &Url,
  options: &DiscoverOptions,
) -> Result<Option<TestToRun>> {
  let Some(raw_path) = variation.path.as_deref() else {
    return Ok(None);
  };
  if raw_path.is_empty() {
    return Ok(None);
  }

  let url = base.join(raw_path).map_err(|err| {
    HarnessError::Manifest(format!("variation path '{raw_path}': {err}"))
  })?;

  let file_name = url.path().rsplit('/').next().unwrap_or_default();
  if !RUNNABLE_SUFFIXES
    .iter()
    .any(|suffix| file_name.ends_with(suffix))
  {
    return Ok(None);
  }

  let mut resolved = url.path().to_string();
  if let Some(query) = url.query() {
    resolved.push('?');
    resolved.push_str(query);
  }
  if UNSUPPORTED_MARKERS
    .iter()
    .any(|marker| resolved.contains(marker))
  {
    return Ok(None);
  }

  let final_key = resolved.rsplit('/').next().unwrap_or(resolved.as_str());
  let Some(found) = context.and_then(|expectation| expectation.resolve_child(final_key)) else {
    // No recorded outcome; the pre-run orphan check owns the fatal case.
    return Ok(None);
  };

  let path = format!("{prefix}/{final_key}");
  let expectation = match found {
    Expectation::Node(node) if node.ignore => {
      if !options.run_ignored {
        return Ok(None);
      }
      if !node.children.is_empty() {
        return Err(HarnessError::MalformedExpectation { path });
      }
      // Nothing recorded once the marker is stripped; run expecting a pass.
      FileExpectation::All(true)
    }
    Expectation::Pass(pass) => FileExpectation::All(*pass),
    Expectation::FailSet(names) => FileExpectation::Failing(names.clone()),
    Expectation::Node(_) => return Err(HarnessError::MalformedExpectation { path }),
  };

  if !matches_filters(&path, &options.filters) {
    return Ok(None);
  }

  let long_timeout = wants_long_timeout(&variation.options);
  Ok(Some(TestToRun {
    path,
    url,
    options: variation.options.clone(),
    expectation,
    long_timeout,
  }))
}

fn wants_long_timeout(options: &BTreeMap<String, Value>) -> bool {
  matches!(options.get("timeout"), Some(Value::String(timeout)) if timeout == "long")
}
