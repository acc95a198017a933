use crate::HarnessError;
use crate::Result;
use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Reserved key marking a subtree as skipped unless `--run-ignored` is set.
const IGNORE_KEY: &str = "ignore";

/// The recursive baseline value recording known-good outcomes.
///
/// The wire shape is the legacy JSON file: a `Pass` leaf is a bare boolean, a
/// `FailSet` leaf is an array of subtest names, and a `Node` is an object
/// whose optional `"ignore": true` member is the skip marker and whose other
/// members are children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
  /// The whole file or subtree uniformly passes (`true`) or fails (`false`).
  Pass(bool),
  /// The named subtests fail; all others pass.
  FailSet(Vec<String>),
  /// A directory-shaped grouping.
  Node(ExpectationNode),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpectationNode {
  pub ignore: bool,
  pub children: BTreeMap<String, Expectation>,
}

/// The expectation that applies to one concrete runnable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileExpectation {
  /// Every case (and the file itself) passes (`true`) or fails (`false`).
  All(bool),
  /// Cases with these names fail; everything else passes.
  Failing(Vec<String>),
}

impl FileExpectation {
  pub fn expects_case_failure(&self, name: &str) -> bool {
    match self {
      FileExpectation::All(pass) => !pass,
      FileExpectation::Failing(names) => names.iter().any(|n| n == name),
    }
  }
}

impl Expectation {
  pub fn from_value(value: &Value, path: &str) -> Result<Expectation> {
    match value {
      Value::Bool(pass) => Ok(Expectation::Pass(*pass)),
      Value::Array(items) => {
        let mut names = Vec::with_capacity(items.len());
        for item in items {
          match item {
            Value::String(name) => names.push(name.clone()),
            _ => {
              return Err(HarnessError::MalformedExpectation {
                path: path.to_string(),
              })
            }
          }
        }
        Ok(Expectation::FailSet(names))
      }
      Value::Object(members) => {
        let mut node = ExpectationNode::default();
        for (key, child) in members {
          if key == IGNORE_KEY {
            match child {
              Value::Bool(ignore) => node.ignore = *ignore,
              _ => {
                return Err(HarnessError::MalformedExpectation {
                  path: path.to_string(),
                })
              }
            }
            continue;
          }

          let child_path = format!("{path}/{key}");
          node
            .children
            .insert(key.clone(), Expectation::from_value(child, &child_path)?);
        }
        Ok(Expectation::Node(node))
      }
      _ => Err(HarnessError::MalformedExpectation {
        path: path.to_string(),
      }),
    }
  }

  pub fn to_value(&self) -> Value {
    match self {
      Expectation::Pass(pass) => Value::Bool(*pass),
      Expectation::FailSet(names) => Value::Array(
        names
          .iter()
          .map(|name| Value::String(name.clone()))
          .collect(),
      ),
      Expectation::Node(node) => {
        let mut members = Map::new();
        if node.ignore {
          members.insert(IGNORE_KEY.to_string(), Value::Bool(true));
        }
        for (key, child) in &node.children {
          members.insert(key.clone(), child.to_value());
        }
        Value::Object(members)
      }
    }
  }

  pub fn load(path: &Path) -> Result<Expectation> {
    let raw = fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| HarnessError::Json {
      path: path.display().to_string(),
      source,
    })?;
    Expectation::from_value(&value, "")
  }

  pub fn save(&self, path: &Path) -> Result<()> {
    let mut json =
      serde_json::to_string_pretty(&self.to_value()).map_err(|source| HarnessError::Json {
        path: path.display().to_string(),
        source,
      })?;
    json.push('\n');
    fs::write(path, json)?;
    Ok(())
  }

  /// Resolves the expectation carried down to a child keyed `key`.
  ///
  /// Leaf expectations propagate unchanged to all descendants; a node indexes
  /// its children. An absent key means the child has no recorded outcome.
  pub fn resolve_child<'a>(&'a self, key: &str) -> Option<&'a Expectation> {
    match self {
      Expectation::Pass(_) | Expectation::FailSet(_) => Some(self),
      Expectation::Node(node) => node.children.get(key),
    }
  }

  /// Sets the expectation at `segments`, coercing any intermediate leaf into
  /// an empty node on the way down.
  pub fn insert(&mut self, segments: &[&str], value: Expectation) {
    match segments.split_first() {
      None => *self = value,
      Some((head, rest)) => {
        if !matches!(self, Expectation::Node(_)) {
          *self = Expectation::Node(ExpectationNode::default());
        }
        let Expectation::Node(node) = self else {
          unreachable!("coerced to a node above");
        };
        let child = node
          .children
          .entry((*head).to_string())
          .or_insert_with(|| Expectation::Node(ExpectationNode::default()));
        child.insert(rest, value);
      }
    }
  }

  /// Every path at which a `Pass`/`FailSet` leaf sits, `/`-joined with a
  /// leading slash. Ignored subtrees are walked only when `include_ignored`.
  pub fn leaf_paths(&self, include_ignored: bool) -> Vec<String> {
    let mut paths = Vec::new();
    collect_leaf_paths(self, "", include_ignored, &mut paths);
    paths
  }
}

fn collect_leaf_paths(
  expectation: &Expectation,
  prefix: &str,
  include_ignored: bool,
  paths: &mut Vec<String>,
) {
  match expectation {
    Expectation::Pass(_) | Expectation::FailSet(_) => paths.push(prefix.to_string()),
    Expectation::Node(node) => {
      if node.ignore && !include_ignored {
        return;
      }
      for (key, child) in &node.children {
        let child_prefix = format!("{prefix}/{key}");
        collect_leaf_paths(child, &child_prefix, include_ignored, paths);
      }
    }
  }
}

/// Pre-run integrity check: every baseline leaf (after the same prefix
/// filters discovery honors) must correspond to a discovered test, or the
/// baseline references a test that no longer exists and the run aborts.
pub fn assert_all_expectations_have_tests(
  root: &Expectation,
  discovered_paths: &HashSet<String>,
  filters: &[String],
  include_ignored: bool,
) -> Result<()> {
  let mut orphans: Vec<String> = root
    .leaf_paths(include_ignored)
    .into_iter()
    .filter(|path| matches_filters(path, filters))
    .filter(|path| !discovered_paths.contains(path.as_str()))
    .collect();

  if orphans.is_empty() {
    Ok(())
  } else {
    orphans.sort();
    Err(HarnessError::OrphanExpectations(orphans))
  }
}

/// An empty filter list keeps everything; otherwise the path minus its
/// leading slash must start with one of the filters.
pub(crate) fn matches_filters(path: &str, filters: &[String]) -> bool {
  if filters.is_empty() {
    return true;
  }
  let trimmed = path.strip_prefix('/').unwrap_or(path);
  filters.iter().any(|filter| trimmed.starts_with(filter.as_str()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn wire_shape_round_trips() {
    let value = json!({
      "dom": {
        "a.html": true,
        "b.html": ["first case", "second case"],
        "legacy": { "ignore": true },
      },
      "streams": false,
    });

    let parsed = Expectation::from_value(&value, "").expect("parsed");
    assert_eq!(parsed.to_value(), value);
  }

  #[test]
  fn rejects_malformed_leaves() {
    let scalar = json!({ "a.html": 3 });
    let err = Expectation::from_value(&scalar, "").unwrap_err();
    assert!(matches!(
      err,
      HarnessError::MalformedExpectation { path } if path == "/a.html"
    ));

    let mixed = json!({ "a.html": ["name", 1] });
    assert!(Expectation::from_value(&mixed, "").is_err());

    let bad_ignore = json!({ "dir": { "ignore": "yes" } });
    assert!(Expectation::from_value(&bad_ignore, "").is_err());
  }

  #[test]
  fn insert_replaces_intermediate_leaf_with_node() {
    let mut root = Expectation::from_value(&json!({ "a": true }), "").unwrap();
    root.insert(&["a", "x.html"], Expectation::Pass(false));
    assert_eq!(root.to_value(), json!({ "a": { "x.html": false } }));
  }

  #[test]
  fn insert_overwrites_existing_leaf() {
    let mut root = Expectation::from_value(&json!({ "a": { "x.html": false } }), "").unwrap();
    root.insert(&["a", "x.html"], Expectation::FailSet(vec!["c".to_string()]));
    assert_eq!(root.to_value(), json!({ "a": { "x.html": ["c"] } }));
  }

  #[test]
  fn leaf_paths_skip_ignored_subtrees_unless_included() {
    let root = Expectation::from_value(
      &json!({
        "a": { "x.html": true },
        "b": { "ignore": true, "y.html": false },
      }),
      "",
    )
    .unwrap();

    assert_eq!(root.leaf_paths(false), vec!["/a/x.html"]);
    assert_eq!(root.leaf_paths(true), vec!["/a/x.html", "/b/y.html"]);
  }

  #[test]
  fn orphan_check_reports_baseline_entries_without_tests() {
    let root = Expectation::from_value(
      &json!({
        "a": { "x.html": true },
        "b": { "y.html": false },
      }),
      "",
    )
    .unwrap();

    let discovered: HashSet<String> = ["/a/x.html".to_string()].into_iter().collect();
    let err = assert_all_expectations_have_tests(&root, &discovered, &[], false).unwrap_err();
    match err {
      HarnessError::OrphanExpectations(orphans) => {
        assert_eq!(orphans, vec!["/b/y.html"]);
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn orphan_check_honors_prefix_filters() {
    let root = Expectation::from_value(&json!({ "b": { "y.html": false } }), "").unwrap();
    let discovered = HashSet::new();

    assert!(assert_all_expectations_have_tests(&root, &discovered, &["a/".to_string()], false).is_ok());
    assert!(assert_all_expectations_have_tests(&root, &discovered, &["b/".to_string()], false).is_err());
  }
}
