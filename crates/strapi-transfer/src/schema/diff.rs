//! Structural JSON diff of schema snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::core::SchemaMap;
use crate::engine::SchemaStrategy;

/// Schema-level keys that carry no structural meaning.
const NON_STRUCTURAL_KEYS: &[&str] = &["pluginOptions", "info"];
const ATTRIBUTE_PLUGIN_OPTIONS: &str = "pluginOptions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Present on the destination only.
    Added,
    /// Present on the source only.
    Deleted,
    /// Present on both sides with different values.
    Modified,
}

/// One difference between two schema definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub kind: DiffKind,

    /// Path from the definition root. Array indexes are rendered as strings.
    pub path: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Value>,
}

impl DiffEntry {
    /// Dotted path prefixed with the content-type uid.
    pub fn display_path(&self, uid: &str) -> String {
        std::iter::once(uid)
            .chain(self.path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Differences keyed by content-type uid.
pub type SchemaDiffs = BTreeMap<String, Vec<DiffEntry>>;

/// Diff two JSON values. `source` plays the role of the old side.
pub fn diff_values(source: &Value, destination: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    walk(&mut Vec::new(), Some(source), Some(destination), &mut out);
    out
}

fn walk(
    path: &mut Vec<String>,
    source: Option<&Value>,
    destination: Option<&Value>,
    out: &mut Vec<DiffEntry>,
) {
    let entry = |kind, path: &[String]| DiffEntry {
        kind,
        path: path.to_vec(),
        source: source.cloned(),
        destination: destination.cloned(),
    };

    match (source, destination) {
        (None, None) => {}
        (None, Some(_)) => out.push(entry(DiffKind::Added, path)),
        (Some(_), None) => out.push(entry(DiffKind::Deleted, path)),
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                path.push(key.clone());
                walk(path, a.get(key), b.get(key), out);
                path.pop();
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for index in 0..a.len().max(b.len()) {
                path.push(index.to_string());
                walk(path, a.get(index), b.get(index), out);
                path.pop();
            }
        }
        (Some(a), Some(b)) => {
            if a != b {
                out.push(entry(DiffKind::Modified, path));
            }
        }
    }
}

/// `info` and `pluginOptions` of the schema itself, or `pluginOptions` of
/// one attribute. An attribute named `info` stays structural.
fn is_non_structural(path: &[String]) -> bool {
    match path {
        [key, ..] if NON_STRUCTURAL_KEYS.contains(&key.as_str()) => true,
        [attributes, _, key, ..] => attributes == "attributes" && key == ATTRIBUTE_PLUGIN_OPTIONS,
        _ => false,
    }
}

/// Diff every content type of two snapshots.
pub fn compute_diffs(
    source: &SchemaMap,
    destination: &SchemaMap,
    strategy: SchemaStrategy,
) -> SchemaDiffs {
    let mut diffs = SchemaDiffs::new();
    if strategy == SchemaStrategy::Ignore {
        return diffs;
    }

    let uids: BTreeSet<&String> = source.keys().chain(destination.keys()).collect();
    for uid in uids {
        let a = source.get(uid).map(|s| s.definition_value());
        let b = destination.get(uid).map(|s| s.definition_value());

        let mut entries = Vec::new();
        walk(&mut Vec::new(), a.as_ref(), b.as_ref(), &mut entries);

        if strategy == SchemaStrategy::Strict {
            entries.retain(|e| !is_non_structural(&e.path));
        }

        if !entries.is_empty() {
            diffs.insert(uid.clone(), entries);
        }
    }
    diffs
}

/// Diffs not covered by `ignored`.
pub fn unresolved(diffs: &SchemaDiffs, ignored: &SchemaDiffs) -> SchemaDiffs {
    let mut remaining = SchemaDiffs::new();
    for (uid, entries) in diffs {
        let accepted = ignored.get(uid);
        let left: Vec<DiffEntry> = entries
            .iter()
            .filter(|e| !accepted.is_some_and(|a| a.contains(e)))
            .cloned()
            .collect();
        if !left.is_empty() {
            remaining.insert(uid.clone(), left);
        }
    }
    remaining
}

/// Merge `extra` into `target`, skipping entries already present.
pub fn merge_diffs(target: &mut SchemaDiffs, extra: &SchemaDiffs) {
    for (uid, entries) in extra {
        let slot = target.entry(uid.clone()).or_default();
        for entry in entries {
            if !slot.contains(entry) {
                slot.push(entry.clone());
            }
        }
    }
}
