//! Structural differ over serialized configurations.
//!
//! Controllers only consume presence/absence of patch operations; the
//! operations themselves carry JSON pointer paths for detailed diff output.

use crate::CoreError;
use nanoforge_schema::ConfigError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Add,
    Remove,
    Replace,
}

/// One structural change at a JSON pointer path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchOp {
    pub path: String,
    pub kind: PatchKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Diff two serialized configurations.
///
/// Textual equality short-circuits; otherwise both sides are parsed and
/// walked structurally, so key reordering yields an empty patch set. Arrays
/// are compared wholesale. Reflexive, and symmetric in detection: swapping
/// the sides never changes whether the result is empty.
pub fn diff_configs(previous: &str, next: &str) -> Result<Vec<PatchOp>, CoreError> {
    if previous == next {
        return Ok(Vec::new());
    }
    let old: Value = serde_json::from_str(previous).map_err(ConfigError::from)?;
    let new: Value = serde_json::from_str(next).map_err(ConfigError::from)?;

    let mut ops = Vec::new();
    walk("", &old, &new, &mut ops);
    Ok(ops)
}

fn walk(path: &str, old: &Value, new: &Value, ops: &mut Vec<PatchOp>) {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old_value) in a {
                let child = pointer(path, key);
                match b.get(key) {
                    Some(new_value) => walk(&child, old_value, new_value, ops),
                    None => ops.push(PatchOp {
                        path: child,
                        kind: PatchKind::Remove,
                        old: Some(old_value.clone()),
                        new: None,
                    }),
                }
            }
            for (key, new_value) in b {
                if !a.contains_key(key) {
                    ops.push(PatchOp {
                        path: pointer(path, key),
                        kind: PatchKind::Add,
                        old: None,
                        new: Some(new_value.clone()),
                    });
                }
            }
        }
        _ => {
            if old != new {
                ops.push(PatchOp {
                    path: path.to_owned(),
                    kind: PatchKind::Replace,
                    old: Some(old.clone()),
                    new: Some(new.clone()),
                });
            }
        }
    }
}

fn pointer(parent: &str, key: &str) -> String {
    let escaped = key.replace('~', "~0").replace('/', "~1");
    format!("{parent}/{escaped}")
}
