//! Patch merging into an accumulating result tree.
//!
//! A patch for path `P` only ever touches the node at `P`: every node above
//! it must already exist, and the node itself is shallow-unioned with the
//! patch when both are objects and replaced otherwise.

use serde_json::Value;

use crate::error::MergeError;
use crate::path::{Path, PathSegment};
use crate::payload::{json_kind, Payload};

/// Merge `patch` into `tree` at `path`, returning the new tree.
///
/// An empty path makes `patch` the whole tree.
pub fn merge(mut tree: Value, path: &Path, patch: Value) -> Result<Value, MergeError> {
    merge_in_place(&mut tree, path, patch)?;
    Ok(tree)
}

/// In-place form of [`merge`]. On error `tree` is left unchanged.
pub fn merge_in_place(tree: &mut Value, path: &Path, patch: Value) -> Result<(), MergeError> {
    let Some((last, parents)) = path.segments().split_last() else {
        *tree = patch;
        return Ok(());
    };

    let mut node = tree;
    for (depth, segment) in parents.iter().enumerate() {
        node = child_mut(node, segment, || path.prefix(depth), path)?;
    }
    let slot = slot_mut(node, last, || path.prefix(parents.len()), path)?;
    union_or_replace(slot, patch);
    Ok(())
}

/// Apply one payload to `tree`.
///
/// Initial results replace the tree. Patches merge their `data` at their
/// path, or write each of their `items` at consecutive list indices
/// starting at the path's final index.
pub fn apply_payload(tree: &mut Value, payload: &Payload) -> Result<(), MergeError> {
    match payload {
        Payload::Initial(result) => {
            *tree = result.data.clone().unwrap_or(Value::Null);
            Ok(())
        }
        Payload::Patch(patch) => {
            if let Some(items) = &patch.items {
                let (start, list) = match (patch.path.last(), patch.path.parent()) {
                    (Some(PathSegment::Index(start)), Some(list)) => (*start, list),
                    _ => {
                        return Err(MergeError::TypeMismatch {
                            at: patch.path.clone(),
                            path: patch.path.clone(),
                            expected: "list index",
                            found: "field name",
                        })
                    }
                };
                for (offset, item) in items.iter().enumerate() {
                    merge_in_place(tree, &list.child(start + offset), item.clone())?;
                }
                Ok(())
            } else if let Some(data) = &patch.data {
                merge_in_place(tree, &patch.path, data.clone())
            } else {
                Ok(())
            }
        }
    }
}

/// Borrow the node at `path`, if it exists.
pub fn lookup<'a>(tree: &'a Value, path: &Path) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(tree, |node, segment| match (node, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get(key),
            (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
            _ => None,
        })
}

fn child_mut<'a>(
    node: &'a mut Value,
    segment: &PathSegment,
    at: impl Fn() -> Path,
    path: &Path,
) -> Result<&'a mut Value, MergeError> {
    let missing = || MergeError::MissingSegment {
        at: at().child(segment.clone()),
        path: path.clone(),
    };
    match (node, segment) {
        (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key).ok_or_else(missing),
        (Value::Array(items), PathSegment::Index(index)) => {
            items.get_mut(*index).ok_or_else(missing)
        }
        (Value::Null, _) => Err(missing()),
        (other, segment) => Err(mismatch(other, segment, at(), path)),
    }
}

fn slot_mut<'a>(
    node: &'a mut Value,
    segment: &PathSegment,
    at: impl Fn() -> Path,
    path: &Path,
) -> Result<&'a mut Value, MergeError> {
    match (node, segment) {
        (Value::Object(map), PathSegment::Key(key)) => {
            Ok(map.entry(key.clone()).or_insert(Value::Null))
        }
        (Value::Array(items), PathSegment::Index(index)) => {
            if *index >= items.len() {
                items.resize(*index + 1, Value::Null);
            }
            Ok(&mut items[*index])
        }
        (Value::Null, _) => Err(MergeError::MissingSegment {
            at: at(),
            path: path.clone(),
        }),
        (other, segment) => Err(mismatch(other, segment, at(), path)),
    }
}

fn mismatch(node: &Value, segment: &PathSegment, at: Path, path: &Path) -> MergeError {
    MergeError::TypeMismatch {
        at,
        path: path.clone(),
        expected: match segment {
            PathSegment::Key(_) => "object",
            PathSegment::Index(_) => "list",
        },
        found: json_kind(node),
    }
}

fn union_or_replace(slot: &mut Value, patch: Value) {
    match (slot, patch) {
        (Value::Object(existing), Value::Object(fields)) => existing.extend(fields),
        (slot, patch) => *slot = patch,
    }
}
