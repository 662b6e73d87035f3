//! Pure patch application semantics.
//!
//! [`apply`] is the strict entry point: the first failing operation aborts
//! the whole patch. [`apply_lenient`] drops failing operations and reports
//! them as diagnostics; the reconciliation layer uses it when rebasing a
//! local buffer onto a newer remote base.

use serde_json::Value;

use editstore_path::{index_for_key, normalize_index, resolve, Path, PathStep, KEY_FIELD};

use crate::dmp;
use crate::keys::ensure_array_keys_deep;
use crate::types::{InsertPosition, Patch, PatchDiagnostic, PatchError, PatchOp};

/// Apply `patch` to `doc`, returning the new document value.
///
/// The input is never mutated. Operations apply left-to-right against the
/// running result.
pub fn apply(doc: &Value, patch: &Patch) -> Result<Value, PatchError> {
    let mut next = doc.clone();
    for op in &patch.ops {
        apply_op(&mut next, op)?;
    }
    Ok(next)
}

/// Apply `patch` to `doc`, dropping operations that fail.
///
/// Each dropped operation is reported as a [`PatchDiagnostic`] keyed by its
/// target path; the remaining operations still apply.
pub fn apply_lenient(doc: &Value, patch: &Patch) -> (Value, Vec<PatchDiagnostic>) {
    let mut next = doc.clone();
    let mut dropped = Vec::new();
    for op in &patch.ops {
        if let Err(error) = apply_op(&mut next, op) {
            dropped.push(PatchDiagnostic {
                path: op.path().clone(),
                verb: op.verb(),
                error,
            });
        }
    }
    (next, dropped)
}

/// Apply a single operation in place.
///
/// Failures are detected before any mutation happens, so a returned error
/// leaves `doc` unchanged.
pub fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    match op {
        PatchOp::Set { path, value } => {
            set_deep(doc, path.steps(), value.clone());
            ensure_array_keys_deep(doc);
            Ok(())
        }
        PatchOp::SetIfMissing { path, value } => {
            let missing = matches!(resolve(doc, path), None | Some(Value::Null));
            if missing {
                set_deep(doc, path.steps(), value.clone());
                ensure_array_keys_deep(doc);
            }
            Ok(())
        }
        PatchOp::Unset { path } => unset_deep(doc, path),
        PatchOp::Insert {
            anchor,
            position,
            items,
        } => {
            insert_at(doc, anchor, *position, items)?;
            ensure_array_keys_deep(doc);
            Ok(())
        }
        PatchOp::Inc { path, delta } => adjust_number(doc, path, *delta),
        PatchOp::Dec { path, delta } => adjust_number(doc, path, -delta),
        PatchOp::DiffMatchPatch { path, patch } => {
            let target = resolve(doc, path).ok_or_else(|| PatchError::TypeMismatch {
                path: path.clone(),
                expected: "string",
            })?;
            let current = target.as_str().ok_or_else(|| PatchError::TypeMismatch {
                path: path.clone(),
                expected: "string",
            })?;
            let parsed = dmp::parse(patch)?;
            let next = dmp::apply(&parsed, current)
                .ok_or_else(|| PatchError::TextDiverged(path.clone()))?;
            set_deep(doc, path.steps(), Value::String(next));
            Ok(())
        }
    }
}

// ── set ──────────────────────────────────────────────────────────────────

/// Write `value` at `steps`, creating intermediate containers. Primitives in
/// the way are overwritten with the container the next step requires.
fn set_deep(node: &mut Value, steps: &[PathStep], value: Value) {
    let Some((step, rest)) = steps.split_first() else {
        *node = value;
        return;
    };
    match step {
        PathStep::Field(name) => {
            if !node.is_object() {
                *node = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(map) = node {
                let entry = map.entry(name.clone()).or_insert(Value::Null);
                set_deep(entry, rest, value);
            }
        }
        PathStep::Index(i) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(arr) = node {
                let idx = match normalize_index(*i, arr.len()) {
                    Some(idx) => idx,
                    // Extend with nulls up to the requested position.
                    None if *i >= 0 => *i as usize,
                    None => 0,
                };
                if idx >= arr.len() {
                    arr.resize(idx + 1, Value::Null);
                }
                set_deep(&mut arr[idx], rest, value);
            }
        }
        PathStep::Key(key) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(arr) = node {
                let idx = match index_for_key(arr, key) {
                    Some(idx) => idx,
                    None => {
                        // Seed the new element with the addressed key so the
                        // path keeps resolving after creation.
                        let mut map = serde_json::Map::new();
                        map.insert(KEY_FIELD.to_owned(), Value::String(key.clone()));
                        arr.push(Value::Object(map));
                        arr.len() - 1
                    }
                };
                set_deep(&mut arr[idx], rest, value);
            }
        }
    }
}

// ── unset ────────────────────────────────────────────────────────────────

fn unset_deep(doc: &mut Value, path: &Path) -> Result<(), PatchError> {
    let Some((parent_path, leaf)) = path.split_last() else {
        *doc = Value::Null;
        return Ok(());
    };
    let Some(parent) = navigate_mut(doc, path, parent_path.steps())? else {
        return Ok(()); // missing target is a no-op
    };
    match (parent, leaf) {
        (Value::Object(map), PathStep::Field(name)) => {
            map.shift_remove(name);
            Ok(())
        }
        (Value::Array(arr), PathStep::Index(i)) => {
            if let Some(idx) = normalize_index(*i, arr.len()) {
                arr.remove(idx);
            }
            Ok(())
        }
        (Value::Array(arr), PathStep::Key(key)) => {
            if let Some(idx) = index_for_key(arr, key) {
                arr.remove(idx);
            }
            Ok(())
        }
        (Value::Object(_) | Value::Array(_), _) => Ok(()),
        _ => Err(PatchError::TypeMismatch {
            path: path.clone(),
            expected: "container",
        }),
    }
}

// ── insert ───────────────────────────────────────────────────────────────

fn insert_at(
    doc: &mut Value,
    anchor: &Path,
    position: InsertPosition,
    items: &[Value],
) -> Result<(), PatchError> {
    let (array_path, selector) = anchor
        .split_last()
        .ok_or_else(|| PatchError::AnchorNotFound(anchor.clone()))?;
    let Some(target) = navigate_mut(doc, anchor, array_path.steps())? else {
        return Err(PatchError::AnchorNotFound(anchor.clone()));
    };
    let arr = match target {
        Value::Array(arr) => arr,
        _ => {
            return Err(PatchError::TypeMismatch {
                path: array_path.clone(),
                expected: "array",
            })
        }
    };
    let idx = match selector {
        // Keyed anchors fail hard when the element vanished; the caller
        // decides whether to drop or retry the operation.
        PathStep::Key(key) => {
            index_for_key(arr, key).ok_or_else(|| PatchError::AnchorNotFound(anchor.clone()))?
        }
        // Index anchors are positionally fragile and documented best-effort:
        // out-of-range positions clamp to the nearest end.
        PathStep::Index(i) => clamp_index(*i, arr.len()),
        PathStep::Field(_) => {
            return Err(PatchError::TypeMismatch {
                path: anchor.clone(),
                expected: "array element selector",
            })
        }
    };
    let at = match position {
        InsertPosition::Before => idx,
        InsertPosition::After => (idx + 1).min(arr.len()),
        InsertPosition::Replace => {
            if idx < arr.len() {
                arr.remove(idx);
            }
            idx.min(arr.len())
        }
    };
    let at = at.min(arr.len());
    for (offset, item) in items.iter().enumerate() {
        arr.insert(at + offset, item.clone());
    }
    Ok(())
}

fn clamp_index(index: i64, len: usize) -> usize {
    if index >= 0 {
        (index as usize).min(len.saturating_sub(1))
    } else {
        len.saturating_sub(index.unsigned_abs() as usize)
    }
}

// ── inc / dec ────────────────────────────────────────────────────────────

fn adjust_number(doc: &mut Value, path: &Path, delta: f64) -> Result<(), PatchError> {
    let mismatch = || PatchError::TypeMismatch {
        path: path.clone(),
        expected: "number",
    };
    let current = resolve(doc, path)
        .ok_or_else(mismatch)?
        .as_f64()
        .ok_or_else(mismatch)?;
    let next = serde_json::Number::from_f64(current + delta).ok_or_else(mismatch)?;
    set_deep(doc, path.steps(), Value::Number(next));
    Ok(())
}

// ── shared navigation ────────────────────────────────────────────────────

/// Navigate mutably to `steps`. Returns `Ok(None)` when a step is simply
/// missing, and `TypeMismatch` when a primitive sits where a container is
/// expected.
fn navigate_mut<'a>(
    doc: &'a mut Value,
    full_path: &Path,
    steps: &[PathStep],
) -> Result<Option<&'a mut Value>, PatchError> {
    let mut node = doc;
    for step in steps {
        let is_container = node.is_object() || node.is_array();
        node = match (step, node) {
            (PathStep::Field(name), Value::Object(map)) => match map.get_mut(name) {
                Some(v) => v,
                None => return Ok(None),
            },
            (PathStep::Index(i), Value::Array(arr)) => {
                match normalize_index(*i, arr.len()) {
                    Some(idx) => &mut arr[idx],
                    None => return Ok(None),
                }
            }
            (PathStep::Key(key), Value::Array(arr)) => match index_for_key(arr, key) {
                Some(idx) => &mut arr[idx],
                None => return Ok(None),
            },
            _ if !is_container => {
                return Err(PatchError::TypeMismatch {
                    path: full_path.clone(),
                    expected: "container",
                })
            }
            _ => return Ok(None),
        };
    }
    Ok(Some(node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn set_replaces_value() {
        let doc = json!({"title": "A"});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Set {
                path: p("title"),
                value: json!("B"),
            }),
        )
        .unwrap();
        assert_eq!(next, json!({"title": "B"}));
        // input untouched
        assert_eq!(doc, json!({"title": "A"}));
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let doc = json!({});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Set {
                path: p("a.b.c"),
                value: json!(1),
            }),
        )
        .unwrap();
        assert_eq!(next, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_overwrites_primitive_in_the_way() {
        let doc = json!({"a": 42});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Set {
                path: p("a.b"),
                value: json!(1),
            }),
        )
        .unwrap();
        assert_eq!(next, json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_if_missing_only_when_absent() {
        let doc = json!({"a": 1, "b": null});
        let patch = Patch::new(vec![
            PatchOp::SetIfMissing {
                path: p("a"),
                value: json!(99),
            },
            PatchOp::SetIfMissing {
                path: p("b"),
                value: json!(2),
            },
            PatchOp::SetIfMissing {
                path: p("c"),
                value: json!(3),
            },
        ]);
        let next = apply(&doc, &patch).unwrap();
        assert_eq!(next, json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn unset_removes_field_and_keyed_element() {
        let doc = json!({"a": 1, "items": [{"_key": "x"}, {"_key": "y"}]});
        let patch = Patch::new(vec![
            PatchOp::Unset { path: p("a") },
            PatchOp::Unset {
                path: p("items[_key==\"x\"]"),
            },
        ]);
        let next = apply(&doc, &patch).unwrap();
        assert_eq!(next, json!({"items": [{"_key": "y"}]}));
    }

    #[test]
    fn unset_missing_is_noop() {
        let doc = json!({"a": 1});
        let next = apply(&doc, &Patch::single(PatchOp::Unset { path: p("z.q") })).unwrap();
        assert_eq!(next, doc);
    }

    #[test]
    fn unset_through_primitive_is_type_mismatch() {
        let doc = json!({"a": 1});
        let err = apply(&doc, &Patch::single(PatchOp::Unset { path: p("a.b.c") })).unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));
    }

    #[test]
    fn insert_after_keyed_anchor() {
        let doc = json!({"items": [{"_key": "k1", "v": 1}, {"_key": "k2", "v": 2}]});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Insert {
                anchor: p("items[_key==\"k1\"]"),
                position: InsertPosition::After,
                items: vec![json!({"_key": "k9", "v": 9})],
            }),
        )
        .unwrap();
        let keys: Vec<_> = next["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["_key"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(keys, ["k1", "k9", "k2"]);
    }

    #[test]
    fn insert_before_negative_index_appends() {
        let doc = json!({"arr": [1, 2, 3]});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Insert {
                anchor: p("arr[-1]"),
                position: InsertPosition::After,
                items: vec![json!(4)],
            }),
        )
        .unwrap();
        assert_eq!(next, json!({"arr": [1, 2, 3, 4]}));
    }

    #[test]
    fn insert_replace_swaps_element() {
        let doc = json!({"arr": ["a", "b", "c"]});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Insert {
                anchor: p("arr[1]"),
                position: InsertPosition::Replace,
                items: vec![json!("!")],
            }),
        )
        .unwrap();
        assert_eq!(next, json!({"arr": ["a", "!", "c"]}));
    }

    #[test]
    fn insert_missing_keyed_anchor_fails() {
        let doc = json!({"items": [{"_key": "a"}]});
        let err = apply(
            &doc,
            &Patch::single(PatchOp::Insert {
                anchor: p("items[_key==\"gone\"]"),
                position: InsertPosition::After,
                items: vec![json!({})],
            }),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::AnchorNotFound(_)));
    }

    #[test]
    fn inc_and_dec_adjust_numbers() {
        let doc = json!({"n": 10});
        let patch = Patch::new(vec![
            PatchOp::Inc {
                path: p("n"),
                delta: 5.0,
            },
            PatchOp::Dec {
                path: p("n"),
                delta: 3.0,
            },
        ]);
        let next = apply(&doc, &patch).unwrap();
        assert_eq!(next["n"].as_f64().unwrap(), 12.0);
    }

    #[test]
    fn inc_on_non_number_fails() {
        let doc = json!({"n": "nope"});
        let err = apply(
            &doc,
            &Patch::single(PatchOp::Inc {
                path: p("n"),
                delta: 1.0,
            }),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));
    }

    #[test]
    fn ops_apply_against_running_result() {
        let doc = json!({});
        let patch = Patch::new(vec![
            PatchOp::Set {
                path: p("arr"),
                value: json!([1]),
            },
            PatchOp::Insert {
                anchor: p("arr[-1]"),
                position: InsertPosition::After,
                items: vec![json!(2)],
            },
        ]);
        let next = apply(&doc, &patch).unwrap();
        assert_eq!(next, json!({"arr": [1, 2]}));
    }

    #[test]
    fn lenient_drops_failing_op_and_continues() {
        let doc = json!({"items": [{"_key": "a"}], "n": 1});
        let patch = Patch::new(vec![
            PatchOp::Insert {
                anchor: p("items[_key==\"gone\"]"),
                position: InsertPosition::After,
                items: vec![json!({})],
            },
            PatchOp::Inc {
                path: p("n"),
                delta: 1.0,
            },
        ]);
        let (next, dropped) = apply_lenient(&doc, &patch);
        assert_eq!(next["n"].as_f64().unwrap(), 2.0);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].verb, "insert");
        assert_eq!(dropped[0].path, p("items[_key==\"gone\"]"));
    }

    #[test]
    fn set_into_keyed_array_creates_element_with_key() {
        let doc = json!({"items": []});
        let next = apply(
            &doc,
            &Patch::single(PatchOp::Set {
                path: p("items[_key==\"k1\"].title"),
                value: json!("hi"),
            }),
        )
        .unwrap();
        assert_eq!(next["items"][0]["_key"], json!("k1"));
        assert_eq!(next["items"][0]["title"], json!("hi"));
    }
}
