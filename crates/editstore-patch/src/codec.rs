//! JSON wire form for patches.
//!
//! The transport exchanges patches as JSON bodies, one object per group of
//! operations, e.g. `{"set": {"a.b": 1}}` or
//! `{"insert": {"after": "arr[-1]", "items": [...]}}`. Encoding emits one
//! body per operation; decoding also accepts multi-verb bodies, applying the
//! verbs in the fixed order `setIfMissing`, `set`, `unset`, `inc`, `dec`,
//! `insert`, `diffMatchPatch`. A body with an unrecognized verb fails with
//! [`PatchError::UnsupportedOperation`].

use serde_json::{json, Map, Value};

use editstore_path::Path;

use crate::types::{InsertPosition, Patch, PatchError, PatchOp};

/// Body keys that are metadata, not verbs.
const META_KEYS: &[&str] = &["id", "ifRevisionID"];

/// Encode a patch as an array of single-verb JSON bodies.
pub fn encode_patch(patch: &Patch) -> Value {
    Value::Array(patch.ops.iter().map(encode_op).collect())
}

fn encode_op(op: &PatchOp) -> Value {
    match op {
        PatchOp::Set { path, value } => json!({"set": {path.to_string(): value}}),
        PatchOp::SetIfMissing { path, value } => {
            json!({"setIfMissing": {path.to_string(): value}})
        }
        PatchOp::Unset { path } => json!({"unset": [path.to_string()]}),
        PatchOp::Insert {
            anchor,
            position,
            items,
        } => json!({"insert": {position.as_str(): anchor.to_string(), "items": items}}),
        PatchOp::Inc { path, delta } => json!({"inc": {path.to_string(): delta}}),
        PatchOp::Dec { path, delta } => json!({"dec": {path.to_string(): delta}}),
        PatchOp::DiffMatchPatch { path, patch } => {
            json!({"diffMatchPatch": {path.to_string(): patch}})
        }
    }
}

/// Decode an array of patch bodies into one ordered patch.
pub fn decode_patch(bodies: &[Value]) -> Result<Patch, PatchError> {
    let mut ops = Vec::new();
    for body in bodies {
        decode_body(body, &mut ops)?;
    }
    Ok(Patch::new(ops))
}

/// Decode a single patch body, appending its operations in canonical order.
pub fn decode_body(body: &Value, ops: &mut Vec<PatchOp>) -> Result<(), PatchError> {
    let map = body.as_object().ok_or_else(|| {
        PatchError::UnsupportedOperation("patch body must be an object".to_owned())
    })?;
    for key in map.keys() {
        let known = matches!(
            key.as_str(),
            "set" | "setIfMissing" | "unset" | "inc" | "dec" | "insert" | "diffMatchPatch"
        ) || META_KEYS.contains(&key.as_str());
        if !known {
            return Err(PatchError::UnsupportedOperation(key.clone()));
        }
    }
    if let Some(entries) = verb_entries(map, "setIfMissing")? {
        for (path, value) in entries {
            ops.push(PatchOp::SetIfMissing { path, value });
        }
    }
    if let Some(entries) = verb_entries(map, "set")? {
        for (path, value) in entries {
            ops.push(PatchOp::Set { path, value });
        }
    }
    if let Some(unset) = map.get("unset") {
        let paths = unset.as_array().ok_or_else(|| {
            PatchError::UnsupportedOperation("unset expects an array of paths".to_owned())
        })?;
        for entry in paths {
            let raw = entry.as_str().ok_or_else(|| {
                PatchError::UnsupportedOperation("unset path must be a string".to_owned())
            })?;
            ops.push(PatchOp::Unset {
                path: Path::parse(raw)?,
            });
        }
    }
    if let Some(entries) = verb_entries(map, "inc")? {
        for (path, value) in entries {
            ops.push(PatchOp::Inc {
                path,
                delta: number(&value, "inc")?,
            });
        }
    }
    if let Some(entries) = verb_entries(map, "dec")? {
        for (path, value) in entries {
            ops.push(PatchOp::Dec {
                path,
                delta: number(&value, "dec")?,
            });
        }
    }
    if let Some(insert) = map.get("insert") {
        ops.push(decode_insert(insert)?);
    }
    if let Some(entries) = verb_entries(map, "diffMatchPatch")? {
        for (path, value) in entries {
            let patch = value
                .as_str()
                .ok_or_else(|| {
                    PatchError::UnsupportedOperation(
                        "diffMatchPatch expects a string patch".to_owned(),
                    )
                })?
                .to_owned();
            ops.push(PatchOp::DiffMatchPatch { path, patch });
        }
    }
    Ok(())
}

fn verb_entries(
    map: &Map<String, Value>,
    verb: &str,
) -> Result<Option<Vec<(Path, Value)>>, PatchError> {
    let Some(value) = map.get(verb) else {
        return Ok(None);
    };
    let obj = value.as_object().ok_or_else(|| {
        PatchError::UnsupportedOperation(format!("{verb} expects an object of paths"))
    })?;
    let mut entries = Vec::with_capacity(obj.len());
    for (raw_path, v) in obj {
        entries.push((Path::parse(raw_path)?, v.clone()));
    }
    Ok(Some(entries))
}

fn decode_insert(body: &Value) -> Result<PatchOp, PatchError> {
    let obj = body.as_object().ok_or_else(|| {
        PatchError::UnsupportedOperation("insert expects an object".to_owned())
    })?;
    let (position, anchor_raw) = if let Some(v) = obj.get("before") {
        (InsertPosition::Before, v)
    } else if let Some(v) = obj.get("after") {
        (InsertPosition::After, v)
    } else if let Some(v) = obj.get("replace") {
        (InsertPosition::Replace, v)
    } else {
        return Err(PatchError::UnsupportedOperation(
            "insert needs before/after/replace".to_owned(),
        ));
    };
    let anchor = Path::parse(anchor_raw.as_str().ok_or_else(|| {
        PatchError::UnsupportedOperation("insert anchor must be a string path".to_owned())
    })?)?;
    let items = obj
        .get("items")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(PatchOp::Insert {
        anchor,
        position,
        items,
    })
}

fn number(value: &Value, verb: &str) -> Result<f64, PatchError> {
    value
        .as_f64()
        .ok_or_else(|| PatchError::UnsupportedOperation(format!("{verb} expects a number")))
}
