//! Read-only path resolution over a document value.

use serde_json::Value;

use crate::{Path, PathStep, KEY_FIELD};

/// Resolve `path` against `doc`, returning the addressed value if present.
pub fn resolve<'a>(doc: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut node = doc;
    for step in path.steps() {
        node = match (step, node) {
            (PathStep::Field(name), Value::Object(map)) => map.get(name)?,
            (PathStep::Index(i), Value::Array(arr)) => {
                let idx = normalize_index(*i, arr.len())?;
                arr.get(idx)?
            }
            (PathStep::Key(key), Value::Array(arr)) => {
                let idx = index_for_key(arr, key)?;
                &arr[idx]
            }
            _ => return None,
        };
    }
    Some(node)
}

/// Position of the element whose `_key` field equals `key`, if any.
pub fn index_for_key(arr: &[Value], key: &str) -> Option<usize> {
    arr.iter()
        .position(|item| item.get(KEY_FIELD).and_then(Value::as_str) == Some(key))
}

/// Map a possibly negative index onto `0..len`. Negative counts from the end.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        let idx = index as usize;
        (idx < len).then_some(idx)
    } else {
        len.checked_sub(index.unsigned_abs() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_nested_field() {
        let doc = json!({"a": {"b": 42}});
        let path = Path::parse("a.b").unwrap();
        assert_eq!(resolve(&doc, &path), Some(&json!(42)));
    }

    #[test]
    fn resolve_index_and_negative_index() {
        let doc = json!({"arr": [10, 20, 30]});
        assert_eq!(
            resolve(&doc, &Path::parse("arr[1]").unwrap()),
            Some(&json!(20))
        );
        assert_eq!(
            resolve(&doc, &Path::parse("arr[-1]").unwrap()),
            Some(&json!(30))
        );
    }

    #[test]
    fn resolve_keyed_selector() {
        let doc = json!({"items": [{"_key": "a", "v": 1}, {"_key": "b", "v": 2}]});
        let path = Path::parse("items[_key==\"b\"].v").unwrap();
        assert_eq!(resolve(&doc, &path), Some(&json!(2)));
    }

    #[test]
    fn resolve_missing_returns_none() {
        let doc = json!({"a": 1});
        assert_eq!(resolve(&doc, &Path::parse("b").unwrap()), None);
        assert_eq!(resolve(&doc, &Path::parse("a.b").unwrap()), None);
    }

    #[test]
    fn resolve_index_out_of_bounds() {
        let doc = json!({"arr": [1]});
        assert_eq!(resolve(&doc, &Path::parse("arr[5]").unwrap()), None);
        assert_eq!(resolve(&doc, &Path::parse("arr[-2]").unwrap()), None);
    }
}
