//! Stable key maintenance for keyed arrays.
//!
//! Array elements addressed by keyed selectors need a `_key` field. Values
//! introduced by `set`/`setIfMissing`/`insert` may lack one; after each such
//! operation the document is walked and missing keys are generated, so
//! follow-up patches can address the new elements resiliently.

use rand::Rng;
use serde_json::Value;

use editstore_path::KEY_FIELD;

const KEY_LEN: usize = 12;

/// Generate a random lowercase-hex key for an array element.
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    (0..KEY_LEN)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            char::from_digit(n as u32, 16).unwrap_or('0')
        })
        .collect()
}

/// Walk `value` and give every object element of every array a `_key`.
///
/// Arrays of primitives are left alone. Existing keys are never rewritten.
pub fn ensure_array_keys_deep(value: &mut Value) {
    match value {
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                if let Value::Object(map) = item {
                    if !map.contains_key(KEY_FIELD) {
                        map.insert(KEY_FIELD.to_owned(), Value::String(generate_key()));
                    }
                }
                ensure_array_keys_deep(item);
            }
        }
        Value::Object(map) => {
            for (_, nested) in map.iter_mut() {
                ensure_array_keys_deep(nested);
            }
        }
        _ => {}
    }
}
