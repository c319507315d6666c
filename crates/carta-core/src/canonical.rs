//! Canonical JSON serialization for deterministic record fingerprints.
//!
//! Canonical JSON here has:
//! - Object keys sorted lexicographically (UTF-8 byte order)
//! - No whitespace
//! - UTF-8 output
//!
//! Numbers are written through `serde_json`'s formatter, which is
//! deterministic for a given value, so two documents with equal content
//! always produce identical bytes regardless of key insertion order.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha512};

use crate::error::{Error, Result};

/// Serializes `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if string escaping fails (which only
/// happens on an I/O error, and writing to a `Vec` cannot fail in practice).
#[must_use = "canonical bytes should be used for hashing"]
pub fn to_canonical_bytes(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::<u8>::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Computes a hex digest of `value`'s canonical JSON form.
///
/// The digest is SHA-512 truncated to `len` hex characters. Callers pick the
/// truncation that suits their comparison surface; the full digest is 128
/// characters.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if canonicalization fails.
pub fn canonical_digest(value: &Value, len: usize) -> Result<String> {
    let bytes = to_canonical_bytes(value)?;
    let mut digest = hex::encode(Sha512::digest(&bytes));
    digest.truncate(len.min(digest.len()));
    Ok(digest)
}

fn write_value(v: &Value, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out)?,
        Value::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) -> Result<()> {
    out.push(b'{');

    // Sort keys deterministically by UTF-8 byte order.
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        write_string(k, out)?;
        out.push(b':');
        if let Some(val) = map.get(*k) {
            write_value(val, out)?;
        }
    }

    out.push(b'}');
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> Result<()> {
    // serde_json writes the quoted, escaped form with no whitespace.
    serde_json::to_writer(&mut *out, s).map_err(|e| Error::Serialization {
        message: format!("canonical string write failed: {e}"),
    })
}

fn write_number(n: &Number, out: &mut Vec<u8>) {
    // serde_json's number formatting is deterministic for a given value.
    out.extend_from_slice(n.to_string().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: &Value) -> String {
        String::from_utf8(to_canonical_bytes(v).unwrap()).unwrap()
    }

    #[test]
    fn sorts_object_keys_and_has_no_whitespace() {
        let v = json!({"site":"ICECUBE","archive":true});
        assert_eq!(canon(&v), r#"{"archive":true,"site":"ICECUBE"}"#);
    }

    #[test]
    fn sorts_nested_objects_recursively() {
        let v = json!({"b": {"d": 2, "c": 1}, "a": 0});
        assert_eq!(canon(&v), r#"{"a":0,"b":{"c":1,"d":2}}"#);
    }

    #[test]
    fn preserves_array_order() {
        let v = json!([3, 2, 1]);
        assert_eq!(canon(&v), "[3,2,1]");
    }

    #[test]
    fn accepts_floats() {
        // Domain metadata is arbitrary JSON; float attributes are legal.
        let v = json!({"x": 1.25});
        assert_eq!(canon(&v), r#"{"x":1.25}"#);
    }

    #[test]
    fn string_escaping_is_stable() {
        let v = json!({"s": "a\"b\nc"});
        assert_eq!(canon(&v), r#"{"s":"a\"b\nc"}"#);
    }

    #[test]
    fn digest_is_stable_and_truncated() {
        let v = json!({"logical_name": "/data/exp/f.dat"});
        let d1 = canonical_digest(&v, 32).unwrap();
        let d2 = canonical_digest(&v, 32).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 32);
        assert!(d1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_differs_on_content_change() {
        let a = canonical_digest(&json!({"n": 1}), 32).unwrap();
        let b = canonical_digest(&json!({"n": 2}), 32).unwrap();
        assert_ne!(a, b);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;
        use std::collections::{BTreeMap, HashMap};

        proptest! {
            #[test]
            fn insertion_order_does_not_affect_canonical_output(
                pairs in prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{1,16}"), 1..10)
            ) {
                let hashmap: HashMap<String, String> = pairs.iter().cloned().collect();
                let btreemap: BTreeMap<String, String> = pairs.iter().cloned().collect();

                let from_hash = canon(&serde_json::to_value(&hashmap).unwrap());
                let from_btree = canon(&serde_json::to_value(&btreemap).unwrap());

                prop_assert_eq!(from_hash, from_btree);
            }

            #[test]
            fn same_content_same_digest(
                pairs in prop::collection::vec(("[a-z]{1,5}", -1000i64..1000i64), 1..5)
            ) {
                let map1: BTreeMap<String, i64> = pairs.iter().cloned().collect();
                let map2: BTreeMap<String, i64> = pairs.iter().cloned().collect();

                let d1 = canonical_digest(&serde_json::to_value(&map1).unwrap(), 64).unwrap();
                let d2 = canonical_digest(&serde_json::to_value(&map2).unwrap(), 64).unwrap();

                prop_assert_eq!(d1, d2);
            }
        }
    }
}
