//! Filter-document evaluation for the in-memory document store.
//!
//! Implements the operator subset the catalog passes through to the store:
//! `$regex`, `$lte`, `$gte`, `$in`, `$nin`, `$elemMatch`, plus plain
//! equality. Semantics follow document-store conventions:
//!
//! - dotted paths descend nested objects and fan out across array elements;
//! - equality against `null` matches a missing field as well as an explicit
//!   null (this is what makes the default archive-exclusion filter work);
//! - `$nin` matches when the field is missing entirely.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Returns true when `doc` satisfies `filter`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a non-object filter, an unsupported
/// operator, or a malformed operator argument (e.g. an invalid `$regex`).
pub fn matches(doc: &Value, filter: &Value) -> Result<bool> {
    let Value::Object(conditions) = filter else {
        return Err(Error::InvalidInput(
            "filter must be a JSON object".to_string(),
        ));
    };

    for (path, cond) in conditions {
        if path.starts_with('$') {
            return Err(Error::InvalidInput(format!(
                "unsupported top-level query operator: {path}"
            )));
        }
        if !match_condition(doc, path, cond)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn match_condition(doc: &Value, path: &str, cond: &Value) -> Result<bool> {
    if let Value::Object(obj) = cond {
        if obj.keys().any(|k| k.starts_with('$')) {
            return operators_match(&candidates(doc, path), obj);
        }
    }

    if cond.is_null() {
        // Null equality matches absent-or-null, including array elements
        // that lack the field entirely.
        let segments: Vec<&str> = path.split('.').collect();
        return Ok(missing_or_null(doc, &segments));
    }

    Ok(equality_match(&candidates(doc, path), cond))
}

/// True when some traversal of `segments` ends at a missing field or an
/// explicit null. Array elements are checked individually, so a document
/// whose array has one entry without the field matches.
fn missing_or_null(value: &Value, segments: &[&str]) -> bool {
    let Some((seg, rest)) = segments.split_first() else {
        return value.is_null();
    };
    match value {
        Value::Object(map) => map.get(*seg).is_none_or(|child| missing_or_null(child, rest)),
        Value::Array(items) => items.iter().any(|item| match item {
            Value::Object(map) => map.get(*seg).is_none_or(|child| missing_or_null(child, rest)),
            _ => true,
        }),
        _ => true,
    }
}

/// Resolves `path` against `value`, fanning out across arrays.
///
/// Returns every value the dotted path can reach; empty means the field is
/// missing.
fn candidates<'a>(value: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut current = vec![value];
    for segment in path.split('.') {
        let mut next = Vec::new();
        for v in current {
            match v {
                Value::Object(map) => {
                    if let Some(child) = map.get(segment) {
                        next.push(child);
                    }
                }
                Value::Array(items) => {
                    if let Ok(idx) = segment.parse::<usize>() {
                        if let Some(child) = items.get(idx) {
                            next.push(child);
                        }
                    }
                    for item in items {
                        if let Value::Object(map) = item {
                            if let Some(child) = map.get(segment) {
                                next.push(child);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
        if current.is_empty() {
            break;
        }
    }
    current
}

/// Each candidate plus, for array candidates, their elements.
fn expand<'a>(cands: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(cands.len());
    for v in cands {
        out.push(*v);
        if let Value::Array(items) = v {
            out.extend(items.iter());
        }
    }
    out
}

fn equality_match(cands: &[&Value], expected: &Value) -> bool {
    cands.iter().any(|v| {
        *v == expected
            || matches!(v, Value::Array(items) if items.iter().any(|item| item == expected))
    })
}

fn operators_match(cands: &[&Value], ops: &Map<String, Value>) -> Result<bool> {
    let expanded = expand(cands);
    for (op, arg) in ops {
        let hit = match op.as_str() {
            "$regex" => regex_match(&expanded, arg)?,
            "$lte" => ordered_match(&expanded, arg, |o| o != Ordering::Greater),
            "$gte" => ordered_match(&expanded, arg, |o| o != Ordering::Less),
            "$in" => in_match(&expanded, arg, op)?,
            "$nin" => !in_match(&expanded, arg, op)?,
            "$elemMatch" => elem_match(cands, arg)?,
            other => {
                return Err(Error::InvalidInput(format!(
                    "unsupported query operator: {other}"
                )));
            }
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn regex_match(cands: &[&Value], arg: &Value) -> Result<bool> {
    let Value::String(pattern) = arg else {
        return Err(Error::InvalidInput(
            "$regex argument must be a string".to_string(),
        ));
    };
    let re = Regex::new(pattern)
        .map_err(|e| Error::InvalidInput(format!("invalid $regex pattern: {e}")))?;
    Ok(cands
        .iter()
        .any(|v| matches!(v, Value::String(s) if re.is_match(s))))
}

fn ordered_match(cands: &[&Value], arg: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    cands
        .iter()
        .any(|v| value_cmp(v, arg).is_some_and(&accept))
}

fn in_match(cands: &[&Value], arg: &Value, op: &str) -> Result<bool> {
    let Value::Array(allowed) = arg else {
        return Err(Error::InvalidInput(format!(
            "{op} argument must be an array"
        )));
    };
    Ok(cands
        .iter()
        .any(|v| allowed.iter().any(|allowed_value| *v == allowed_value)))
}

fn elem_match(cands: &[&Value], arg: &Value) -> Result<bool> {
    let Value::Object(sub) = arg else {
        return Err(Error::InvalidInput(
            "$elemMatch argument must be an object".to_string(),
        ));
    };
    for v in cands {
        let Value::Array(items) = v else { continue };
        for item in items {
            if element_satisfies(item, sub)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn element_satisfies(element: &Value, sub: &Map<String, Value>) -> Result<bool> {
    for (key, cond) in sub {
        let hit = if key.starts_with('$') {
            // Operator applied to the element itself.
            let mut single = Map::new();
            single.insert(key.clone(), cond.clone());
            operators_match(&[element], &single)?
        } else {
            match_condition(element, key, cond)?
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}
