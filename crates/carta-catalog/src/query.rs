//! Query shaping: ad-hoc request parameters normalized into one canonical
//! filter document plus projection and pagination bounds.
//!
//! Shortcut parameters map onto canonical fields and overwrite whatever the
//! free-form `query` document says for the same field (last-applied wins, in
//! a fixed order). Pagination is clamped, never rejected, when the caller
//! asks for more than the server allows; non-numeric or non-positive bounds
//! are rejected.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use carta_core::store::Projection;

use crate::error::{CatalogError, Result};

/// Operators the free-form `query` document may use; passed through to the
/// store untouched.
const ALLOWED_OPERATORS: &[&str] = &["$regex", "$lte", "$gte", "$elemMatch", "$nin", "$in"];

/// Delimiter for the `keys` parameter.
const KEYS_DELIMITER: char = '|';

/// Server-side bounds applied to every find.
#[derive(Debug, Clone)]
pub struct QueryLimits {
    /// Hard cap on page size; requested limits above this are clamped.
    pub max_page_size: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_page_size: 10_000,
        }
    }
}

/// A normalized find: canonical filter, projection, and pagination.
#[derive(Debug, Clone)]
pub struct CanonicalQuery {
    /// Canonical filter document for the store.
    pub filter: Value,
    /// Field selection.
    pub projection: Projection,
    /// Result offset.
    pub skip: u64,
    /// Result cap, already clamped to the server maximum.
    pub limit: u64,
}

/// Builds a canonical find from a flat map of query parameters.
///
/// # Errors
///
/// [`CatalogError::Validation`] for an unparseable `query` document, an
/// operator outside the supported subset, or malformed `limit`/`start`/
/// shortcut values.
pub fn build_find_query(
    params: &HashMap<String, String>,
    limits: &QueryLimits,
) -> Result<CanonicalQuery> {
    let mut filter = base_filter(params)?;

    if let Some(cond) = path_family_condition(params)? {
        filter.insert("logical_name".to_string(), cond);
    }
    apply_shortcuts(params, &mut filter)?;

    // Default listing excludes records whose locations are archived; callers
    // must constrain the flag themselves to see them.
    if !filter.contains_key("locations.archive") {
        filter.insert("locations.archive".to_string(), Value::Null);
    }

    Ok(CanonicalQuery {
        filter: Value::Object(filter),
        projection: projection(params),
        skip: parse_start(params)?,
        limit: parse_limit(params, limits)?,
    })
}

fn base_filter(params: &HashMap<String, String>) -> Result<Map<String, Value>> {
    let Some(raw) = params.get("query") else {
        return Ok(Map::new());
    };
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| CatalogError::validation(format!("unparseable query document: {e}")))?;
    let Value::Object(map) = parsed else {
        return Err(CatalogError::validation("query must be a JSON object"));
    };
    validate_operators(&Value::Object(map.clone()))?;
    Ok(map)
}

/// Rejects operators outside the supported subset, recursively.
fn validate_operators(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.starts_with('$') && !ALLOWED_OPERATORS.contains(&key.as_str()) {
                    return Err(CatalogError::validation(format!(
                        "unsupported query operator: {key}"
                    )));
                }
                validate_operators(child)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_operators(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Resolves the path-family arguments into one `logical_name` condition.
///
/// Precedence: `directory`/`filename` > `logical_name`/`path` >
/// `path-regex`. Only the highest-precedence argument present applies; the
/// rest are discarded rather than combined.
fn path_family_condition(params: &HashMap<String, String>) -> Result<Option<Value>> {
    let directory = params.get("directory").map(String::as_str);
    let filename = params.get("filename").map(String::as_str);

    if directory.is_some() || filename.is_some() {
        let pattern = match (directory, filename) {
            (Some(dir), Some(file)) => format!(
                "^{}(/.*)?/{}$",
                regex_escape(dir.trim_end_matches('/')),
                regex_escape(file)
            ),
            (Some(dir), None) => format!("^{}(/|$)", regex_escape(dir.trim_end_matches('/'))),
            (None, Some(file)) => format!("(^|/){}$", regex_escape(file)),
            (None, None) => unreachable!(),
        };
        return Ok(Some(json!({"$regex": pattern})));
    }

    if let Some(name) = params.get("logical_name").or_else(|| params.get("path")) {
        return Ok(Some(Value::String(name.clone())));
    }

    if let Some(pattern) = params.get("path-regex") {
        return Ok(Some(json!({"$regex": pattern})));
    }

    Ok(None)
}

/// Applies the shortcut parameters, last-wins, in canonical order.
fn apply_shortcuts(params: &HashMap<String, String>, filter: &mut Map<String, Value>) -> Result<()> {
    if let Some(raw) = params.get("run_number") {
        filter.insert("run.run_number".to_string(), int_param("run_number", raw)?);
    }
    if let Some(raw) = params.get("dataset") {
        filter.insert("iceprod.dataset".to_string(), int_param("dataset", raw)?);
    }
    if let Some(raw) = params.get("event_id") {
        let event = int_param("event_id", raw)?;
        filter.insert("run.first_event".to_string(), json!({"$lte": event}));
        filter.insert("run.last_event".to_string(), json!({"$gte": event}));
    }
    if let Some(level) = params.get("processing_level") {
        filter.insert(
            "processing_level".to_string(),
            Value::String(level.clone()),
        );
    }
    if let Some(raw) = params.get("season") {
        // Seasons are usually years, but named seasons exist in older data.
        let value = raw
            .parse::<i64>()
            .map_or_else(|_| Value::String(raw.clone()), Value::from);
        filter.insert("offline_processing_metadata.season".to_string(), value);
    }
    Ok(())
}

fn int_param(name: &str, raw: &str) -> Result<Value> {
    raw.parse::<i64>()
        .map(Value::from)
        .map_err(|_| CatalogError::validation(format!("{name} must be an integer")))
}

/// Parses `start`/`limit` alone, with the same clamping rules as
/// [`build_find_query`]. Used by listings that take no filter parameters.
///
/// # Errors
///
/// [`CatalogError::Validation`] for non-numeric or non-positive bounds.
pub fn parse_pagination(
    params: &HashMap<String, String>,
    limits: &QueryLimits,
) -> Result<(u64, u64)> {
    Ok((parse_start(params)?, parse_limit(params, limits)?))
}

fn parse_limit(params: &HashMap<String, String>, limits: &QueryLimits) -> Result<u64> {
    let Some(raw) = params.get("limit") else {
        return Ok(limits.max_page_size);
    };
    let limit: i64 = raw
        .parse()
        .map_err(|_| CatalogError::validation("limit must be a positive integer"))?;
    if limit <= 0 {
        return Err(CatalogError::validation("limit must be a positive integer"));
    }
    // Over-asking is clamped, never an error.
    Ok(u64::try_from(limit).unwrap_or(u64::MAX).min(limits.max_page_size))
}

fn parse_start(params: &HashMap<String, String>) -> Result<u64> {
    let Some(raw) = params.get("start") else {
        return Ok(0);
    };
    raw.parse::<u64>()
        .map_err(|_| CatalogError::validation("start must be a non-negative integer"))
}

fn projection(params: &HashMap<String, String>) -> Projection {
    if params
        .get("all-keys")
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    {
        return Projection::All;
    }
    if let Some(keys) = params.get("keys") {
        let fields: Vec<String> = keys
            .split(KEYS_DELIMITER)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if !fields.is_empty() {
            return Projection::Fields(fields);
        }
    }
    Projection::ExcludeInternal
}

/// Escapes regex metacharacters in a literal path fragment.
fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn build(pairs: &[(&str, &str)]) -> CanonicalQuery {
        build_find_query(&params(pairs), &QueryLimits::default()).unwrap()
    }

    #[test]
    fn empty_params_default_to_archive_exclusion_and_max_limit() {
        let q = build(&[]);
        assert_eq!(q.filter, json!({"locations.archive": null}));
        assert_eq!(q.limit, 10_000);
        assert_eq!(q.skip, 0);
        assert!(matches!(q.projection, Projection::ExcludeInternal));
    }

    #[test]
    fn shortcut_params_map_to_canonical_fields() {
        let q = build(&[
            ("run_number", "12345"),
            ("dataset", "20001"),
            ("event_id", "400"),
            ("processing_level", "L2"),
            ("season", "2015"),
        ]);
        let f = q.filter.as_object().unwrap();
        assert_eq!(f.get("run.run_number"), Some(&json!(12345)));
        assert_eq!(f.get("iceprod.dataset"), Some(&json!(20001)));
        assert_eq!(f.get("run.first_event"), Some(&json!({"$lte": 400})));
        assert_eq!(f.get("run.last_event"), Some(&json!({"$gte": 400})));
        assert_eq!(f.get("processing_level"), Some(&json!("L2")));
        assert_eq!(
            f.get("offline_processing_metadata.season"),
            Some(&json!(2015))
        );
    }

    #[test]
    fn shortcuts_overwrite_free_form_query() {
        let q = build(&[
            ("query", r#"{"run.run_number": 1, "custom": "kept"}"#),
            ("run_number", "2"),
        ]);
        let f = q.filter.as_object().unwrap();
        assert_eq!(f.get("run.run_number"), Some(&json!(2)));
        assert_eq!(f.get("custom"), Some(&json!("kept")));
    }

    #[test]
    fn non_integer_shortcut_is_rejected() {
        let err = build_find_query(&params(&[("run_number", "abc")]), &QueryLimits::default())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation { .. }));
    }

    #[test]
    fn free_form_operators_pass_through() {
        let q = build(&[(
            "query",
            r#"{"file_size": {"$gte": 100, "$lte": 200}, "uuid": {"$in": ["a"]}}"#,
        )]);
        let f = q.filter.as_object().unwrap();
        assert_eq!(f.get("file_size"), Some(&json!({"$gte": 100, "$lte": 200})));
    }

    #[test]
    fn unsupported_operator_is_rejected() {
        let err = build_find_query(
            &params(&[("query", r#"{"file_size": {"$where": "1"}}"#)]),
            &QueryLimits::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("$where")
        ));
    }

    #[test]
    fn unparseable_query_is_rejected() {
        let err = build_find_query(&params(&[("query", "{nope")]), &QueryLimits::default())
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation { .. }));
    }

    #[test]
    fn archive_constraint_in_query_suppresses_default() {
        let q = build(&[("query", r#"{"locations.archive": true}"#)]);
        assert_eq!(
            q.filter.as_object().unwrap().get("locations.archive"),
            Some(&json!(true))
        );
    }

    #[test]
    fn limit_is_clamped_not_rejected() {
        let q = build(&[("limit", "999999999")]);
        assert_eq!(q.limit, 10_000);

        let q = build(&[("limit", "50")]);
        assert_eq!(q.limit, 50);
    }

    #[test]
    fn non_positive_or_non_numeric_limit_is_rejected() {
        for bad in ["0", "-1", "ten"] {
            let err =
                build_find_query(&params(&[("limit", bad)]), &QueryLimits::default()).unwrap_err();
            assert!(matches!(err, CatalogError::Validation { .. }), "limit={bad}");
        }
    }

    #[test]
    fn negative_start_is_rejected() {
        let err =
            build_find_query(&params(&[("start", "-5")]), &QueryLimits::default()).unwrap_err();
        assert!(matches!(err, CatalogError::Validation { .. }));

        let q = build(&[("start", "20")]);
        assert_eq!(q.skip, 20);
    }

    #[test]
    fn keys_select_projection() {
        let q = build(&[("keys", "uuid|logical_name")]);
        match q.projection {
            Projection::Fields(fields) => {
                assert_eq!(fields, vec!["uuid".to_string(), "logical_name".to_string()]);
            }
            other => panic!("unexpected projection {other:?}"),
        }
    }

    #[test]
    fn all_keys_bypasses_projection() {
        let q = build(&[("all-keys", "true"), ("keys", "uuid")]);
        assert!(matches!(q.projection, Projection::All));
    }

    #[test]
    fn logical_name_is_exact_match() {
        let q = build(&[("logical_name", "/a/b.dat")]);
        assert_eq!(
            q.filter.as_object().unwrap().get("logical_name"),
            Some(&json!("/a/b.dat"))
        );
    }

    #[test]
    fn directory_and_filename_outrank_exact_and_regex() {
        let q = build(&[
            ("directory", "/data/exp"),
            ("filename", "f.dat"),
            ("logical_name", "/ignored"),
            ("path-regex", "ignored"),
        ]);
        let cond = q.filter.as_object().unwrap().get("logical_name").unwrap();
        let pattern = cond.get("$regex").unwrap().as_str().unwrap();
        assert_eq!(pattern, r"^/data/exp(/.*)?/f\.dat$");
    }

    #[test]
    fn exact_outranks_path_regex() {
        let q = build(&[("path", "/a/b.dat"), ("path-regex", "^/a/.*")]);
        assert_eq!(
            q.filter.as_object().unwrap().get("logical_name"),
            Some(&json!("/a/b.dat"))
        );
    }

    #[test]
    fn directory_pattern_matches_nested_files() {
        let q = build(&[("directory", "/data/exp/")]);
        let cond = q.filter.as_object().unwrap().get("logical_name").unwrap();
        let pattern = cond.get("$regex").unwrap().as_str().unwrap();
        let re = regex::Regex::new(pattern).unwrap();
        assert!(re.is_match("/data/exp/f.dat"));
        assert!(re.is_match("/data/exp/2015/deep/f.dat"));
        assert!(!re.is_match("/data/exposure/f.dat"));
    }

    #[test]
    fn filename_pattern_anchors_to_suffix() {
        let q = build(&[("filename", "f.dat")]);
        let cond = q.filter.as_object().unwrap().get("logical_name").unwrap();
        let pattern = cond.get("$regex").unwrap().as_str().unwrap();
        let re = regex::Regex::new(pattern).unwrap();
        assert!(re.is_match("/data/exp/f.dat"));
        assert!(re.is_match("f.dat"));
        assert!(!re.is_match("/data/exp/xf.dat"));
        assert!(!re.is_match("/data/f.dat.gz"));
    }
}
