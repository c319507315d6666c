//! Record validation: mandatory fields, forbidden fields, checksum format,
//! and location shape.
//!
//! The validators are pure functions over candidate (and prior) documents;
//! callers translate rejections into protocol errors. Location entries are
//! validated for the presence of `site`/`path` only — semantic path
//! legality is the concern of importer tooling, not the catalog.

use serde_json::Value;

use crate::error::{CatalogError, Result};
use crate::fieldpath::{Resolution, resolve};
use crate::record::{FINGERPRINT_FIELD, MODIFY_DATE_FIELD};

use carta_core::store::INTERNAL_ID_FIELD;

/// Fields a creation request may not supply at all.
///
/// `uuid` is deliberately absent: clients may supply record identity at
/// creation time.
pub const FORBIDDEN_CREATION_FIELDS: &[&str] =
    &[INTERNAL_ID_FIELD, MODIFY_DATE_FIELD, FINGERPRINT_FIELD];

/// Fields an update may not change. An update that is silent on them, or
/// repeats the stored value, is fine.
pub const FORBIDDEN_UPDATE_FIELDS: &[&str] = &[
    INTERNAL_ID_FIELD,
    "uuid",
    "logical_name",
    "checksum.sha512",
    MODIFY_DATE_FIELD,
    FINGERPRINT_FIELD,
];

/// Mandatory fields, in the order they are checked and reported.
pub const MANDATORY_FIELDS: &[&str] = &[
    "uuid",
    "logical_name",
    "locations",
    "file_size",
    "checksum.sha512",
];

/// Validates a record candidate for creation.
///
/// # Errors
///
/// [`CatalogError::ForbiddenField`] when a server-owned field is supplied;
/// otherwise whatever [`validate_required`] reports.
pub fn validate_creation(candidate: &Value) -> Result<()> {
    for field in FORBIDDEN_CREATION_FIELDS {
        if resolve(candidate, field).is_found() {
            return Err(CatalogError::ForbiddenField {
                field: (*field).to_string(),
            });
        }
    }
    validate_required(candidate)
}

/// Validates a record candidate for modification against the stored record.
///
/// # Errors
///
/// [`CatalogError::ForbiddenField`] when an immutable field would change;
/// otherwise whatever [`validate_required`] reports.
pub fn validate_modification(candidate: &Value, prior: &Value) -> Result<()> {
    forbidden_drift(candidate, prior)?;
    validate_required(candidate)
}

/// Rejects a candidate (or raw patch) that changes an immutable field.
///
/// A field is rejected when it is present in `candidate` and its resolved
/// value differs from the value resolved in `prior`; a field absent from
/// `prior` counts as differing.
///
/// # Errors
///
/// [`CatalogError::ForbiddenField`] naming the first drifting field.
pub fn forbidden_drift(candidate: &Value, prior: &Value) -> Result<()> {
    for field in FORBIDDEN_UPDATE_FIELDS {
        let Resolution::Found(candidate_value) = resolve(candidate, field) else {
            continue;
        };
        let drifted = match resolve(prior, field) {
            Resolution::Found(prior_value) => prior_value != candidate_value,
            Resolution::Missing | Resolution::NotTraversable => true,
        };
        if drifted {
            return Err(CatalogError::ForbiddenField {
                field: (*field).to_string(),
            });
        }
    }
    Ok(())
}

/// Validates mandatory fields and their shape.
///
/// Mandatory presence is checked in [`MANDATORY_FIELDS`] order,
/// short-circuiting at the first missing field; then the checksum format and
/// location list shape are validated.
///
/// # Errors
///
/// [`CatalogError::Validation`] naming the offending field.
pub fn validate_required(candidate: &Value) -> Result<()> {
    for field in MANDATORY_FIELDS {
        if !resolve(candidate, field).is_found() {
            return Err(CatalogError::validation(format!(
                "mandatory field missing: {field}"
            )));
        }
    }

    let uuid = resolve(candidate, "uuid");
    if !matches!(uuid.value(), Some(Value::String(_))) {
        return Err(CatalogError::validation("uuid must be a string"));
    }
    if !matches!(
        resolve(candidate, "logical_name").value(),
        Some(Value::String(s)) if !s.is_empty()
    ) {
        return Err(CatalogError::validation(
            "logical_name must be a non-empty string",
        ));
    }

    validate_checksum(candidate)?;
    validate_file_size(candidate)?;
    validate_locations(candidate)
}

fn validate_checksum(candidate: &Value) -> Result<()> {
    let Some(checksum) = resolve(candidate, "checksum").value() else {
        return Err(CatalogError::validation("mandatory field missing: checksum"));
    };
    if !checksum.is_object() {
        return Err(CatalogError::validation(
            "checksum must be an object containing sha512",
        ));
    }
    let Some(Value::String(sha512)) = resolve(candidate, "checksum.sha512").value() else {
        return Err(CatalogError::validation("checksum.sha512 must be a string"));
    };
    if !is_sha512_hex(sha512) {
        return Err(CatalogError::validation(
            "checksum.sha512 must be 128 hexadecimal characters",
        ));
    }
    Ok(())
}

fn validate_file_size(candidate: &Value) -> Result<()> {
    match resolve(candidate, "file_size").value() {
        Some(Value::Number(n)) if n.as_u64().is_some() => Ok(()),
        _ => Err(CatalogError::validation(
            "file_size must be a non-negative integer",
        )),
    }
}

fn validate_locations(candidate: &Value) -> Result<()> {
    let Some(Value::Array(locations)) = resolve(candidate, "locations").value() else {
        return Err(CatalogError::validation("locations must be a list"));
    };
    if locations.is_empty() {
        return Err(CatalogError::validation("locations must not be empty"));
    }
    for entry in locations {
        let Value::Object(map) = entry else {
            return Err(CatalogError::validation(
                "locations entries must be objects",
            ));
        };
        for key in ["site", "path"] {
            match map.get(key) {
                Some(Value::String(s)) if !s.is_empty() => {}
                _ => {
                    return Err(CatalogError::validation(format!(
                        "locations entries require a non-empty {key}"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Case-insensitive 128-character hex check.
fn is_sha512_hex(s: &str) -> bool {
    s.len() == 128 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sha512_hex() -> String {
        "Ab".repeat(64)
    }

    fn candidate() -> Value {
        json!({
            "uuid": "a4a30736-7d33-4b1a-b7e6-6cb90d8e2f3d",
            "logical_name": "/data/exp/2015/f.dat",
            "checksum": {"sha512": sha512_hex()},
            "file_size": 1024,
            "locations": [{"site": "WIPAC", "path": "/data/exp/2015/f.dat"}],
        })
    }

    #[test]
    fn valid_candidate_passes_creation() {
        assert!(validate_creation(&candidate()).is_ok());
    }

    #[test]
    fn creation_rejects_server_owned_fields() {
        for field in ["_id", "meta_modify_date", "meta_fingerprint"] {
            let mut doc = candidate();
            doc.as_object_mut().unwrap().insert(field.into(), json!("x"));
            let err = validate_creation(&doc).unwrap_err();
            assert!(
                matches!(err, CatalogError::ForbiddenField { field: ref f } if f == field),
                "expected forbidden-field for {field}"
            );
        }
    }

    #[test]
    fn creation_allows_client_supplied_uuid() {
        assert!(validate_creation(&candidate()).is_ok());
    }

    #[test]
    fn first_missing_mandatory_field_is_named() {
        let mut doc = candidate();
        let map = doc.as_object_mut().unwrap();
        map.remove("file_size");
        map.remove("checksum");
        // locations precedes file_size in check order; removing it too must
        // shift the reported field.
        let err = validate_required(&doc).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("file_size")
        ));

        let mut doc = candidate();
        doc.as_object_mut().unwrap().remove("locations");
        doc.as_object_mut().unwrap().remove("file_size");
        let err = validate_required(&doc).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("locations")
        ));
    }

    #[test]
    fn bad_checksum_format_is_rejected() {
        let mut doc = candidate();
        doc.as_object_mut()
            .unwrap()
            .insert("checksum".into(), json!({"sha512": "not-hex"}));
        let err = validate_required(&doc).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("hexadecimal")
        ));
    }

    #[test]
    fn checksum_must_be_an_object() {
        let mut doc = candidate();
        doc.as_object_mut()
            .unwrap()
            .insert("checksum".into(), json!("abc"));
        // A scalar checksum makes checksum.sha512 unresolvable, so the
        // mandatory check names it first.
        let err = validate_required(&doc).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("checksum.sha512")
        ));
    }

    #[test]
    fn mixed_case_sha512_is_accepted() {
        let mut doc = candidate();
        doc.as_object_mut()
            .unwrap()
            .insert("checksum".into(), json!({"sha512": "aB".repeat(64)}));
        assert!(validate_required(&doc).is_ok());
    }

    #[test]
    fn file_size_must_be_non_negative_integer() {
        for bad in [json!(-1), json!(1.5), json!("1024")] {
            let mut doc = candidate();
            doc.as_object_mut().unwrap().insert("file_size".into(), bad);
            let err = validate_required(&doc).unwrap_err();
            assert!(matches!(
                err,
                CatalogError::Validation { ref message } if message.contains("file_size")
            ));
        }
    }

    #[test]
    fn empty_locations_are_rejected() {
        let mut doc = candidate();
        doc.as_object_mut()
            .unwrap()
            .insert("locations".into(), json!([]));
        let err = validate_required(&doc).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("locations")
        ));
    }

    #[test]
    fn location_entries_require_site_and_path() {
        let mut doc = candidate();
        doc.as_object_mut()
            .unwrap()
            .insert("locations".into(), json!([{"site": "WIPAC"}]));
        let err = validate_required(&doc).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation { ref message } if message.contains("path")
        ));

        let mut doc = candidate();
        doc.as_object_mut()
            .unwrap()
            .insert("locations".into(), json!([{"site": "", "path": "/p"}]));
        assert!(validate_required(&doc).is_err());
    }

    #[test]
    fn modification_rejects_changed_immutable_fields() {
        let prior = candidate();

        let mut changed = candidate();
        changed
            .as_object_mut()
            .unwrap()
            .insert("logical_name".into(), json!("/other.dat"));
        let err = validate_modification(&changed, &prior).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::ForbiddenField { ref field } if field == "logical_name"
        ));

        let mut changed = candidate();
        changed
            .as_object_mut()
            .unwrap()
            .insert("checksum".into(), json!({"sha512": "00".repeat(64)}));
        let err = validate_modification(&changed, &prior).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::ForbiddenField { ref field } if field == "checksum.sha512"
        ));
    }

    #[test]
    fn modification_allows_repeating_stored_values() {
        let prior = candidate();
        assert!(validate_modification(&candidate(), &prior).is_ok());
    }

    #[test]
    fn field_absent_from_prior_counts_as_drift() {
        let mut prior = candidate();
        prior.as_object_mut().unwrap().remove("checksum");

        let err = forbidden_drift(&candidate(), &prior).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::ForbiddenField { ref field } if field == "checksum.sha512"
        ));
    }

    #[test]
    fn patch_silent_on_forbidden_fields_passes_drift_check() {
        let prior = candidate();
        let patch = json!({"file_size": 2048});
        assert!(forbidden_drift(&patch, &prior).is_ok());
    }
}
