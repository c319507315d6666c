//! File record API routes.
//!
//! ## Routes
//!
//! - `POST   /files` - Create a record (or register a replica)
//! - `GET    /files` - Query records
//! - `GET    /files/{uuid}` - Get a record; serves its fingerprint as `ETag`
//! - `PUT    /files/{uuid}` - Replace a record; honors `If-Match`
//! - `PATCH  /files/{uuid}` - Partially update a record; honors `If-Match`
//! - `DELETE /files/{uuid}` - Delete a record

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use utoipa::ToSchema;

use carta_catalog::query::build_find_query;
use carta_catalog::record::FINGERPRINT_FIELD;
use carta_catalog::CreateOutcome;
use carta_core::FileUuid;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::routes::{ResourceLinks, links};
use crate::server::AppState;

/// Response referencing one file record.
#[derive(Debug, Serialize, ToSchema)]
pub struct FileRefResponse {
    /// Hypermedia links.
    #[serde(rename = "_links")]
    pub links: ResourceLinks,
    /// URL of the record.
    pub file: String,
    /// uuid of the record.
    pub uuid: String,
}

/// Creates file routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files", post(create_file).get(list_files))
        .route(
            "/files/:uuid",
            get(get_file)
                .put(replace_file)
                .patch(patch_file)
                .delete(delete_file),
        )
}

/// Create a file record.
///
/// POST /api/files
///
/// Returns 201 with a fresh uuid, or 200 when the posted file-version
/// already exists and the new locations were appended to it.
#[utoipa::path(
    post,
    path = "/api/files",
    tag = "files",
    responses(
        (status = 201, description = "Record created", body = FileRefResponse),
        (status = 200, description = "Replica locations appended to the existing record", body = FileRefResponse),
        (status = 400, description = "Validation failure", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 409, description = "Conflict with an existing record", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn create_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Json(candidate): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        subject = %ctx.subject,
        logical_name = %candidate.get("logical_name").and_then(serde_json::Value::as_str).unwrap_or("-"),
        "Creating file record"
    );

    let outcome = state
        .files_writer()
        .create(candidate)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    let (status, uuid) = match outcome {
        CreateOutcome::Created { uuid } => (StatusCode::CREATED, uuid),
        CreateOutcome::Merged { uuid } => (StatusCode::OK, uuid),
    };

    let href = format!("/api/files/{uuid}");
    Ok((
        status,
        Json(FileRefResponse {
            links: ResourceLinks::new(href.clone(), "/api/files"),
            file: href,
            uuid: uuid.to_string(),
        }),
    ))
}

/// Query file records.
///
/// GET /api/files
///
/// Accepts shortcut parameters (`run_number`, `dataset`, `event_id`,
/// `processing_level`, `season`, `logical_name`, `directory`, `filename`,
/// `path-regex`), a free-form `query` document, `keys`/`all-keys`
/// projection, and `limit`/`start` pagination. Archived-location records
/// are excluded unless the query constrains `locations.archive`.
#[utoipa::path(
    get,
    path = "/api/files",
    tag = "files",
    responses(
        (status = 200, description = "Matching records"),
        (status = 400, description = "Malformed query", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_files(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let query = build_find_query(&params, &state.query_limits())
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    tracing::debug!(
        subject = %ctx.subject,
        limit = query.limit,
        skip = query.skip,
        "Querying file records"
    );

    let files = state
        .files_reader()
        .find(&query)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(json!({
        "_links": links("/api/files", "/api"),
        "files": files,
    })))
}

/// Get a file record.
///
/// GET /api/files/{uuid}
///
/// The record's fingerprint is served as the `ETag`; pass it back via
/// `If-Match` to make an update conditional.
#[utoipa::path(
    get,
    path = "/api/files/{uuid}",
    tag = "files",
    params(("uuid" = String, Path, description = "Record uuid")),
    responses(
        (status = 200, description = "The record"),
        (status = 400, description = "Malformed uuid", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_uuid(&uuid, &ctx)?;

    let record = state
        .files_reader()
        .get(&uuid)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found(format!("no record with uuid {uuid}"))
                .with_request_id(ctx.request_id.clone())
        })?;

    Ok(record_response(uuid, Value::Object(record)))
}

/// Replace a file record.
///
/// PUT /api/files/{uuid}
#[utoipa::path(
    put,
    path = "/api/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "Record uuid"),
        ("If-Match" = Option<String>, Header, description = "Fingerprint from a prior read; stale values are rejected"),
    ),
    responses(
        (status = 200, description = "The updated record"),
        (status = 400, description = "Validation failure", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 409, description = "Conflict or stale fingerprint", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn replace_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(candidate): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_uuid(&uuid, &ctx)?;
    let expected = if_match(&headers);

    tracing::info!(subject = %ctx.subject, uuid = %uuid, "Replacing file record");

    let updated = state
        .files_writer()
        .replace(&uuid, candidate, expected.as_deref())
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(record_response(uuid, updated))
}

/// Partially update a file record.
///
/// PATCH /api/files/{uuid}
///
/// Patch fields overwrite the stored record at the top level; omitted
/// fields keep their prior values.
#[utoipa::path(
    patch,
    path = "/api/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "Record uuid"),
        ("If-Match" = Option<String>, Header, description = "Fingerprint from a prior read; stale values are rejected"),
    ),
    responses(
        (status = 200, description = "The updated record"),
        (status = 400, description = "Validation failure", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 409, description = "Conflict or stale fingerprint", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn patch_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_uuid(&uuid, &ctx)?;
    let expected = if_match(&headers);

    tracing::info!(subject = %ctx.subject, uuid = %uuid, "Patching file record");

    let updated = state
        .files_writer()
        .patch(&uuid, patch, expected.as_deref())
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(record_response(uuid, updated))
}

/// Delete a file record.
///
/// DELETE /api/files/{uuid}
///
/// Deleting the same uuid twice reports 404 on the second attempt.
#[utoipa::path(
    delete,
    path = "/api/files/{uuid}",
    tag = "files",
    params(("uuid" = String, Path, description = "Record uuid")),
    responses(
        (status = 204, description = "Record deleted"),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn delete_file(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_uuid(&uuid, &ctx)?;

    tracing::info!(subject = %ctx.subject, uuid = %uuid, "Deleting file record");

    state
        .files_writer()
        .delete(&uuid)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(StatusCode::NO_CONTENT)
}

fn parse_uuid(raw: &str, ctx: &RequestContext) -> Result<FileUuid, ApiError> {
    raw.parse::<FileUuid>()
        .map_err(|e| ApiError::bad_request(e.to_string()).with_request_id(ctx.request_id.clone()))
}

/// Extracts the fingerprint from `If-Match`, tolerating quoted and weak
/// validator forms.
fn if_match(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::IF_MATCH)?.to_str().ok()?;
    let trimmed = raw
        .trim()
        .trim_start_matches("W/")
        .trim_matches('"')
        .to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Builds a record response with `_links` in the body and the fingerprint
/// as the `ETag`.
fn record_response(uuid: FileUuid, mut record: Value) -> impl IntoResponse {
    let fingerprint = record
        .get(FINGERPRINT_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Value::Object(map) = &mut record {
        map.insert(
            "_links".to_string(),
            links(&format!("/api/files/{uuid}"), "/api/files"),
        );
    }

    let mut headers = HeaderMap::new();
    if let Some(fp) = fingerprint {
        if let Ok(value) = format!("\"{fp}\"").parse() {
            headers.insert(header::ETAG, value);
        }
    }
    (headers, Json(record))
}
