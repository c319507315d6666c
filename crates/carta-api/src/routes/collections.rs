//! Collection API routes.
//!
//! ## Routes
//!
//! - `POST /collections` - Create a collection
//! - `GET  /collections` - List collections
//! - `GET  /collections/{uuid}` - Get a collection
//! - `GET  /collections/{uuid}/files` - Files matching the stored query

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use utoipa::ToSchema;

use carta_catalog::query::parse_pagination;
use carta_core::FileUuid;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiErrorBody};
use crate::routes::{ResourceLinks, links};
use crate::server::AppState;

/// Request to create a collection.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCollectionRequest {
    /// Collection name (must be unique).
    pub collection_name: String,
    /// Owner; defaults to the authenticated subject.
    pub owner: Option<String>,
    /// Canonical filter selecting member files; defaults to match-all.
    #[schema(value_type = Object)]
    pub query: Option<Value>,
}

/// Response referencing one collection.
#[derive(Debug, Serialize, ToSchema)]
pub struct CollectionRefResponse {
    /// Hypermedia links.
    #[serde(rename = "_links")]
    pub links: ResourceLinks,
    /// URL of the collection.
    pub collection: String,
    /// uuid of the collection.
    pub uuid: String,
}

/// Creates collection routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/collections", post(create_collection).get(list_collections))
        .route("/collections/:uuid", get(get_collection))
        .route("/collections/:uuid/files", get(collection_files))
}

/// Create a collection.
///
/// POST /api/collections
#[utoipa::path(
    post,
    path = "/api/collections",
    tag = "collections",
    request_body = CreateCollectionRequest,
    responses(
        (status = 201, description = "Collection created", body = CollectionRefResponse),
        (status = 400, description = "Validation failure", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 409, description = "Name already taken", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    ),
    security(("bearerAuth" = []))
)]
pub(crate) async fn create_collection(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCollectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = req.owner.unwrap_or_else(|| ctx.subject.clone());
    tracing::info!(
        subject = %ctx.subject,
        collection = %req.collection_name,
        "Creating collection"
    );

    let uuid = state
        .collections()
        .create(
            &req.collection_name,
            &owner,
            req.query.unwrap_or_else(|| json!({})),
        )
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    let href = format!("/api/collections/{uuid}");
    Ok((
        StatusCode::CREATED,
        Json(CollectionRefResponse {
            links: ResourceLinks::new(href.clone(), "/api/collections"),
            collection: href,
            uuid: uuid.to_string(),
        }),
    ))
}

/// List collections.
///
/// GET /api/collections
#[utoipa::path(
    get,
    path = "/api/collections",
    tag = "collections",
    responses(
        (status = 200, description = "Collections listed"),
        (status = 400, description = "Malformed pagination", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    )
)]
pub(crate) async fn list_collections(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let (skip, limit) = parse_pagination(&params, &state.query_limits())
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    let collections = state
        .collections()
        .list(skip, limit)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(json!({
        "_links": links("/api/collections", "/api"),
        "collections": collections,
    })))
}

/// Get a collection.
///
/// GET /api/collections/{uuid}
#[utoipa::path(
    get,
    path = "/api/collections/{uuid}",
    tag = "collections",
    params(("uuid" = String, Path, description = "Collection uuid")),
    responses(
        (status = 200, description = "The collection"),
        (status = 400, description = "Malformed uuid", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    )
)]
pub(crate) async fn get_collection(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_uuid(&uuid, &ctx)?;
    let collection = fetch_collection(&state, &uuid, &ctx).await?;

    let mut body = serde_json::to_value(&collection)
        .map_err(|e| ApiError::internal(e.to_string()).with_request_id(ctx.request_id.clone()))?;
    if let Value::Object(map) = &mut body {
        map.insert(
            "_links".to_string(),
            links(&format!("/api/collections/{uuid}"), "/api/collections"),
        );
    }
    Ok(Json(body))
}

/// List the files a collection's stored query selects.
///
/// GET /api/collections/{uuid}/files
///
/// `keys`, `all-keys`, `limit`, and `start` apply on top of the stored
/// query.
#[utoipa::path(
    get,
    path = "/api/collections/{uuid}/files",
    tag = "collections",
    params(("uuid" = String, Path, description = "Collection uuid")),
    responses(
        (status = 200, description = "Member files"),
        (status = 400, description = "Malformed pagination", body = ApiErrorBody),
        (status = 404, description = "Not found", body = ApiErrorBody),
        (status = 503, description = "Storage unavailable", body = ApiErrorBody),
    )
)]
pub(crate) async fn collection_files(
    ctx: RequestContext,
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let uuid = parse_uuid(&uuid, &ctx)?;
    let collection = fetch_collection(&state, &uuid, &ctx).await?;

    let query = collection
        .member_query(&params, &state.query_limits())
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    let files = state
        .files_reader()
        .find(&query)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok(Json(json!({
        "_links": links(
            &format!("/api/collections/{uuid}/files"),
            &format!("/api/collections/{uuid}"),
        ),
        "files": files,
    })))
}

async fn fetch_collection(
    state: &AppState,
    uuid: &FileUuid,
    ctx: &RequestContext,
) -> Result<carta_catalog::collection::Collection, ApiError> {
    state
        .collections()
        .get(uuid)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?
        .ok_or_else(|| {
            ApiError::not_found(format!("no collection with uuid {uuid}"))
                .with_request_id(ctx.request_id.clone())
        })
}

fn parse_uuid(raw: &str, ctx: &RequestContext) -> Result<FileUuid, ApiError> {
    raw.parse::<FileUuid>()
        .map_err(|e| ApiError::bad_request(e.to_string()).with_request_id(ctx.request_id.clone()))
}
