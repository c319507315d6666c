//! HTTP route handlers.
//!
//! Handlers are thin: request plumbing, `_links` formatting, and status
//! mapping. All policy lives in `carta-catalog`.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::server::AppState;

pub mod collections;
pub mod files;

/// Creates the `/api` route tree.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(entry))
        .merge(files::routes())
        .merge(collections::routes())
}

/// Entry point: hypermedia links to the catalog's resources.
async fn entry() -> Json<Value> {
    Json(json!({
        "_links": {
            "self": {"href": "/api"},
            "files": {"href": "/api/files"},
            "collections": {"href": "/api/collections"},
        }
    }))
}

/// Builds the `_links` object for a resource.
pub(crate) fn links(self_href: &str, parent_href: &str) -> Value {
    json!({
        "self": {"href": self_href},
        "parent": {"href": parent_href},
    })
}

/// A hypermedia link.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct LinkObject {
    /// Target URL.
    pub href: String,
}

/// `self`/`parent` links attached to resource responses.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ResourceLinks {
    /// The resource itself.
    #[serde(rename = "self")]
    pub self_link: LinkObject,
    /// The enclosing resource.
    pub parent: LinkObject,
}

impl ResourceLinks {
    pub(crate) fn new(self_href: impl Into<String>, parent_href: impl Into<String>) -> Self {
        Self {
            self_link: LinkObject {
                href: self_href.into(),
            },
            parent: LinkObject {
                href: parent_href.into(),
            },
        }
    }
}
