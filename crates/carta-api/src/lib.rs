//! # carta-api
//!
//! HTTP composition layer for the Carta metadata catalog.
//!
//! This crate provides the API surface for Carta, handling:
//!
//! - **Authentication**: bearer-token verification and request context
//! - **Routing**: file and collection endpoints
//! - **Error mapping**: catalog outcomes onto HTTP status families
//! - **Observability**: metrics, tracing, and health checks
//!
//! ## Design Principles
//!
//! This crate is a **thin composition layer** with no domain policy.
//! Validation, deconfliction, query shaping, and the mutation protocol all
//! live in `carta-catalog`.
//!
//! ## Endpoints
//!
//! ```text
//! GET    /health                      - Health check
//! GET    /ready                       - Readiness check
//! GET    /metrics                     - Prometheus metrics
//! GET    /api                         - Entry links
//! POST   /api/files                   - Create a record / register a replica
//! GET    /api/files                   - Query records
//! GET    /api/files/{uuid}            - Get a record (serves ETag)
//! PUT    /api/files/{uuid}            - Replace a record (honors If-Match)
//! PATCH  /api/files/{uuid}            - Partially update a record
//! DELETE /api/files/{uuid}            - Delete a record
//! POST   /api/collections             - Create a collection
//! GET    /api/collections             - List collections
//! GET    /api/collections/{uuid}      - Get a collection
//! GET    /api/collections/{uuid}/files - Files matching the stored query
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::RequestContext;
    pub use crate::error::{ApiError, ApiResult};
    pub use crate::server::Server;
}
