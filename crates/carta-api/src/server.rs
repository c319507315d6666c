//! API server implementation.
//!
//! Provides health, ready, and API endpoints for the Carta catalog.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use carta_catalog::collection::Collections;
use carta_catalog::query::QueryLimits;
use carta_catalog::{CatalogReader, CatalogWriter};
use carta_core::Result;
use carta_core::store::{DocumentStore, MemoryStore};

use crate::config::{Config, CorsConfig};
use crate::rate_limit::RateLimitState;

// ============================================================================
// Health and Ready Responses
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Document store holding file records.
    files: Arc<dyn DocumentStore>,
    /// Document store holding collections.
    collections: Arc<dyn DocumentStore>,
    /// Rate limiting state (shared across clients).
    pub(crate) rate_limit: Arc<RateLimitState>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("files", &"<DocumentStore>")
            .field("collections", &"<DocumentStore>")
            .field("rate_limit", &"<RateLimitState>")
            .finish()
    }
}

impl AppState {
    /// Creates new application state with the given stores.
    #[must_use]
    pub fn new(
        config: Config,
        files: Arc<dyn DocumentStore>,
        collections: Arc<dyn DocumentStore>,
    ) -> Self {
        let rate_limit = Arc::new(RateLimitState::new(config.rate_limit.clone()));
        Self {
            config,
            files,
            collections,
            rate_limit,
        }
    }

    /// Creates new application state with in-memory stores (for testing and
    /// local development). Indexes are pre-applied.
    #[must_use]
    pub fn with_memory_stores(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(MemoryStore::with_indexes(&carta_catalog::file_indexes())),
            Arc::new(MemoryStore::with_indexes(
                &carta_catalog::collection_indexes(),
            )),
        )
    }

    /// Returns a writer over the file store.
    #[must_use]
    pub fn files_writer(&self) -> CatalogWriter {
        CatalogWriter::new(Arc::clone(&self.files)).with_op_timeout(self.op_timeout())
    }

    /// Returns a reader over the file store.
    #[must_use]
    pub fn files_reader(&self) -> CatalogReader {
        CatalogReader::new(Arc::clone(&self.files)).with_op_timeout(self.op_timeout())
    }

    /// Returns a handle over the collection store.
    #[must_use]
    pub fn collections(&self) -> Collections {
        Collections::new(Arc::clone(&self.collections)).with_op_timeout(self.op_timeout())
    }

    /// Returns the configured query bounds.
    #[must_use]
    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            max_page_size: self.config.query.max_page_size,
        }
    }

    /// Returns the file store (used by readiness checks and tests).
    #[must_use]
    pub fn files_store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.files)
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.config.op_timeout_secs)
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint handler.
///
/// Returns 200 OK if the service is alive. This is a shallow check
/// that doesn't verify dependencies.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// Returns 200 OK if the service can reach its document store. A lookup for
/// a uuid that cannot exist is sufficient to validate connectivity.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state
        .files
        .find_one(&json!({"uuid": "00000000-0000-0000-0000-000000000000"}))
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("storage check failed: {e}")),
            }),
        ),
    }
}

// ============================================================================
// Server
// ============================================================================

/// The Carta API server.
pub struct Server {
    config: Config,
    files: Arc<dyn DocumentStore>,
    collections: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("files", &"<DocumentStore>")
            .field("collections", &"<DocumentStore>")
            .finish()
    }
}

impl Server {
    /// Creates a new server with the given configuration and in-memory
    /// stores; use [`Server::with_stores`] for production.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            files: Arc::new(MemoryStore::with_indexes(&carta_catalog::file_indexes())),
            collections: Arc::new(MemoryStore::with_indexes(
                &carta_catalog::collection_indexes(),
            )),
        }
    }

    /// Creates a new server with explicit stores.
    #[must_use]
    pub fn with_stores(
        config: Config,
        files: Arc<dyn DocumentStore>,
        collections: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            config,
            files,
            collections,
        }
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates the router with all routes and middleware.
    fn create_router(&self) -> Router {
        let state = Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.files),
            Arc::clone(&self.collections),
        ));

        let cors = self.build_cors_layer();

        let auth_layer =
            middleware::from_fn_with_state(Arc::clone(&state), crate::context::auth_middleware);
        let rate_limit_layer = middleware::from_fn_with_state(
            Arc::clone(&state.rate_limit),
            crate::rate_limit::rate_limit_middleware,
        );
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            // Health, ready, and metrics endpoints (no auth required)
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            // API routes (auth via RequestContext extractor)
            .nest(
                "/api",
                crate::routes::api_routes()
                    .route_layer(rate_limit_layer)
                    .layer(auth_layer),
            )
            // Middleware (order matters): Metrics outermost for timing, then
            // trace, then CORS.
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Builds the CORS layer from configuration.
    fn build_cors_layer(&self) -> CorsLayer {
        let cors_config = &self.config.cors;
        let cors = Self::build_cors_base(cors_config);
        Self::apply_cors_allowed_origins(cors, cors_config)
    }

    fn build_cors_base(cors_config: &CorsConfig) -> CorsLayer {
        CorsLayer::new()
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::IF_MATCH,
                header::HeaderName::from_static("x-subject"),
                header::HeaderName::from_static("x-request-id"),
            ])
            .expose_headers([
                header::CONTENT_TYPE,
                header::CONTENT_LENGTH,
                header::ETAG,
                header::HeaderName::from_static("x-request-id"),
            ])
            .max_age(Duration::from_secs(cors_config.max_age_seconds))
    }

    fn cors_allows_any_origin(cors_config: &CorsConfig) -> bool {
        cors_config.allowed_origins.len() == 1
            && cors_config
                .allowed_origins
                .first()
                .is_some_and(|origin| origin == "*")
    }

    fn apply_cors_allowed_origins(cors: CorsLayer, cors_config: &CorsConfig) -> CorsLayer {
        if cors_config.allowed_origins.is_empty() {
            return cors;
        }

        if Self::cors_allows_any_origin(cors_config) {
            return cors.allow_origin(Any);
        }

        if cors_config
            .allowed_origins
            .iter()
            .any(|origin| origin == "*")
        {
            tracing::error!(
                origins = ?cors_config.allowed_origins,
                "Invalid CORS config: '*' must be the only allowed origin"
            );
            return cors;
        }

        let allowed: Vec<HeaderValue> = cors_config
            .allowed_origins
            .iter()
            .filter_map(|origin| {
                HeaderValue::from_str(origin)
                    .map_err(|_| {
                        tracing::error!(origin = %origin, "Invalid CORS origin");
                    })
                    .ok()
            })
            .collect();

        if allowed.is_empty() {
            tracing::warn!("All configured CORS origins were invalid; disabling CORS");
            cors
        } else {
            tracing::info!(origins = ?cors_config.allowed_origins, "CORS configured");
            cors.allow_origin(AllowOrigin::list(allowed))
        }
    }

    /// Returns a router for in-process testing (no listener).
    #[must_use]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }

    /// Starts the server and blocks until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if index creation fails or the listener cannot bind.
    pub async fn serve(self) -> Result<()> {
        crate::metrics::init_metrics();

        // Ensure the store-side invariants exist before accepting writes.
        let state = AppState::new(
            self.config.clone(),
            Arc::clone(&self.files),
            Arc::clone(&self.collections),
        );
        state
            .files_writer()
            .initialize()
            .await
            .map_err(|e| carta_core::Error::storage(e.to_string()))?;
        state
            .collections()
            .initialize()
            .await
            .map_err(|e| carta_core::Error::storage(e.to_string()))?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| carta_core::Error::storage_with_source("failed to bind listener", e))?;
        tracing::info!(addr = %addr, "Carta API listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| carta_core::Error::storage_with_source("server error", e))?;
        Ok(())
    }
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<Config>,
    debug: Option<bool>,
    http_port: Option<u16>,
    files: Option<Arc<dyn DocumentStore>>,
    collections: Option<Arc<dyn DocumentStore>>,
}

impl ServerBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the full configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Enables or disables debug mode.
    #[must_use]
    pub const fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Sets the HTTP port.
    #[must_use]
    pub const fn http_port(mut self, port: u16) -> Self {
        self.http_port = Some(port);
        self
    }

    /// Sets the file store.
    #[must_use]
    pub fn files_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.files = Some(store);
        self
    }

    /// Sets the collection store.
    #[must_use]
    pub fn collections_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.collections = Some(store);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let mut config = self.config.unwrap_or_default();
        if let Some(debug) = self.debug {
            config.debug = debug;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }

        let files = self
            .files
            .unwrap_or_else(|| Arc::new(MemoryStore::with_indexes(&carta_catalog::file_indexes())));
        let collections = self.collections.unwrap_or_else(|| {
            Arc::new(MemoryStore::with_indexes(
                &carta_catalog::collection_indexes(),
            ))
        });

        Server::with_stores(config, files, collections)
    }
}
