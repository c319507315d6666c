//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use carta_catalog::CatalogError;
use carta_core::Error as CoreError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Reference to the record blocking a conflicting request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConflictRef {
    /// uuid of the blocking record.
    pub uuid: String,
    /// URL of the blocking record.
    pub file: String,
    /// Conflicting location entry, when the conflict is location-level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<ConflictLocation>,
}

/// The location entry involved in a location conflict.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConflictLocation {
    /// Site of the conflicting entry.
    pub site: String,
    /// Path of the conflicting entry.
    pub path: String,
}

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Conflicting resource, present on 409 responses so clients can
    /// self-resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictRef>,
    /// Optional request ID for correlation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    conflict: Option<ConflictRef>,
    request_id: Option<String>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response when the Authorization header is missing.
    #[must_use]
    pub fn missing_auth() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "MISSING_AUTH",
            "Authorization header required",
        )
    }

    /// Returns an error response when the bearer token is invalid.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_TOKEN",
            "Invalid bearer token",
        )
    }

    /// Returns an error response for authorization failures.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflicts (duplicate identity / stale
    /// fingerprint).
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Returns an error response for storage unavailability.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "STORAGE_UNAVAILABLE",
            message,
        )
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches the blocking record's identity to a conflict response.
    #[must_use]
    pub fn with_conflict(mut self, uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        self.conflict = Some(ConflictRef {
            file: format!("/api/files/{uuid}"),
            uuid,
            location: None,
        });
        self
    }

    /// Attaches the conflicting location entry.
    #[must_use]
    pub fn with_conflict_location(
        mut self,
        uuid: impl Into<String>,
        site: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let uuid = uuid.into();
        self.conflict = Some(ConflictRef {
            file: format!("/api/files/{uuid}"),
            uuid,
            location: Some(ConflictLocation {
                site: site.into(),
                path: path.into(),
            }),
        });
        self
    }

    /// Attaches a request ID for correlation.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attaches a Retry-After header value in seconds.
    #[must_use]
    pub const fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            conflict: None,
            request_id: None,
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = self.request_id;
        let retry_after_secs = self.retry_after_secs;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
                conflict: self.conflict,
                request_id: request_id.clone(),
            }),
        )
            .into_response();

        if let Some(request_id) = request_id {
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("x-request-id"), value);
            }
        }

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }

        response
    }
}

impl From<CatalogError> for ApiError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::Validation { message } => Self::bad_request(message),
            CatalogError::ForbiddenField { field } => {
                Self::bad_request(format!("forbidden field cannot be changed: {field}"))
            }
            CatalogError::FileVersionConflict { uuid } => {
                Self::conflict(format!("conflict with existing file-version {uuid}"))
                    .with_conflict(uuid)
            }
            CatalogError::LocationConflict { uuid, site, path } => {
                Self::conflict(format!("location {site}:{path} already registered to {uuid}"))
                    .with_conflict_location(uuid, site, path)
            }
            CatalogError::UuidConflict { uuid } => {
                Self::conflict(format!("uuid {uuid} exists with a different file-version"))
                    .with_conflict(uuid)
            }
            CatalogError::ReplicaExists { uuid } => {
                Self::conflict(format!("replica already recorded on {uuid}")).with_conflict(uuid)
            }
            CatalogError::VersionMismatch { uuid } => {
                Self::conflict(format!("record {uuid} was modified since it was read"))
                    .with_conflict(uuid)
            }
            CatalogError::AlreadyExists { entity, name, uuid } => {
                Self::conflict(format!("{entity} already exists: {name}")).with_conflict(uuid)
            }
            CatalogError::NotFound { uuid } => Self::not_found(format!("no record with uuid {uuid}")),
            CatalogError::InvariantViolation { message } => Self::internal(message),
            CatalogError::Storage { message, .. } => Self::service_unavailable(message),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message } | CoreError::InvalidInput(message) => {
                Self::bad_request(message)
            }
            CoreError::NotFound(message) => Self::not_found(message),
            CoreError::Timeout { operation } => {
                Self::service_unavailable(format!("storage operation timed out: {operation}"))
            }
            CoreError::Storage { message, .. } => Self::service_unavailable(message),
            CoreError::DuplicateKey { index, value } => {
                Self::conflict(format!("duplicate key on {index}: {value}"))
            }
            CoreError::Serialization { message } | CoreError::Internal { message } => {
                Self::internal(message)
            }
        }
    }
}
