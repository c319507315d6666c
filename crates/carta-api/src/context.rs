//! Request context extraction and authentication middleware.
//!
//! In debug mode, the subject is supplied via the `X-Subject` header for
//! local development. In production mode, the subject comes from a verified
//! bearer token; a successful authorization yields the subject, the token's
//! expiry, and its type. Read endpoints may be configured to skip
//! authentication (`auth.require_read_auth = false`), mutation endpoints
//! never are.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use ulid::Ulid;

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::server::AppState;

/// Header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request context derived from authentication and headers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Authenticated subject (token `sub`, or a debug/anonymous marker).
    pub subject: String,
    /// Token type claim (`user`, `temp`, ...), `none` for unauthenticated
    /// reads and `debug` in debug mode.
    pub token_type: String,
    /// Token expiry, when a token was presented.
    pub expiry: Option<DateTime<Utc>>,
    /// Request ID for tracing/correlation.
    pub request_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<Self>() {
            return Ok(existing.clone());
        }

        let headers = &parts.headers;
        let request_id =
            header_string(headers, "X-Request-Id").unwrap_or_else(|| Ulid::new().to_string());

        let ctx = if state.config.debug {
            Self {
                subject: header_string(headers, "X-Subject").unwrap_or_else(|| "dev".to_string()),
                token_type: "debug".to_string(),
                expiry: None,
                request_id,
            }
        } else {
            match bearer_token(headers) {
                Some(token) => authorize(&token, &state.config.auth, request_id)?,
                None if read_only(&parts.method) && !state.config.auth.require_read_auth => Self {
                    subject: "anonymous".to_string(),
                    token_type: "none".to_string(),
                    expiry: None,
                    request_id,
                },
                None => return Err(ApiError::missing_auth().with_request_id(request_id)),
            }
        };

        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

const fn read_only(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Verifies a bearer token and extracts `{subject, expiry, type}`.
fn authorize(token: &str, auth: &AuthConfig, request_id: String) -> Result<RequestContext, ApiError> {
    let (decoding_key, algorithm) = decoding_key(auth, &request_id)?;
    let mut validation = Validation::new(algorithm);
    validation.validate_nbf = true;

    if let Some(issuer) = auth.issuer.as_deref() {
        validation.set_issuer(&[issuer]);
    }
    if let Some(audience) = auth.audience.as_deref() {
        validation.set_audience(&[audience]);
    }

    let data = jsonwebtoken::decode::<Value>(token, &decoding_key, &validation)
        .map_err(|_| ApiError::invalid_token().with_request_id(request_id.clone()))?;

    let Some(claims) = data.claims.as_object() else {
        return Err(ApiError::invalid_token().with_request_id(request_id));
    };

    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::invalid_token().with_request_id(request_id.clone()))?
        .to_string();
    let expiry = claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    let token_type = claims
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("user")
        .to_string();

    Ok(RequestContext {
        subject,
        token_type,
        expiry,
        request_id,
    })
}

fn decoding_key(
    auth: &AuthConfig,
    request_id: &str,
) -> Result<(DecodingKey, Algorithm), ApiError> {
    match (
        auth.hs256_secret.as_deref(),
        auth.rs256_public_key_pem.as_deref(),
    ) {
        (Some(secret), None) => Ok((DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)),
        (None, Some(pem)) => DecodingKey::from_rsa_pem(pem.as_bytes())
            .map(|key| (key, Algorithm::RS256))
            .map_err(|e| {
                ApiError::internal(format!("failed to parse auth.rs256_public_key_pem: {e}"))
                    .with_request_id(request_id.to_string())
            }),
        (Some(_), Some(_)) => Err(ApiError::internal(
            "auth.hs256_secret and auth.rs256_public_key_pem are mutually exclusive",
        )
        .with_request_id(request_id.to_string())),
        (None, None) => Err(ApiError::internal(
            "auth.hs256_secret or auth.rs256_public_key_pem is required when debug=false",
        )
        .with_request_id(request_id.to_string())),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_string(headers, "Authorization")?;
    let token = raw.strip_prefix("Bearer ")?;
    Some(token.to_string())
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

/// Authentication middleware.
///
/// Runs before rate limiting and injects a verified [`RequestContext`] into
/// request extensions; the request id is echoed back on the response.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let ctx = match RequestContext::from_request_parts(&mut parts, &state).await {
        Ok(ctx) => ctx,
        Err(err) => return err.into_response(),
    };

    let mut req = Request::from_parts(parts, body);
    let request_id = ctx.request_id.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
