//! Rate limiting middleware.
//!
//! Per-client rate limiting keyed by client address, applied around the
//! request lifetime as middleware — the core carries no rate-limit state.
//! Mutations get a separate (lower) quota than reads.
//!
//! ## Response Headers
//!
//! When rate limited, returns:
//! - `429 Too Many Requests` status
//! - `Retry-After` header with seconds to wait
//! - `X-RateLimit-Limit` with the configured limit
//! - `X-RateLimit-Remaining` with remaining quota

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderValue, Method, Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// ============================================================================
// Configuration
// ============================================================================

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Read requests per minute per client.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Mutation requests per minute per client (lower: every mutation costs
    /// several store round-trips).
    #[serde(default = "default_mutations_per_minute")]
    pub mutations_per_minute: u32,

    /// Maximum burst size (requests allowed above steady rate).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_enabled() -> bool {
    true
}

const fn default_requests_per_minute() -> u32 {
    500
}

const fn default_mutations_per_minute() -> u32 {
    100
}

const fn default_burst_size() -> u32 {
    50
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_minute: default_requests_per_minute(),
            mutations_per_minute: default_mutations_per_minute(),
            burst_size: default_burst_size(),
        }
    }
}

// ============================================================================
// Rate Limiter State
// ============================================================================

/// Cap on tracked clients; the map is cleared when it fills so memory stays
/// bounded under address churn.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Per-client rate limiter using in-memory state.
type ClientLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Rate limiting state shared across all request handlers.
#[derive(Clone)]
pub struct RateLimitState {
    config: RateLimitConfig,
    /// Per-client limiters for read endpoints.
    read_limiters: Arc<RwLock<HashMap<String, Arc<ClientLimiter>>>>,
    /// Per-client limiters for mutation endpoints.
    mutation_limiters: Arc<RwLock<HashMap<String, Arc<ClientLimiter>>>>,
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("config", &self.config)
            .field("read_limiters", &"<HashMap>")
            .field("mutation_limiters", &"<HashMap>")
            .finish()
    }
}

impl RateLimitState {
    /// Creates new rate limit state with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            read_limiters: Arc::new(RwLock::new(HashMap::new())),
            mutation_limiters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gets or creates a rate limiter for the given client.
    async fn get_or_create_limiter(
        limiters: &RwLock<HashMap<String, Arc<ClientLimiter>>>,
        client: &str,
        requests_per_minute: u32,
        burst_size: u32,
    ) -> Arc<ClientLimiter> {
        // Fast path: check if limiter exists
        {
            let read_guard = limiters.read().await;
            if let Some(limiter) = read_guard.get(client) {
                return Arc::clone(limiter);
            }
        }

        // Slow path: create new limiter
        let mut write_guard = limiters.write().await;

        // Double-check after acquiring write lock
        if let Some(limiter) = write_guard.get(client) {
            return Arc::clone(limiter);
        }

        if write_guard.len() >= MAX_TRACKED_CLIENTS {
            write_guard.clear();
        }

        let replenish_rate = NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst_size.max(1)).unwrap_or(NonZeroU32::MIN);

        let quota = Quota::per_minute(replenish_rate).allow_burst(burst);
        let limiter = Arc::new(RateLimiter::direct(quota));

        write_guard.insert(client.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Checks the read quota for a client.
    pub async fn check_read(&self, client: &str) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                limit: 0,
                remaining: 0,
            };
        }

        let limiter = Self::get_or_create_limiter(
            &self.read_limiters,
            client,
            self.config.requests_per_minute,
            self.config.burst_size,
        )
        .await;

        Self::check_limiter(&limiter, self.config.requests_per_minute)
    }

    /// Checks the mutation quota for a client.
    pub async fn check_mutation(&self, client: &str) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                limit: 0,
                remaining: 0,
            };
        }

        let limiter = Self::get_or_create_limiter(
            &self.mutation_limiters,
            client,
            self.config.mutations_per_minute,
            self.config.burst_size / 2,
        )
        .await;

        Self::check_limiter(&limiter, self.config.mutations_per_minute)
    }

    fn check_limiter(limiter: &ClientLimiter, limit: u32) -> RateLimitResult {
        match limiter.check() {
            Ok(()) => {
                // Estimate remaining (approximate, not exact)
                let remaining = limiter
                    .check()
                    .map(|()| limit.saturating_sub(1))
                    .unwrap_or(0);
                RateLimitResult::Allowed { limit, remaining }
            }
            Err(not_until) => {
                let retry_after =
                    not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                RateLimitResult::Limited {
                    limit,
                    retry_after_secs: retry_after.as_secs(),
                }
            }
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug)]
pub enum RateLimitResult {
    /// Request is allowed.
    Allowed {
        /// Configured limit.
        limit: u32,
        /// Approximate remaining requests in window.
        remaining: u32,
    },
    /// Request is rate limited.
    Limited {
        /// Configured limit.
        limit: u32,
        /// Seconds until the client can retry.
        retry_after_secs: u64,
    },
}

// ============================================================================
// Middleware
// ============================================================================

/// Rate limiting middleware for Axum.
///
/// Keys limits by client address (`X-Forwarded-For` behind a proxy,
/// otherwise the peer address); mutations draw from a separate quota.
pub async fn rate_limit_middleware(
    State(rate_limit): State<Arc<RateLimitState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = client_address(&req);
    let path = req.uri().path().to_string();
    let endpoint = crate::metrics::endpoint_label(&req);
    let mutation = is_mutation(req.method());

    let result = if mutation {
        rate_limit.check_mutation(&client).await
    } else {
        rate_limit.check_read(&client).await
    };

    match result {
        RateLimitResult::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            if limit > 0 {
                add_rate_limit_headers(response.headers_mut(), limit, remaining);
            }
            response
        }
        RateLimitResult::Limited {
            limit,
            retry_after_secs,
        } => {
            tracing::warn!(
                client = %client,
                path = %path,
                endpoint = %endpoint,
                limit = limit,
                retry_after_secs = retry_after_secs,
                "Rate limit exceeded"
            );

            crate::metrics::record_rate_limit_hit(endpoint.as_str());

            rate_limit_response(limit, retry_after_secs)
        }
    }
}

const fn is_mutation(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Resolves the client address used as the rate-limit key.
fn client_address<B>(req: &Request<B>) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}

fn add_rate_limit_headers(headers: &mut axum::http::HeaderMap, limit: u32, remaining: u32) {
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-limit"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-remaining"), v);
    }
}

fn rate_limit_response(limit: u32, retry_after_secs: u64) -> Response {
    let body = serde_json::json!({
        "code": "RATE_LIMITED",
        "message": format!(
            "Rate limit exceeded. Limit: {} requests per minute. Retry after {} seconds.",
            limit, retry_after_secs
        ),
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();

    let headers = response.headers_mut();

    if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        headers.insert(header::RETRY_AFTER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert(header::HeaderName::from_static("x-ratelimit-limit"), v);
    }
    headers.insert(
        header::HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from_static("0"),
    );

    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_within_quota() {
        let state = RateLimitState::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 10,
            mutations_per_minute: 5,
            burst_size: 5,
        });

        let result = state.check_read("10.0.0.1").await;
        assert!(matches!(result, RateLimitResult::Allowed { .. }));
    }

    #[tokio::test]
    async fn clients_have_independent_quotas() {
        let state = RateLimitState::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 2,
            mutations_per_minute: 1,
            burst_size: 1,
        });

        let result1 = state.check_read("10.0.0.1").await;
        let result2 = state.check_read("10.0.0.2").await;

        assert!(matches!(result1, RateLimitResult::Allowed { .. }));
        assert!(matches!(result2, RateLimitResult::Allowed { .. }));
    }

    #[tokio::test]
    async fn disabled_always_allows() {
        let state = RateLimitState::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        });

        for _ in 0..100 {
            let result = state.check_mutation("10.0.0.1").await;
            assert!(matches!(result, RateLimitResult::Allowed { limit: 0, .. }));
        }
    }

    #[tokio::test]
    async fn mutations_draw_from_their_own_quota() {
        let state = RateLimitState::new(RateLimitConfig {
            enabled: true,
            requests_per_minute: 100,
            mutations_per_minute: 10,
            burst_size: 10,
        });

        let result = state.check_mutation("10.0.0.1").await;
        assert!(matches!(result, RateLimitResult::Allowed { limit: 10, .. }));

        let result = state.check_read("10.0.0.1").await;
        assert!(matches!(
            result,
            RateLimitResult::Allowed { limit: 100, .. }
        ));
    }

    #[test]
    fn forwarded_for_wins_over_peer_address() {
        let req = Request::builder()
            .uri("/api/files")
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_address(&req), "203.0.113.9");
    }
}
