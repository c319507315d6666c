//! Server configuration.

use serde::{Deserialize, Serialize};

use carta_core::{Error, Result};

use crate::rate_limit::RateLimitConfig;

/// Configuration for the Carta API server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Enable debug mode.
    ///
    /// When enabled:
    /// - requests are authenticated from the `X-Subject` header (dev/tests)
    /// - the in-memory document store may be used
    ///
    /// When disabled:
    /// - mutation endpoints require a verified bearer token
    pub debug: bool,

    /// Authentication configuration (used when `debug` is false).
    #[serde(default)]
    pub auth: AuthConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Query bounds applied to every find.
    #[serde(default)]
    pub query: QueryConfig,

    /// Bound on each document-store call, in seconds. Propagated to the
    /// catalog reader/writer so a hung store turns into a retryable 5xx
    /// instead of a hung request.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
}

const fn default_op_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8888,
            debug: false,
            auth: AuthConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            query: QueryConfig::default(),
            op_timeout_secs: default_op_timeout_secs(),
        }
    }
}

/// Authentication configuration.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 shared secret for token verification.
    #[serde(default)]
    pub hs256_secret: Option<String>,
    /// RS256 public key (PEM) for token verification.
    #[serde(default)]
    pub rs256_public_key_pem: Option<String>,
    /// Expected token issuer, when set.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Expected token audience, when set.
    #[serde(default)]
    pub audience: Option<String>,
    /// Require authentication on read endpoints too.
    ///
    /// Mutation endpoints always require it outside debug mode.
    #[serde(default)]
    pub require_read_auth: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "hs256_secret",
                &self.hs256_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "rs256_public_key_pem",
                &self.rs256_public_key_pem.as_ref().map(|_| "[PEM]"),
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("require_read_auth", &self.require_read_auth)
            .finish()
    }
}

/// CORS configuration for browser-based access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. Use `["*"]` to allow all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Default: disabled (secure-by-default).
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Query bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Hard cap on find page size; larger requests are clamped.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

const fn default_max_page_size() -> u64 {
    10_000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `CARTA_HTTP_PORT`
    /// - `CARTA_DEBUG`
    /// - `CARTA_JWT_SECRET`
    /// - `CARTA_JWT_PUBLIC_KEY_PEM`
    /// - `CARTA_JWT_ISSUER`
    /// - `CARTA_JWT_AUDIENCE`
    /// - `CARTA_REQUIRE_READ_AUTH`
    /// - `CARTA_CORS_ALLOWED_ORIGINS` (comma-separated, or `*`)
    /// - `CARTA_CORS_MAX_AGE_SECONDS`
    /// - `CARTA_RATE_LIMIT_ENABLED`
    /// - `CARTA_RATE_LIMIT_REQUESTS_PER_MINUTE`
    /// - `CARTA_RATE_LIMIT_MUTATIONS_PER_MINUTE`
    /// - `CARTA_RATE_LIMIT_BURST_SIZE`
    /// - `CARTA_MAX_PAGE_SIZE`
    /// - `CARTA_OP_TIMEOUT_SECS`
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("CARTA_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(debug) = env_bool("CARTA_DEBUG")? {
            config.debug = debug;
        }

        if let Some(secret) = env_string("CARTA_JWT_SECRET") {
            config.auth.hs256_secret = Some(secret);
        }
        if let Some(pem) = env_string("CARTA_JWT_PUBLIC_KEY_PEM") {
            config.auth.rs256_public_key_pem = Some(pem);
        }
        if let Some(issuer) = env_string("CARTA_JWT_ISSUER") {
            config.auth.issuer = Some(issuer);
        }
        if let Some(audience) = env_string("CARTA_JWT_AUDIENCE") {
            config.auth.audience = Some(audience);
        }
        if let Some(required) = env_bool("CARTA_REQUIRE_READ_AUTH")? {
            config.auth.require_read_auth = required;
        }

        if let Some(origins) = env_string("CARTA_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(max_age) = env_u64("CARTA_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        if let Some(enabled) = env_bool("CARTA_RATE_LIMIT_ENABLED")? {
            config.rate_limit.enabled = enabled;
        }
        if let Some(rpm) = env_u32("CARTA_RATE_LIMIT_REQUESTS_PER_MINUTE")? {
            config.rate_limit.requests_per_minute = rpm;
        }
        if let Some(rpm) = env_u32("CARTA_RATE_LIMIT_MUTATIONS_PER_MINUTE")? {
            config.rate_limit.mutations_per_minute = rpm;
        }
        if let Some(burst) = env_u32("CARTA_RATE_LIMIT_BURST_SIZE")? {
            config.rate_limit.burst_size = burst;
        }

        if let Some(max) = env_u64("CARTA_MAX_PAGE_SIZE")? {
            if max == 0 {
                return Err(Error::InvalidInput(
                    "CARTA_MAX_PAGE_SIZE must be greater than 0".to_string(),
                ));
            }
            config.query.max_page_size = max;
        }
        if let Some(secs) = env_u64("CARTA_OP_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "CARTA_OP_TIMEOUT_SECS must be greater than 0".to_string(),
                ));
            }
            config.op_timeout_secs = secs;
        }

        Ok(config)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(raw) = env_string(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(Some(true)),
        "0" | "false" | "no" => Ok(Some(false)),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean, got '{raw}'"
        ))),
    }
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    env_parse(name)
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    env_parse(name)
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    env_parse(name)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    let Some(raw) = env_string(name) else {
        return Ok(None);
    };
    raw.parse::<T>().map(Some).map_err(|_| {
        Error::InvalidInput(format!("{name} could not be parsed, got '{raw}'"))
    })
}
