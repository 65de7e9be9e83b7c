//! Cart configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CART_API_BASE_URL` - Base URL of the marketplace cart API
//!
//! ## Optional
//! - `CART_API_TOKEN_HEADER` - Header carrying the auth token (default: Authorization)
//! - `CART_REQUEST_TIMEOUT_MS` - Per-request HTTP timeout (default: 10000)
//! - `CART_SAFETY_TIMEOUT_MS` - Ceiling after which `loading` is forced off (default: 5000)
//! - `CART_REFRESH_DELAY_MS` - Delay before the refresh that follows a confirmed removal (default: 1000)
//! - `CART_SESSION_EXPIRED_REDIRECT_DELAY_MS` - Delay before redirecting an expired session (default: 1500)
//! - `CART_LOGIN_PATH` - Where expired sessions are sent (default: /login)
//! - `CART_CHECKOUT_PATH` - Checkout page path (default: /checkout)
//! - `CART_ANALYTICS_URL` - Analytics collector endpoint
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_TOKEN_HEADER: &str = "Authorization";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SAFETY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REFRESH_DELAY_MS: u64 = 1_000;
const DEFAULT_REDIRECT_DELAY_MS: u64 = 1_500;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Cart application configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Remote cart API configuration
    pub api: CartApiConfig,
    /// Store timing configuration
    pub timings: CartTimings,
    /// Login page path, relative to the API base URL's origin
    pub login_path: String,
    /// Checkout page path, relative to the API base URL's origin
    pub checkout_path: String,
    /// Analytics collector endpoint
    pub analytics_url: Option<Url>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Remote cart API configuration.
#[derive(Debug, Clone)]
pub struct CartApiConfig {
    /// Base URL, e.g. `https://api.example.com/v1/`
    pub base_url: Url,
    /// Header the auth token is sent in
    pub token_header: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Timing knobs for the cart store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartTimings {
    /// Ceiling after which a reconciliation's `loading` flag is forced off.
    pub safety_timeout: Duration,
    /// Delay before the background refresh that follows a confirmed removal.
    pub refresh_delay: Duration,
    /// Delay before the session-expired handler runs.
    pub session_expired_redirect_delay: Duration,
}

impl Default for CartTimings {
    fn default() -> Self {
        Self {
            safety_timeout: Duration::from_millis(DEFAULT_SAFETY_TIMEOUT_MS),
            refresh_delay: Duration::from_millis(DEFAULT_REFRESH_DELAY_MS),
            session_expired_redirect_delay: Duration::from_millis(DEFAULT_REDIRECT_DELAY_MS),
        }
    }
}

impl CartConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api = CartApiConfig::from_env()?;
        let timings = CartTimings::from_env()?;
        let login_path = get_env_or_default("CART_LOGIN_PATH", "/login");
        let checkout_path = get_env_or_default("CART_CHECKOUT_PATH", "/checkout");
        let analytics_url = get_optional_env("CART_ANALYTICS_URL")
            .map(|raw| parse_url("CART_ANALYTICS_URL", &raw))
            .transpose()?;

        Ok(Self {
            api,
            timings,
            login_path,
            checkout_path,
            analytics_url,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Absolute URL of the login page.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured path cannot be joined onto the base URL.
    pub fn login_url(&self) -> Result<Url, url::ParseError> {
        self.api.base_url.join(&self.login_path)
    }

    /// Absolute URL of the checkout page.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured path cannot be joined onto the base URL.
    pub fn checkout_url(&self) -> Result<Url, url::ParseError> {
        self.api.base_url.join(&self.checkout_path)
    }
}

impl CartApiConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw = get_required_env("CART_API_BASE_URL")?;
        Ok(Self {
            base_url: parse_url("CART_API_BASE_URL", &raw)?,
            token_header: get_env_or_default("CART_API_TOKEN_HEADER", DEFAULT_TOKEN_HEADER),
            request_timeout: get_millis("CART_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?,
        })
    }

    /// Build an API config with default header and timeout.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl CartTimings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            safety_timeout: get_millis("CART_SAFETY_TIMEOUT_MS", DEFAULT_SAFETY_TIMEOUT_MS)?,
            refresh_delay: get_millis("CART_REFRESH_DELAY_MS", DEFAULT_REFRESH_DELAY_MS)?,
            session_expired_redirect_delay: get_millis(
                "CART_SESSION_EXPIRED_REDIRECT_DELAY_MS",
                DEFAULT_REDIRECT_DELAY_MS,
            )?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a millisecond duration, falling back to `default_ms`.
fn get_millis(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    get_optional_env(key).map_or(Ok(Duration::from_millis(default_ms)), |raw| {
        parse_millis(key, &raw)
    })
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse an absolute URL. Base URLs get a trailing slash so `join` appends.
fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
