//! Hosted backend configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BACKEND_URL` - Project URL (e.g., `https://abcd.backend.example`)
//! - `BACKEND_ANON_KEY` - Public anon key; requests run under row-level security
//!
//! ## Optional
//! - `BACKEND_SERVICE_ROLE_KEY` - Service-role key (admin and CLI only)
//! - `BACKEND_TIMEOUT_SECS` - Per-request timeout (default: 15)
//! - `BACKEND_MAX_RETRIES` - Attempts for retryable failures (default: 3)
//! - `BACKEND_CACHE_TTL_SECS` - Query cache TTL (default: 300)
//! - `BACKEND_CACHE_CAPACITY` - Query cache entries (default: 1000)
//! - `BACKEND_REALTIME_DEBOUNCE_MS` - Change-feed debounce (default: 300)
//! - `BACKEND_STORAGE_BUCKET` - Bucket for product images (default: product-images)
//!
//! The helper functions at the bottom are shared with the binaries so every
//! crate reads and validates its environment the same way.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use crate::retry::RetryPolicy;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Hosted backend configuration.
///
/// Implements `Debug` manually to redact keys.
#[derive(Clone)]
pub struct BackendConfig {
    /// Project base URL without a trailing slash.
    pub url: Url,
    /// Public anon key.
    pub anon_key: SecretString,
    /// Service-role key; bypasses row-level security.
    pub service_role_key: Option<SecretString>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Backoff for retryable failures.
    pub retry: RetryPolicy,
    /// Query cache entry lifetime.
    pub cache_ttl: Duration,
    /// Query cache capacity in entries.
    pub cache_capacity: u64,
    /// Quiet period before reacting to a burst of change events.
    pub realtime_debounce: Duration,
    /// Storage bucket holding product images.
    pub storage_bucket: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field(
                "service_role_key",
                &self.service_role_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_capacity", &self.cache_capacity)
            .field("realtime_debounce", &self.realtime_debounce)
            .field("storage_bucket", &self.storage_bucket)
            .finish()
    }
}

impl BackendConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
    pub const DEFAULT_BUCKET: &'static str = "product-images";

    /// Configuration with defaults for everything but the URL and anon key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `url` is not an http(s) URL.
    pub fn new(url: &str, anon_key: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            url: parse_base_url("BACKEND_URL", url)?,
            anon_key: SecretString::from(anon_key.into()),
            service_role_key: None,
            timeout: Self::DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            cache_ttl: Self::DEFAULT_CACHE_TTL,
            cache_capacity: 1000,
            realtime_debounce: Self::DEFAULT_DEBOUNCE,
            storage_bucket: Self::DEFAULT_BUCKET.to_string(),
        })
    }

    /// Load configuration from environment variables.
    ///
    /// The caller is expected to have loaded `.env` already.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the service-role key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = get_required_env("BACKEND_URL")?;
        let anon_key = get_required_env("BACKEND_ANON_KEY")?;
        let mut config = Self::new(&url, anon_key)?;

        config.service_role_key = get_optional_env("BACKEND_SERVICE_ROLE_KEY")
            .map(|key| {
                validate_secret_strength(&key, "BACKEND_SERVICE_ROLE_KEY")?;
                Ok::<_, ConfigError>(SecretString::from(key))
            })
            .transpose()?;

        config.timeout = Duration::from_secs(parse_env_or("BACKEND_TIMEOUT_SECS", 15)?);
        config.retry.max_attempts = parse_env_or("BACKEND_MAX_RETRIES", 3)?;
        config.cache_ttl = Duration::from_secs(parse_env_or("BACKEND_CACHE_TTL_SECS", 300)?);
        config.cache_capacity = parse_env_or("BACKEND_CACHE_CAPACITY", 1000)?;
        config.realtime_debounce =
            Duration::from_millis(parse_env_or("BACKEND_REALTIME_DEBOUNCE_MS", 300)?);
        config.storage_bucket = get_env_or_default("BACKEND_STORAGE_BUCKET", Self::DEFAULT_BUCKET);

        Ok(config)
    }

    /// Require the service-role key, for binaries that cannot run without it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when the key is not configured.
    pub fn require_service_role(&self) -> Result<&SecretString, ConfigError> {
        self.service_role_key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("BACKEND_SERVICE_ROLE_KEY".to_string()))
    }

    /// `<url>/rest/v1/<path>`
    #[must_use]
    pub fn rest_url(&self, path: &str) -> String {
        self.endpoint("rest/v1", path)
    }

    /// `<url>/auth/v1/<path>`
    #[must_use]
    pub fn auth_url(&self, path: &str) -> String {
        self.endpoint("auth/v1", path)
    }

    /// `<url>/storage/v1/<path>`
    #[must_use]
    pub fn storage_url(&self, path: &str) -> String {
        self.endpoint("storage/v1", path)
    }

    /// WebSocket endpoint of the change feed, with the anon key attached.
    #[must_use]
    pub fn realtime_url(&self) -> String {
        let scheme = if self.url.scheme() == "https" { "wss" } else { "ws" };
        let host = self.url.host_str().unwrap_or("localhost");
        let port = self.url.port().map(|p| format!(":{p}")).unwrap_or_default();
        format!(
            "{scheme}://{host}{port}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            urlencoding::encode(self.anon_key.expose_secret())
        )
    }

    fn endpoint(&self, prefix: &str, path: &str) -> String {
        let base = self.url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{base}/{prefix}/")
        } else {
            format!("{base}/{prefix}/{path}")
        }
    }
}

fn parse_base_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an http(s) URL".to_string(),
        ));
    }
    Ok(url)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` if unset.
pub fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable; empty values count as unset.
#[must_use]
pub fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
#[must_use]
pub fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` if the value does not parse.
pub fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_env(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

/// Get database URL with fallback to generic `DATABASE_URL`.
///
/// # Errors
///
/// Returns `ConfigError::MissingEnvVar` naming `primary_key` if neither is set.
pub fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Validate that a session secret meets minimum length requirements.
///
/// # Errors
///
/// Returns `ConfigError::InsecureSecret` if shorter than 32 characters.
pub fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
#[must_use]
pub fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
///
/// # Errors
///
/// Returns `ConfigError::InsecureSecret` describing the failed check.
pub fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= \
                 {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
///
/// # Errors
///
/// Returns `ConfigError` if missing or weak.
pub fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig::new("https://proj.backend.test/", "anon-key-value").unwrap()
    }

    #[test]
    fn test_endpoints() {
        let c = config();
        assert_eq!(c.rest_url("products"), "https://proj.backend.test/rest/v1/products");
        assert_eq!(c.rest_url(""), "https://proj.backend.test/rest/v1/");
        assert_eq!(c.auth_url("/token"), "https://proj.backend.test/auth/v1/token");
        assert_eq!(
            c.storage_url("object/public/b/a.png"),
            "https://proj.backend.test/storage/v1/object/public/b/a.png"
        );
    }

    #[test]
    fn test_realtime_url_switches_scheme() {
        let c = config();
        assert_eq!(
            c.realtime_url(),
            "wss://proj.backend.test/realtime/v1/websocket?apikey=anon-key-value&vsn=1.0.0"
        );
        let local = BackendConfig::new("http://127.0.0.1:54321", "k").unwrap();
        assert!(local.realtime_url().starts_with("ws://127.0.0.1:54321/realtime"));
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            BackendConfig::new("ftp://x", "k"),
            Err(ConfigError::InvalidEnvVar(_, _))
        ));
        assert!(BackendConfig::new("not a url", "k").is_err());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let mut c = config();
        c.service_role_key = Some(SecretString::from("service-key-value"));
        let debug = format!("{c:?}");
        assert!(debug.contains("proj.backend.test"));
        assert!(!debug.contains("anon-key-value"));
        assert!(!debug.contains("service-key-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_require_service_role() {
        let c = config();
        assert!(matches!(
            c.require_service_role(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(validate_secret_strength("your-api-key-here", "T").is_err());
        assert!(validate_secret_strength("changeme123", "T").is_err());
        assert!(validate_secret_strength(&"a".repeat(40), "T").is_err());
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "T").is_ok());
    }

    #[test]
    fn test_validate_session_secret_length() {
        assert!(validate_session_secret(&SecretString::from("short"), "S").is_err());
        assert!(validate_session_secret(&SecretString::from("a".repeat(32)), "S").is_ok());
    }
}
