//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - Direct Postgres URL of the hosted project,
//!   used for the session store (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront
//! - `STOREFRONT_SESSION_SECRET` - Session signing secret (min 32 chars, high entropy)
//! - `BACKEND_URL`, `BACKEND_ANON_KEY` - see [`shopfront_backend::config`]
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_PAGE_SIZE` - Products per listing page (default: 24)
//! - `STOREFRONT_FLAT_SHIPPING` - Shipping charged per order (default: 5.00)
//! - `STOREFRONT_FREE_SHIPPING_OVER` - Subtotal above which shipping is free (default: 75.00)
//! - `SHOPFRONT_LOG_JSON` - Emit JSON logs when set
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`,
//!   `SENTRY_TRACES_SAMPLE_RATE` - Error tracking

use std::net::{IpAddr, SocketAddr};

use rust_decimal::Decimal;
use secrecy::SecretString;
use shopfront_backend::BackendConfig;
use shopfront_backend::config::{
    get_database_url, get_env_or_default, get_optional_env, get_required_env,
    get_validated_secret, parse_env_or, validate_session_secret,
};

pub use shopfront_backend::ConfigError;

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Session store connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Session signing secret
    pub session_secret: SecretString,
    /// Hosted backend endpoints and keys
    pub backend: BackendConfig,
    /// Products per listing page
    pub page_size: u32,
    /// Checkout pricing
    pub shipping: ShippingConfig,
    /// Emit JSON logs instead of text
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub sentry_sample_rate: f32,
    pub sentry_traces_sample_rate: f32,
}

/// Flat-rate shipping rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingConfig {
    pub flat_rate: Decimal,
    pub free_over: Decimal,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            flat_rate: Decimal::new(500, 2),
            free_over: Decimal::new(7500, 2),
        }
    }
}

impl ShippingConfig {
    /// Shipping charged for an order with `subtotal`.
    #[must_use]
    pub fn charge_for(&self, subtotal: Decimal) -> Decimal {
        if subtotal.is_zero() || subtotal >= self.free_over {
            Decimal::ZERO
        } else {
            self.flat_rate
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = get_env_or_default("STOREFRONT_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_HOST".to_string(), e.to_string())
            })?;
        let port = parse_env_or("STOREFRONT_PORT", 3000u16)?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        let session_secret = get_validated_secret("STOREFRONT_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "STOREFRONT_SESSION_SECRET")?;

        let backend = BackendConfig::from_env()?;
        let shipping = ShippingConfig {
            flat_rate: parse_env_or(
                "STOREFRONT_FLAT_SHIPPING",
                ShippingConfig::default().flat_rate,
            )?,
            free_over: parse_env_or(
                "STOREFRONT_FREE_SHIPPING_OVER",
                ShippingConfig::default().free_over,
            )?,
        };

        Ok(Self {
            database_url,
            host,
            port,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_secret,
            backend,
            page_size: parse_env_or("STOREFRONT_PAGE_SIZE", 24u32)?.clamp(1, 100),
            shipping,
            log_json: get_optional_env("SHOPFRONT_LOG_JSON").is_some(),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env_or("SENTRY_SAMPLE_RATE", 1.0)?,
            sentry_traces_sample_rate: parse_env_or("SENTRY_TRACES_SAMPLE_RATE", 0.1)?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether the site is served over HTTPS (secure cookies).
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }

    /// Absolute URL for a site path.
    #[must_use]
    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> StorefrontConfig {
        StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/shop"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            base_url: "https://shop.example.com".to_string(),
            session_secret: SecretString::from("k8Jm2nQp5rT7vX9zA1cE3gI6lO0sU4wY"),
            backend: BackendConfig::new("https://abcd.backend.example", "anon").unwrap(),
            page_size: 24,
            shipping: ShippingConfig::default(),
            log_json: false,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.1,
        }
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(config().socket_addr().to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn test_absolute_url() {
        let config = config();
        assert!(config.is_secure());
        assert_eq!(
            config.absolute_url("/auth/login"),
            "https://shop.example.com/auth/login"
        );
    }

    #[test]
    fn test_shipping_charge() {
        let shipping = ShippingConfig::default();
        assert_eq!(shipping.charge_for(Decimal::new(2000, 2)), Decimal::new(500, 2));
        assert_eq!(shipping.charge_for(Decimal::new(7500, 2)), Decimal::ZERO);
        assert_eq!(shipping.charge_for(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", config());
        assert!(!debug.contains("k8Jm2nQp5rT7vX9zA1cE3gI6lO0sU4wY"));
    }
}
