//! Rate limiting for the admin sign-in endpoint.
//!
//! The admin usually runs on a private network without a proxy in front, so
//! the client key falls back from proxy headers to the peer address. The
//! server must be started with connect info for that fallback.

use std::sync::Arc;

use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

/// Rate limiter layer type for Axum.
pub type RateLimiterLayer =
    GovernorLayer<SmartIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

/// Create rate limiter for sign-in: ~6 attempts per minute per client.
///
/// Configuration: 1 request every 10 seconds (replenish), burst of 3.
///
/// # Panics
///
/// Does not panic: governor only rejects a zero period or burst size.
#[must_use]
pub fn login_rate_limiter() -> RateLimiterLayer {
    let config = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(10)
        .burst_size(3)
        .finish()
        .expect("rate limiter config with per_second(10) and burst_size(3) is valid");
    GovernorLayer::new(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_builds() {
        let _login = login_rate_limiter();
    }
}
