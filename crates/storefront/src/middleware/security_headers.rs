//! Security headers middleware for XSS, clickjacking, and isolation protection.
//!
//! Adds restrictive security headers to all responses. Start locked down and
//! loosen only when specific functionality requires it.

use axum::{
    extract::{Request, State},
    http::{
        HeaderName, HeaderValue,
        header::{
            CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS,
            X_FRAME_OPTIONS,
        },
    },
    middleware::Next,
    response::Response,
};

use super::csp::CspNonce;
use crate::state::AppState;

/// Build the Content Security Policy.
///
/// Product images are served from the backend's storage origin, so that
/// origin is allowed for `img-src`. Inline scripts need the request nonce.
#[must_use]
pub fn content_security_policy(nonce: Option<&CspNonce>, image_origin: Option<&str>) -> String {
    let script_src = nonce.map_or_else(
        || "'self'".to_string(),
        |n| format!("'self' {}", n.source()),
    );
    let img_src = image_origin.map_or_else(
        || "'self' data:".to_string(),
        |origin| format!("'self' data: {origin}"),
    );

    format!(
        "default-src 'none'; \
         script-src {script_src}; \
         style-src 'self'; \
         font-src 'self'; \
         img-src {img_src}; \
         connect-src 'self'; \
         frame-src 'none'; \
         object-src 'none'; \
         base-uri 'self'; \
         form-action 'self'; \
         frame-ancestors 'none'"
    )
}

/// Scheme, host and port of a URL, e.g. `https://abcd.backend.example`.
#[must_use]
pub fn origin_of(url: &str) -> Option<String> {
    let origin = url::Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Add security headers to all responses.
///
/// Headers applied:
/// - `X-Frame-Options: DENY` - Prevent clickjacking
/// - `X-Content-Type-Options: nosniff` - Prevent MIME sniffing
/// - `Referrer-Policy: same-origin` - No referrer to other sites
/// - `Content-Security-Policy` - Nonce-based CSP (see [`content_security_policy`])
/// - `Permissions-Policy` - Deny sensitive features
/// - `Cache-Control: no-store` - Pages carry per-user data (cart, account)
/// - `Cross-Origin-Opener-Policy: same-origin` - Process isolation
pub async fn security_headers_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let nonce = request.extensions().get::<CspNonce>().cloned();
    let mut response = next.run(request).await;

    let image_origin = origin_of(state.config().backend.url.as_str());
    let csp = content_security_policy(nonce.as_ref(), image_origin.as_deref());

    let headers = response.headers_mut();
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("same-origin"));

    if let Ok(value) = HeaderValue::from_str(&csp) {
        headers.insert(CONTENT_SECURITY_POLICY, value);
    }

    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(
            "accelerometer=(), \
             camera=(), \
             display-capture=(), \
             geolocation=(), \
             gyroscope=(), \
             magnetometer=(), \
             microphone=(), \
             payment=(), \
             usb=(), \
             interest-cohort=()",
        ),
    );

    if !headers.contains_key(CACHE_CONTROL) {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store, max-age=0"));
    }

    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csp_includes_nonce_and_image_origin() {
        let nonce = CspNonce("n0nce".into());
        let csp = content_security_policy(Some(&nonce), Some("https://abcd.backend.example"));
        assert!(csp.contains("script-src 'self' 'nonce-n0nce';"));
        assert!(csp.contains("img-src 'self' data: https://abcd.backend.example;"));
        assert!(csp.starts_with("default-src 'none';"));
    }

    #[test]
    fn test_csp_without_nonce() {
        let csp = content_security_policy(None, None);
        assert!(csp.contains("script-src 'self';"));
        assert!(csp.contains("img-src 'self' data:;"));
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://abcd.backend.example/rest/v1").as_deref(),
            Some("https://abcd.backend.example")
        );
        assert_eq!(
            origin_of("http://localhost:54321").as_deref(),
            Some("http://localhost:54321")
        );
        assert_eq!(origin_of("not a url"), None);
    }
}
