//! HTTP middleware stack for the storefront.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request span with status and latency)
//! 3. Request ID (`x-request-id`, recorded on the span)
//! 4. CSP nonce (per-request nonce for inline scripts)
//! 5. Security headers (CSP with the nonce, framing, sniffing)
//! 6. Session layer (tower-sessions with `PostgreSQL` store)
//! 7. Rate limiting on auth and form routes (governor)
//!
//! Extractors: [`RequireAuth`], [`OptionalAuth`], [`PageContext`], [`CspNonce`].

pub mod auth;
pub mod csp;
pub mod page;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod session;

pub use auth::{OptionalAuth, RequireAuth, clear_current_user, set_current_user};
pub use csp::{CspNonce, csp_nonce_middleware};
pub use page::PageContext;
pub use rate_limit::{auth_rate_limiter, form_rate_limiter};
pub use request_id::request_id_middleware;
pub use security_headers::security_headers_middleware;
pub use session::{create_session_layer, session_store};
