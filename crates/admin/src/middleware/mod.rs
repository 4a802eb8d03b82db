//! HTTP middleware stack for admin.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request span with status and latency)
//! 3. Request ID and response hardening headers
//! 4. CORS for the configured console origin (optional)
//! 5. Session layer (tower-sessions with `PostgreSQL` store, `admin` schema)
//! 6. Rate limiting on sign-in (governor)
//!
//! Handlers take [`RequireAdmin`] to require an admin session.

pub mod auth;
pub mod rate_limit;
pub mod request_id;
pub mod session;

pub use auth::{RequireAdmin, clear_current_admin, set_current_admin};
pub use rate_limit::login_rate_limiter;
pub use request_id::request_id_middleware;
pub use session::{create_session_layer, session_store};
