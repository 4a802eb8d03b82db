//! HTTP route handlers for the storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /                            - Home page
//!
//! # Catalog
//! GET  /products                    - Product listing (?q, ?category, ?sort, ?page)
//! GET  /products/{slug}             - Product detail
//! POST /products/{slug}/reviews     - Submit review (auth)
//! GET  /categories/{slug}           - Category listing
//! GET  /collections                 - Collection index
//! GET  /collections/{slug}          - Collection detail
//!
//! # Cart, wishlist, compare
//! GET  /cart                        - Cart page
//! POST /cart/add|update|remove      - Cart mutations
//! GET  /wishlist                    - Wishlist (auth)
//! POST /wishlist/toggle             - Add or remove
//! GET  /compare                     - Compare list
//! POST /compare/toggle|clear
//!
//! # Checkout (auth)
//! GET  /checkout                    - Address and summary
//! POST /checkout                    - Place order
//!
//! # Account (auth)
//! GET  /account                     - Profile; POST /account/profile
//! GET  /account/security            - POST .../password, .../email
//! GET  /account/addresses           - POST create; POST /{id}/delete, /{id}/default
//! GET  /account/orders              - Order history; GET /account/orders/{id}
//!
//! # Auth
//! GET|POST /auth/login, /auth/register, /auth/forgot
//! POST /auth/logout
//! ```

pub mod account;
pub mod auth;
pub mod cart;
pub mod categories;
pub mod checkout;
pub mod collections;
pub mod compare;
pub mod home;
pub mod products;
pub mod wishlist;

use axum::{
    Router,
    response::Redirect,
    routing::{get, post},
};
use serde::Deserialize;
use shopfront_backend::clamp_page;
use tower_sessions::Session;

use crate::middleware::{auth_rate_limiter, form_rate_limiter};
use crate::models::Flash;
use crate::state::AppState;

// =============================================================================
// Shared helpers
// =============================================================================

/// Flash `message` and redirect to `to`.
pub(crate) async fn redirect_with(session: &Session, to: &str, flash: Flash) -> Redirect {
    flash.set(session).await;
    Redirect::to(to)
}

/// Local path to return to after a form post.
///
/// Only same-site absolute paths are accepted; anything else falls back to
/// `fallback` so the parameter cannot be used as an open redirect.
#[must_use]
pub fn safe_next(next: Option<&str>, fallback: &str) -> String {
    next.map(str::trim)
        .filter(|n| n.starts_with('/') && !n.starts_with("//") && !n.contains('\\'))
        .unwrap_or(fallback)
        .to_string()
}

/// Treat blank form fields as absent.
#[must_use]
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Query string of product listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u64>,
}

impl ListingQuery {
    /// Requested page, clamped to the pages a listing can serve.
    #[must_use]
    pub fn page_number(&self) -> u64 {
        clamp_page(self.page.unwrap_or(1))
    }
}

/// Pagination links for listing templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub page: u64,
    pub total_pages: u64,
    pub total: u64,
    base: String,
}

impl Pagination {
    /// `base` is the listing URL including any filters, e.g.
    /// `/products?q=tea&sort=name`.
    #[must_use]
    pub fn new(base: String, page: u64, total_pages: u64, total: u64) -> Self {
        Self {
            page,
            total_pages,
            total,
            base,
        }
    }

    #[must_use]
    pub fn url_for(&self, page: u64) -> String {
        let separator = if self.base.contains('?') { '&' } else { '?' };
        format!("{}{separator}page={page}", self.base)
    }

    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.page > 1
    }

    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    #[must_use]
    pub fn previous_url(&self) -> String {
        self.url_for(self.page.saturating_sub(1).max(1))
    }

    #[must_use]
    pub fn next_url(&self) -> String {
        self.url_for(self.page + 1)
    }
}

// =============================================================================
// Routers
// =============================================================================

/// Create the auth routes router.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/register", get(auth::register_page).post(auth::register))
        .route("/forgot", get(auth::forgot_page).post(auth::forgot))
        .route("/logout", post(auth::logout))
        .layer(auth_rate_limiter())
}

/// Create the product routes router.
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::index))
        .route("/{slug}", get(products::show))
        .route(
            "/{slug}/reviews",
            post(products::create_review).layer(form_rate_limiter()),
        )
}

/// Create the collection routes router.
pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(collections::index))
        .route("/{slug}", get(collections::show))
}

/// Create the cart routes router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(cart::show))
        .route("/add", post(cart::add))
        .route("/update", post(cart::update))
        .route("/remove", post(cart::remove))
}

/// Create the account routes router.
pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(account::index))
        .route("/profile", post(account::update_profile))
        .route("/security", get(account::security))
        .route("/security/password", post(account::change_password))
        .route("/security/email", post(account::change_email))
        .route(
            "/addresses",
            get(account::addresses).post(account::create_address),
        )
        .route("/addresses/{id}/delete", post(account::delete_address))
        .route("/addresses/{id}/default", post(account::set_default_address))
        .route("/orders", get(account::orders))
        .route("/orders/{id}", get(account::order))
}

/// Create all routes for the storefront.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(home::home))
        .nest("/products", product_routes())
        .route("/categories/{slug}", get(categories::show))
        .nest("/collections", collection_routes())
        .nest("/cart", cart_routes())
        .route("/wishlist", get(wishlist::show))
        .route("/wishlist/toggle", post(wishlist::toggle))
        .route("/compare", get(compare::show))
        .route("/compare/toggle", post(compare::toggle))
        .route("/compare/clear", post(compare::clear))
        .route("/checkout", get(checkout::show).post(checkout::place))
        .nest("/account", account_routes())
        .nest("/auth", auth_routes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::extract::Query;
    use axum::http::Uri;
    use shopfront_backend::MAX_PAGE;

    use super::*;

    #[test]
    fn test_out_of_range_page_parameter_is_clamped() {
        let uri: Uri = "/products?page=18446744073709551615".parse().unwrap();
        let Query(query) = Query::<ListingQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.page_number(), MAX_PAGE);

        let uri: Uri = "/products?page=0".parse().unwrap();
        let Query(query) = Query::<ListingQuery>::try_from_uri(&uri).unwrap();
        assert_eq!(query.page_number(), 1);
        assert_eq!(ListingQuery::default().page_number(), 1);
    }

    #[test]
    fn test_safe_next() {
        assert_eq!(safe_next(Some("/account/orders"), "/"), "/account/orders");
        assert_eq!(safe_next(Some("https://evil.example"), "/"), "/");
        assert_eq!(safe_next(Some("//evil.example"), "/"), "/");
        assert_eq!(safe_next(Some("/\\evil.example"), "/"), "/");
        assert_eq!(safe_next(None, "/cart"), "/cart");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some(" Jo ".into())), Some("Jo".into()));
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn test_pagination_urls() {
        let pages = Pagination::new("/products?q=tea".into(), 2, 3, 60);
        assert_eq!(pages.previous_url(), "/products?q=tea&page=1");
        assert_eq!(pages.next_url(), "/products?q=tea&page=3");
        assert!(pages.has_previous() && pages.has_next());

        let first = Pagination::new("/collections/spring".into(), 1, 1, 4);
        assert_eq!(first.url_for(1), "/collections/spring?page=1");
        assert!(!first.has_previous() && !first.has_next());
    }
}
