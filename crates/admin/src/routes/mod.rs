//! HTTP route handlers for admin.
//!
//! # Route Structure
//!
//! ```text
//! # Auth
//! POST   /auth/login                    - Password sign-in (admin role required)
//! POST   /auth/logout                   - Sign out
//! GET    /api/me                        - Signed-in admin
//!
//! # Dashboard
//! GET    /api/dashboard                 - Counts, revenue, low stock, recent orders
//!
//! # Catalog
//! GET    /api/products                  - List (?q, ?category, ?status, ?page)
//! POST   /api/products                  - Create
//! GET    /api/products/{id}             - Detail
//! PATCH  /api/products/{id}             - Update
//! DELETE /api/products/{id}             - Delete
//! POST   /api/products/{id}/image       - Upload an image (multipart `file`)
//! GET    /api/categories                - List
//! POST   /api/categories                - Create
//! GET    /api/categories/{id}           - Detail
//! PATCH  /api/categories/{id}           - Update
//! DELETE /api/categories/{id}           - Delete
//! GET    /api/collections               - List
//! POST   /api/collections               - Create
//! GET    /api/collections/{id}          - Detail with ordered product IDs
//! PATCH  /api/collections/{id}          - Update
//! DELETE /api/collections/{id}          - Delete
//! PUT    /api/collections/{id}/products - Replace membership
//!
//! # Marketing
//! GET    /api/offers                    - List (?active)
//! POST   /api/offers                    - Create
//! PATCH  /api/offers/{id}               - Update
//! DELETE /api/offers/{id}               - Delete
//! GET    /api/new-arrivals              - List
//! POST   /api/new-arrivals              - Create
//! DELETE /api/new-arrivals/{id}         - Delete
//!
//! # Orders & users
//! GET    /api/orders                    - List (?status, ?page)
//! GET    /api/orders/{id}               - Detail with items
//! PATCH  /api/orders/{id}/status        - Move along the order lifecycle
//! GET    /api/users                     - List profiles (?q, ?role, ?page)
//! PATCH  /api/users/{id}/role           - Grant or revoke admin
//!
//! # Live updates
//! GET    /api/events                    - SSE stream of row changes (?table)
//! ```
//!
//! `/health` and `/health/ready` are mounted in `main.rs`.

use std::str::FromStr;

use axum::{
    Router,
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts},
    routing::{delete, get, patch, post, put},
};
use serde_json::{Map, Value};
use shopfront_backend::clamp_page;

use crate::config::AdminConfig;
use crate::error::AppError;
use crate::middleware::login_rate_limiter;
use crate::state::AppState;

pub mod auth;
pub mod catalog;
pub mod collections;
pub mod dashboard;
pub mod events;
pub mod marketing;
pub mod orders;
pub mod users;

/// Slack on top of the upload limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the admin router.
pub fn routes(config: &AdminConfig) -> Router<AppState> {
    let auth = Router::new()
        .route("/auth/login", post(auth::login))
        .layer(login_rate_limiter())
        .route("/auth/logout", post(auth::logout));

    let products = Router::new()
        .route(
            "/api/products",
            get(catalog::list_products).post(catalog::create_product),
        )
        .route(
            "/api/products/{id}",
            get(catalog::show_product)
                .patch(catalog::update_product)
                .delete(catalog::delete_product),
        )
        .route(
            "/api/products/{id}/image",
            post(catalog::upload_image).layer(DefaultBodyLimit::max(
                config.max_upload_bytes + MULTIPART_OVERHEAD,
            )),
        );

    let categories = Router::new()
        .route(
            "/api/categories",
            get(catalog::list_categories).post(catalog::create_category),
        )
        .route(
            "/api/categories/{id}",
            get(catalog::show_category)
                .patch(catalog::update_category)
                .delete(catalog::delete_category),
        );

    let collections = Router::new()
        .route(
            "/api/collections",
            get(collections::list).post(collections::create),
        )
        .route(
            "/api/collections/{id}",
            get(collections::show)
                .patch(collections::update)
                .delete(collections::destroy),
        )
        .route(
            "/api/collections/{id}/products",
            put(collections::replace_products),
        );

    let marketing = Router::new()
        .route(
            "/api/offers",
            get(marketing::list_offers).post(marketing::create_offer),
        )
        .route(
            "/api/offers/{id}",
            patch(marketing::update_offer).delete(marketing::delete_offer),
        )
        .route(
            "/api/new-arrivals",
            get(marketing::list_new_arrivals).post(marketing::create_new_arrival),
        )
        .route(
            "/api/new-arrivals/{id}",
            delete(marketing::delete_new_arrival),
        );

    Router::new()
        .merge(auth)
        .route("/api/me", get(auth::me))
        .route("/api/dashboard", get(dashboard::index))
        .merge(products)
        .merge(categories)
        .merge(collections)
        .merge(marketing)
        .route("/api/orders", get(orders::list))
        .route("/api/orders/{id}", get(orders::show))
        .route("/api/orders/{id}/status", patch(orders::update_status))
        .route("/api/users", get(users::list))
        .route("/api/users/{id}/role", patch(users::update_role))
        .route("/api/events", get(events::stream))
}

// =============================================================================
// Extractors
// =============================================================================

/// JSON body extractor that rejects with the API's JSON error shape.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor that rejects with the API's JSON error shape.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Path extractor that rejects with the API's JSON error shape.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// Loosely-keyed JSON object body for create and update endpoints.
///
/// Keys go through the entity's alias table, so `categoryId` and
/// `category_id` are both accepted.
pub type Payload = ApiJson<Map<String, Value>>;

// =============================================================================
// Shared helpers
// =============================================================================

/// Search term with surrounding whitespace removed, if any.
#[must_use]
pub fn search_term(q: Option<&str>) -> Option<&str> {
    q.map(str::trim).filter(|q| !q.is_empty())
}

/// 1-based page number from an optional `?page=`, capped at
/// [`MAX_PAGE`](shopfront_backend::MAX_PAGE).
#[must_use]
pub fn page_number(page: Option<u64>) -> u64 {
    clamp_page(page.unwrap_or(1))
}

/// Parse an optional status-style filter, ignoring blanks.
///
/// # Errors
///
/// Returns `AppError::BadRequest` naming the rejected value.
pub fn parse_filter<T>(value: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| AppError::BadRequest(e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode;
    use shopfront_core::ProductStatus;

    use super::*;

    #[test]
    fn test_search_and_page_defaults() {
        assert_eq!(search_term(None), None);
        assert_eq!(search_term(Some("   ")), None);
        assert_eq!(search_term(Some("  mug ")), Some("mug"));

        assert_eq!(page_number(None), 1);
        assert_eq!(page_number(Some(0)), 1);
        assert_eq!(page_number(Some(3)), 3);
        assert_eq!(page_number(Some(u64::MAX)), shopfront_backend::MAX_PAGE);
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(parse_filter::<ProductStatus>(None).unwrap(), None);
        assert_eq!(parse_filter::<ProductStatus>(Some(" ")).unwrap(), None);
        assert_eq!(
            parse_filter::<ProductStatus>(Some("draft")).unwrap(),
            Some(ProductStatus::Draft)
        );

        let err = parse_filter::<ProductStatus>(Some("sold")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.user_message(), "invalid product status: sold");
    }
}
