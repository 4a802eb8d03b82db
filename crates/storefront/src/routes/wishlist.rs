//! Wishlist route handlers.
//!
//! Wishlist rows belong to the user, so every call goes through a client
//! scoped to their access token.

use askama::Template;
use askama_web::WebTemplate;
use axum::{Form, extract::State, response::Redirect};
use chrono::Utc;
use serde::Deserialize;
use shopfront_backend::{Order, Query};
use shopfront_core::{NewWishlistItem, ProductId, ProductStatus};
use tower_sessions::Session;
use tracing::instrument;

use super::{redirect_with, safe_next};
use crate::error::{AppError, Result};
use crate::filters;
use crate::middleware::{OptionalAuth, PageContext, RequireAuth};
use crate::models::Flash;
use crate::services::{Catalog, PricedProduct};
use crate::state::AppState;

/// Wishlist page template.
#[derive(Template, WebTemplate)]
#[template(path = "wishlist/show.html")]
pub struct WishlistTemplate {
    pub page: PageContext,
    pub products: Vec<PricedProduct>,
}

/// Display the signed-in user's wishlist.
#[instrument(skip(state, user, page), fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    page: PageContext,
) -> Result<WishlistTemplate> {
    let now = Utc::now();
    let query = Query::new()
        .eq("user_id", user.id)
        .order("created_at", Order::Desc);

    let (items, offers) = tokio::try_join!(
        async {
            state
                .wishlist()
                .for_user(&user.access_token)
                .list(&query)
                .await
                .map_err(AppError::from)
        },
        async { state.catalog().active_offers(now).await.map_err(AppError::from) },
    )?;

    // Unpublished products stay in the table but are not shown.
    let products = items
        .into_iter()
        .filter_map(|item| item.product)
        .filter(|p| p.status == ProductStatus::Active)
        .collect();

    Ok(WishlistTemplate {
        page,
        products: Catalog::price_all(products, &offers, now),
    })
}

/// Toggle form data.
#[derive(Debug, Deserialize)]
pub struct ToggleForm {
    pub product_id: ProductId,
    pub next: Option<String>,
}

/// Add the product to the wishlist, or remove it when already there.
#[instrument(skip(state, session, user))]
pub async fn toggle(
    State(state): State<AppState>,
    session: Session,
    OptionalAuth(user): OptionalAuth,
    Form(form): Form<ToggleForm>,
) -> Result<Redirect> {
    let back = safe_next(form.next.as_deref(), "/wishlist");
    let Some(user) = user else {
        // The form posts here, so send the visitor back to the page they came from.
        return Ok(redirect_with(
            &session,
            &format!("/auth/login?next={}", urlencoding::encode(&back)),
            Flash::info("Sign in to save products to your wishlist."),
        )
        .await);
    };

    let wishlist = state.wishlist().for_user(&user.access_token);
    let existing = wishlist
        .list(
            &Query::new()
                .eq("user_id", user.id)
                .eq("product_id", form.product_id)
                .limit(1),
        )
        .await?;

    let flash = if let Some(item) = existing.into_iter().next() {
        wishlist.delete(item.id).await?;
        Flash::info("Removed from your wishlist.")
    } else {
        wishlist
            .create(&NewWishlistItem {
                user_id: user.id,
                product_id: form.product_id,
            })
            .await?;
        Flash::success("Saved to your wishlist.")
    };

    Ok(redirect_with(&session, &back, flash).await)
}
