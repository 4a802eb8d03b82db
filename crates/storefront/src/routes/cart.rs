//! Cart route handlers.
//!
//! The cart lives in the session as product IDs and quantities; prices and
//! stock are read from the catalog on every render, so the page always
//! reflects current offers.

use askama::Template;
use askama_web::WebTemplate;
use axum::{Form, extract::State, response::Redirect};
use chrono::Utc;
use serde::Deserialize;
use shopfront_core::{Product, ProductId, ProductStatus};
use tower_sessions::Session;
use tracing::instrument;

use super::{redirect_with, safe_next};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::filters;
use crate::middleware::PageContext;
use crate::models::{Cart, Flash, session_keys};
use crate::services::CartSummary;
use crate::services::checkout::price_cart;
use crate::state::AppState;

// =============================================================================
// Session Helpers
// =============================================================================

/// Load the cart from the session (empty when absent).
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn load_cart(
    session: &Session,
) -> std::result::Result<Cart, tower_sessions::session::Error> {
    Ok(session.get::<Cart>(session_keys::CART).await?.unwrap_or_default())
}

/// Store the cart in the session.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn save_cart(
    session: &Session,
    cart: &Cart,
) -> std::result::Result<(), tower_sessions::session::Error> {
    session.insert(session_keys::CART, cart).await
}

/// Why a quantity cannot be added.
fn stock_problem(product: &Product, wanted: u32) -> Option<String> {
    if product.status != ProductStatus::Active {
        return Some(format!("{} is no longer available.", product.name));
    }
    if !product.is_in_stock() {
        return Some(format!("{} is out of stock.", product.name));
    }
    if !product.has_stock_for(wanted) {
        return Some(format!(
            "Only {} of {} left in stock.",
            product.stock, product.name
        ));
    }
    None
}

// =============================================================================
// Handlers
// =============================================================================

/// Cart page template.
#[derive(Template, WebTemplate)]
#[template(path = "cart/show.html")]
pub struct CartShowTemplate {
    pub page: PageContext,
    pub summary: CartSummary,
}

/// Display cart page.
#[instrument(skip(state, session, page))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    page: PageContext,
) -> Result<CartShowTemplate> {
    let cart = load_cart(&session).await?;
    let summary = price_cart(state.catalog(), &cart, &state.config().shipping, Utc::now()).await?;

    // Drop lines whose product is gone so the badge matches the page.
    if !summary.unavailable.is_empty() {
        let mut cart = cart;
        for id in &summary.unavailable {
            cart.remove(*id);
        }
        save_cart(&session, &cart).await?;
    }

    Ok(CartShowTemplate { page, summary })
}

/// Add to cart form data.
#[derive(Debug, Deserialize)]
pub struct AddToCartForm {
    pub product_id: ProductId,
    pub quantity: Option<u32>,
    pub next: Option<String>,
}

/// Add a product to the cart.
#[instrument(skip(state, session))]
pub async fn add(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<AddToCartForm>,
) -> Result<Redirect> {
    let back = safe_next(form.next.as_deref(), "/cart");
    let product = state
        .catalog()
        .products()
        .find(form.product_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {}", form.product_id)))?;

    let mut cart = load_cart(&session).await?;
    let quantity = form.quantity.unwrap_or(1).max(1);
    let wanted = cart.quantity_of(product.id).saturating_add(quantity);

    if let Some(problem) = stock_problem(&product, wanted) {
        return Ok(redirect_with(&session, &back, Flash::error(problem)).await);
    }

    cart.add(product.id, quantity);
    save_cart(&session, &cart).await?;
    add_breadcrumb("cart", "Added to cart", Some(&[("product", product.slug.as_str())]));

    Ok(redirect_with(
        &session,
        &back,
        Flash::success(format!("{} added to your cart.", product.name)),
    )
    .await)
}

/// Update cart form data.
#[derive(Debug, Deserialize)]
pub struct UpdateCartForm {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Change a line's quantity; zero removes the line.
#[instrument(skip(state, session))]
pub async fn update(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<UpdateCartForm>,
) -> Result<Redirect> {
    let mut cart = load_cart(&session).await?;

    if form.quantity > 0 {
        let product = state.catalog().products().find(form.product_id).await?;
        let problem = product.as_ref().map_or_else(
            || Some("That product is no longer available.".to_string()),
            |p| stock_problem(p, form.quantity),
        );
        if let Some(problem) = problem {
            return Ok(redirect_with(&session, "/cart", Flash::error(problem)).await);
        }
    }

    if !cart.set(form.product_id, form.quantity) {
        let flash = Flash::info("That item is not in your cart.");
        return Ok(redirect_with(&session, "/cart", flash).await);
    }
    save_cart(&session, &cart).await?;

    Ok(Redirect::to("/cart"))
}

/// Remove from cart form data.
#[derive(Debug, Deserialize)]
pub struct RemoveFromCartForm {
    pub product_id: ProductId,
}

/// Remove a line from the cart.
#[instrument(skip(session))]
pub async fn remove(session: Session, Form(form): Form<RemoveFromCartForm>) -> Result<Redirect> {
    let mut cart = load_cart(&session).await?;
    if cart.remove(form.product_id) {
        save_cart(&session, &cart).await?;
        let flash = Flash::info("Item removed from your cart.");
        return Ok(redirect_with(&session, "/cart", flash).await);
    }
    Ok(Redirect::to("/cart"))
}
