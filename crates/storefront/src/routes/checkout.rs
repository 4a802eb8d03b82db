//! Checkout route handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use shopfront_core::{Address, AddressSnapshot};
use tower_sessions::Session;
use tracing::{instrument, warn};

use super::account::{AddressForm, list_addresses, save_address};
use super::cart::{load_cart, save_cart};
use super::redirect_with;
use crate::error::{AppError, Result, add_breadcrumb, describe_validation};
use crate::filters;
use crate::middleware::{PageContext, RequireAuth};
use crate::models::Flash;
use crate::services::CartSummary;
use crate::services::checkout::{place_order, price_cart};
use crate::state::AppState;

/// Checkout page template.
#[derive(Template, WebTemplate)]
#[template(path = "checkout/show.html")]
pub struct CheckoutTemplate {
    pub page: PageContext,
    pub summary: CartSummary,
    pub addresses: Vec<Address>,
}

/// Display the checkout page: saved addresses, a new address form and the
/// order summary.
#[instrument(skip(state, session, user, page), fields(user_id = %user.id))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    page: PageContext,
) -> Result<Response> {
    let cart = load_cart(&session).await?;
    if cart.is_empty() {
        return Ok(redirect_with(&session, "/cart", Flash::info("Your cart is empty."))
            .await
            .into_response());
    }

    let addresses = state.addresses().for_user(&user.access_token);
    let (summary, addresses) = tokio::try_join!(
        async {
            price_cart(state.catalog(), &cart, &state.config().shipping, Utc::now())
                .await
                .map_err(AppError::from)
        },
        async { list_addresses(&addresses, user.id).await.map_err(AppError::from) },
    )?;

    Ok(CheckoutTemplate {
        page,
        summary,
        addresses,
    }
    .into_response())
}

/// Place the order and empty the cart.
#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn place(
    State(state): State<AppState>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Form(form): Form<AddressForm>,
) -> Result<Redirect> {
    const BACK: &str = "/checkout";

    let mut cart = load_cart(&session).await?;
    if cart.is_empty() {
        return Ok(redirect_with(&session, "/cart", Flash::info("Your cart is empty.")).await);
    }

    let addresses = state.addresses().for_user(&user.access_token);
    let snapshot = if let Some(id) = form.saved_address_id() {
        match addresses.find(id).await? {
            Some(address) if address.user_id == user.id => AddressSnapshot::from(&address),
            _ => {
                let flash = Flash::error("Please choose a shipping address.");
                return Ok(redirect_with(&session, BACK, flash).await);
            }
        }
    } else {
        match form.snapshot() {
            Ok(snapshot) => snapshot,
            Err(errors) => {
                let flash = Flash::error(describe_validation(&errors));
                return Ok(redirect_with(&session, BACK, flash).await);
            }
        }
    };

    let orders = state.orders().for_user(&user.access_token);
    let order = match place_order(
        state.catalog(),
        &orders,
        user.id,
        &cart,
        snapshot,
        &state.config().shipping,
    )
    .await
    {
        Ok(order) => order,
        Err(e) => {
            let error = AppError::from(e);
            if error.is_server_error() {
                warn!(error = %error, "Checkout failed");
            }
            return Ok(redirect_with(&session, BACK, Flash::error(error.user_message())).await);
        }
    };

    cart.clear();
    save_cart(&session, &cart).await?;

    // The order stands even if the address book write fails.
    if form.saved_address_id().is_none()
        && form.wants_saved()
        && let Err(e) = save_address(&addresses, &form, user.id).await
    {
        warn!(error = %e, "Could not save checkout address");
    }

    let order_id = order.id.to_string();
    add_breadcrumb("checkout", "Order placed", Some(&[("order_id", order_id.as_str())]));

    Ok(redirect_with(
        &session,
        &format!("/account/orders/{}", order.id),
        Flash::success(format!("Thank you! Order {} has been placed.", order.reference())),
    )
    .await)
}
