//! Cart pricing and order placement.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shopfront_backend::{BackendError, CrudService};
use shopfront_core::{
    AddressSnapshot, Entity, NewOrder, NewOrderItem, Offer, Order, OrderItem, Price, Product,
    ProductId, ProductStatus, UserId, Validate,
};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::catalog::Catalog;
use crate::config::ShippingConfig;
use crate::models::Cart;

/// Reasons an order cannot be placed.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Your cart is empty.")]
    EmptyCart,

    #[error("Some items in your cart are no longer available. Please review your cart.")]
    Unavailable,

    #[error("Only {available} of {name} left in stock.")]
    InsufficientStock { name: String, available: i32 },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One cart line priced against the live catalog.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product: Product,
    pub quantity: u32,
    pub unit_price: Price,
    pub line_total: Price,
    pub offer_label: Option<String>,
}

impl PricedLine {
    /// Whether the catalog still holds enough stock for this line.
    #[must_use]
    pub fn in_stock(&self) -> bool {
        self.product.has_stock_for(self.quantity)
    }
}

/// Priced cart with totals.
#[derive(Debug, Clone, Default)]
pub struct CartSummary {
    pub lines: Vec<PricedLine>,
    /// Cart entries whose product was deleted or unpublished.
    pub unavailable: Vec<ProductId>,
    pub subtotal: Price,
    pub shipping: Price,
    pub total: Price,
}

impl CartSummary {
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Every line can be fulfilled and nothing disappeared from the catalog.
    #[must_use]
    pub fn is_orderable(&self) -> bool {
        !self.lines.is_empty()
            && self.unavailable.is_empty()
            && self.lines.iter().all(PricedLine::in_stock)
    }
}

/// Price `cart` against already-loaded products and offers.
#[must_use]
pub fn summarize(
    cart: &Cart,
    products: &HashMap<ProductId, Product>,
    offers: &[Offer],
    shipping: &ShippingConfig,
    now: DateTime<Utc>,
) -> CartSummary {
    let mut summary = CartSummary::default();

    for line in &cart.lines {
        let Some(product) = products
            .get(&line.product_id)
            .filter(|p| p.status == ProductStatus::Active)
        else {
            summary.unavailable.push(line.product_id);
            continue;
        };

        let unit_price = product.effective_price(offers, now);
        let offer_label = offers
            .iter()
            .filter(|o| unit_price < product.price && o.is_active_at(now) && o.applies_to(product))
            .find(|o| o.apply(product.price) == unit_price)
            .map(Offer::label);

        summary.lines.push(PricedLine {
            product: product.clone(),
            quantity: line.quantity,
            unit_price,
            line_total: unit_price.times(line.quantity),
            offer_label,
        });
    }

    summary.subtotal = summary.lines.iter().map(|l| l.line_total).sum();
    summary.shipping =
        Price::new(shipping.charge_for(summary.subtotal.amount())).unwrap_or(Price::ZERO);
    summary.total =
        Price::new(summary.subtotal.amount() + summary.shipping.amount()).unwrap_or(Price::ZERO);
    summary
}

/// Load the cart's products and the running offers, then price it.
///
/// # Errors
///
/// Returns `BackendError` if products or offers cannot be read.
#[instrument(skip_all, fields(lines = cart.lines.len()))]
pub async fn price_cart(
    catalog: &Catalog,
    cart: &Cart,
    shipping: &ShippingConfig,
    now: DateTime<Utc>,
) -> Result<CartSummary, BackendError> {
    if cart.is_empty() {
        return Ok(CartSummary::default());
    }
    let (products, offers) = tokio::try_join!(
        catalog.products_by_id(cart.product_ids()),
        catalog.active_offers(now),
    )?;
    Ok(summarize(cart, &products, &offers, shipping, now))
}

/// Build order lines from a priced cart, refusing lines that cannot ship.
///
/// # Errors
///
/// Returns the first line that is unavailable or short on stock.
pub fn order_lines(summary: &CartSummary) -> Result<Vec<NewOrderItem>, CheckoutError> {
    if summary.is_empty() && summary.unavailable.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    if !summary.unavailable.is_empty() {
        return Err(CheckoutError::Unavailable);
    }

    summary
        .lines
        .iter()
        .map(|line| {
            if !line.in_stock() {
                return Err(CheckoutError::InsufficientStock {
                    name: line.product.name.clone(),
                    available: line.product.stock.max(0),
                });
            }
            Ok(NewOrderItem {
                order_id: None,
                product_id: line.product.id,
                product_name: line.product.name.clone(),
                unit_price: line.unit_price.amount(),
                quantity: i32::try_from(line.quantity).unwrap_or(NewOrderItem::MAX_QUANTITY),
            })
        })
        .collect()
}

/// Place an order for the signed-in user.
///
/// `orders` must be scoped to the user so row-level policies apply. The order
/// row is written first, then its items; if the items fail the order row is
/// removed again.
///
/// # Errors
///
/// Returns `CheckoutError` for an empty, stale or understocked cart, and for
/// validation or backend failures.
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn place_order(
    catalog: &Catalog,
    orders: &CrudService<Order>,
    user_id: UserId,
    cart: &Cart,
    address: AddressSnapshot,
    shipping: &ShippingConfig,
) -> Result<Order, CheckoutError> {
    if cart.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let summary = price_cart(catalog, cart, shipping, Utc::now()).await?;
    let mut items = order_lines(&summary)?;
    let new_order = NewOrder::from_lines(
        user_id,
        &items,
        summary.shipping.amount(),
        Decimal::ZERO,
        address,
    );

    let mut order = orders.create(&new_order).await?;

    for item in &mut items {
        item.order_id = Some(order.id);
        item.validate().map_err(BackendError::from)?;
    }
    let inserted: Result<Vec<OrderItem>, BackendError> = orders
        .client()
        .insert_many(OrderItem::TABLE, &items)
        .await;

    match inserted {
        Ok(rows) => order.items = rows,
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "Order items failed, removing order");
            if let Err(cleanup) = orders.delete(order.id).await {
                warn!(order_id = %order.id, error = %cleanup, "Could not remove incomplete order");
            }
            return Err(e.into());
        }
    }

    // Stock is decremented by a database trigger on order_items.
    catalog.products().invalidate();
    info!(order_id = %order.id, total = %order.total, items = order.items.len(), "Order placed");
    Ok(order)
}
