//! Orders and their line items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Entity;
use super::user::Address;
use crate::types::{OrderId, OrderItemId, OrderStatus, PaymentStatus, Price, ProductId, UserId};
use crate::validation::{Validate, ValidationErrors, Validator};

/// Shipping address copied onto the order at checkout, so later edits to the
/// address book do not rewrite history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub full_name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub postal_code: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl AddressSnapshot {
    /// Check the fields needed to ship.
    pub fn check(&self, v: &mut Validator) {
        v.required("full_name", &self.full_name)
            .required("line1", &self.line1)
            .required("city", &self.city)
            .required("postal_code", &self.postal_code)
            .required("country", &self.country)
            .optional(self.phone.as_deref(), |v, p| {
                v.phone("phone", p);
            });
    }
}

impl From<&Address> for AddressSnapshot {
    fn from(a: &Address) -> Self {
        Self {
            full_name: a.full_name.clone(),
            line1: a.line1.clone(),
            line2: a.line2.clone(),
            city: a.city.clone(),
            state: a.state.clone(),
            postal_code: a.postal_code.clone(),
            country: a.country.clone(),
            phone: a.phone.clone(),
        }
    }
}

/// A row of `orders`.
///
/// Reads select `*,order_items(*)` so line items come embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub subtotal: Price,
    #[serde(default = "zero")]
    pub shipping: Price,
    #[serde(default = "zero")]
    pub discount: Price,
    pub total: Price,
    #[serde(default)]
    pub shipping_address: Option<AddressSnapshot>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, rename = "order_items", skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItem>,
}

const fn zero() -> Price {
    Price::ZERO
}

impl Order {
    /// Whether an admin may move the order to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.status.can_transition_to(next)
    }

    /// Total units across all line items.
    #[must_use]
    pub fn item_count(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }

    /// Short human reference, e.g. `#7F9C24E5`.
    #[must_use]
    pub fn reference(&self) -> String {
        let id = self.id.to_string();
        format!("#{}", id.get(..8).unwrap_or(&id).to_uppercase())
    }
}

impl Entity for Order {
    type Id = OrderId;
    type New = NewOrder;
    type Patch = OrderPatch;

    const TABLE: &'static str = "orders";
    const REQUIRED_FIELDS: &'static [&'static str] = &["user_id", "status", "subtotal", "total"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("userId", "user_id"),
        ("paymentStatus", "payment_status"),
        ("shippingAddress", "shipping_address"),
    ];
    const SELECT: &'static str = "*,order_items(*)";

    fn id(&self) -> OrderId {
        self.id
    }
}

/// Insert form for `orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: UserId,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub subtotal: Decimal,
    #[serde(default)]
    pub shipping: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    pub total: Decimal,
    pub shipping_address: AddressSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewOrder {
    /// Build an order from line totals, computing `total` from the parts.
    #[must_use]
    pub fn from_lines(
        user_id: UserId,
        lines: &[NewOrderItem],
        shipping: Decimal,
        discount: Decimal,
        shipping_address: AddressSnapshot,
    ) -> Self {
        let subtotal: Decimal = lines.iter().map(NewOrderItem::line_total).sum();
        Self {
            user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            subtotal,
            shipping,
            discount,
            total: (subtotal + shipping - discount).max(Decimal::ZERO),
            shipping_address,
            notes: None,
        }
    }
}

impl Validate for NewOrder {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.non_negative("subtotal", self.subtotal)
            .non_negative("shipping", self.shipping)
            .non_negative("discount", self.discount)
            .non_negative("total", self.total);
        let expected = (self.subtotal + self.shipping - self.discount).max(Decimal::ZERO);
        v.check("total", self.total == expected, "does not match the order lines");
        self.shipping_address.check(&mut v);
        v.optional(self.notes.as_deref(), |v, n| {
            v.max_len("notes", n, 1000);
        });
        v.finish()
    }
}

/// Partial update for `orders`; status changes must go through
/// [`Order::can_transition_to`] first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for OrderPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.notes.as_deref(), |v, n| {
            v.max_len("notes", n, 1000);
        });
        v.finish()
    }
}

// =============================================================================
// Order items
// =============================================================================

/// A row of `order_items`. Name and unit price are copied at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Price,
    pub quantity: i32,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl OrderItem {
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(u32::try_from(self.quantity).unwrap_or(0))
    }
}

impl Entity for OrderItem {
    type Id = OrderItemId;
    type New = NewOrderItem;
    type Patch = OrderItemPatch;

    const TABLE: &'static str = "order_items";
    const REQUIRED_FIELDS: &'static [&'static str] =
        &["order_id", "product_id", "product_name", "unit_price", "quantity"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("orderId", "order_id"),
        ("productId", "product_id"),
        ("productName", "product_name"),
        ("unitPrice", "unit_price"),
    ];

    fn id(&self) -> OrderItemId {
        self.id
    }
}

/// Insert form for `order_items`. `order_id` is filled in once the parent
/// order row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl NewOrderItem {
    /// Largest quantity accepted for a single line.
    pub const MAX_QUANTITY: i32 = 99;

    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

impl Validate for NewOrderItem {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.required("product_name", &self.product_name)
            .non_negative("unit_price", self.unit_price)
            .range("quantity", self.quantity, 1, Self::MAX_QUANTITY);
        v.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i32>,
}

impl Validate for OrderItemPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.quantity, |v, q| {
            v.range("quantity", q, 1, NewOrderItem::MAX_QUANTITY);
        });
        v.finish()
    }
}
