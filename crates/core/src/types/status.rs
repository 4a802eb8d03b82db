//! Status enums for various entities.
//!
//! Each enum serializes to the lowercase text stored in the hosted tables.

use serde::{Deserialize, Serialize};

/// Error returned when a status string does not name a known variant.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// The stored text form.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        kind: $kind,
                        value: s.to_owned(),
                    }),
                }
            }
        }
    };
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

text_enum!(OrderStatus, "order status", {
    Pending => "pending",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

impl OrderStatus {
    /// Statuses an order may move to from `self`.
    ///
    /// ```text
    /// pending    -> processing | cancelled
    /// processing -> shipped | cancelled
    /// shipped    -> delivered
    /// delivered  -> refunded
    /// cancelled, refunded: terminal
    /// ```
    #[must_use]
    pub const fn next_statuses(&self) -> &'static [Self] {
        match self {
            Self::Pending => &[Self::Processing, Self::Cancelled],
            Self::Processing => &[Self::Shipped, Self::Cancelled],
            Self::Shipped => &[Self::Delivered],
            Self::Delivered => &[Self::Refunded],
            Self::Cancelled | Self::Refunded => &[],
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        self.next_statuses().contains(&next)
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }

    /// Whether the order still counts toward revenue.
    #[must_use]
    pub const fn counts_as_revenue(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Refunded)
    }
}

/// Payment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

text_enum!(PaymentStatus, "payment status", {
    Unpaid => "unpaid",
    Paid => "paid",
    Failed => "failed",
    Refunded => "refunded",
});

/// Role stored on a user's profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular shopper.
    #[default]
    Customer,
    /// Full access to the admin console.
    Admin,
}

text_enum!(UserRole, "user role", {
    Customer => "customer",
    Admin => "admin",
});

impl UserRole {
    /// Whether this role may use the admin console.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// How an offer's `value` is applied to a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    /// `value` is a percentage off (0-100).
    #[default]
    Percentage,
    /// `value` is an absolute amount off.
    FixedAmount,
}

text_enum!(OfferKind, "offer kind", {
    Percentage => "percentage",
    FixedAmount => "fixed_amount",
});

/// Publication status of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

text_enum!(ProductStatus, "product status", {
    Draft => "draft",
    Active => "active",
    Archived => "archived",
});
