//! Saved-for-later products.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Entity;
use super::catalog::Product;
use crate::types::{ProductId, UserId, WishlistItemId};
use crate::validation::{Validate, ValidationErrors, Validator};

/// A row of `wishlist_items`; reads embed the product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub id: WishlistItemId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "products", skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

impl Entity for WishlistItem {
    type Id = WishlistItemId;
    type New = NewWishlistItem;
    type Patch = WishlistItemPatch;

    const TABLE: &'static str = "wishlist_items";
    const REQUIRED_FIELDS: &'static [&'static str] = &["user_id", "product_id"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] =
        &[("userId", "user_id"), ("productId", "product_id")];
    const SELECT: &'static str = "*,products(*)";

    fn id(&self) -> WishlistItemId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWishlistItem {
    pub user_id: UserId,
    pub product_id: ProductId,
}

impl Validate for NewWishlistItem {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new().finish()
    }
}

/// Wishlist rows are only inserted or deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistItemPatch {}

impl Validate for WishlistItemPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new().finish()
    }
}
