//! Row types mirroring the hosted tables.
//!
//! Every record deserializes from the backend's JSON with snake_case column
//! names. Each table has a row type plus `New*` and `*Patch` input forms; the
//! forms implement [`Validate`] so nothing malformed is sent upstream.

mod catalog;
mod marketing;
mod order;
mod review;
mod user;
mod wishlist;

pub use catalog::{Category, CategoryPatch, NewCategory, NewProduct, Product, ProductPatch};
pub use marketing::{
    Collection, CollectionPatch, CollectionProduct, NewArrival, NewArrivalPatch, NewCollection,
    NewNewArrival, NewOffer, Offer, OfferPatch,
};
pub use order::{
    AddressSnapshot, NewOrder, NewOrderItem, Order, OrderItem, OrderItemPatch, OrderPatch,
};
pub use review::{NewReview, Review, ReviewPatch, average_rating};
pub use user::{Address, AddressPatch, NewAddress, NewProfile, Profile, ProfilePatch};
pub use wishlist::{NewWishlistItem, WishlistItem, WishlistItemPatch};

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::validation::Validate;

/// Columns the backend maintains itself; stripped from every write payload.
pub const READ_ONLY_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Aliases accepted from form payloads for every table, mapping camelCase
/// keys to their column names.
pub const COMMON_ALIASES: &[(&str, &str)] = &[
    ("createdAt", "created_at"),
    ("updatedAt", "updated_at"),
    ("imageUrl", "image_url"),
    ("isActive", "is_active"),
    ("isFeatured", "is_featured"),
    ("sortOrder", "sort_order"),
];

/// A hosted table and its row type.
pub trait Entity: DeserializeOwned + Serialize + Clone + Send + Sync + 'static {
    /// Primary key type.
    type Id: Display + Debug + Copy + Eq + Hash + Send + Sync + Serialize + 'static;
    /// Insert form.
    type New: Serialize + DeserializeOwned + Validate + Send + Sync;
    /// Partial update form.
    type Patch: Serialize + DeserializeOwned + Validate + Send + Sync;

    /// Table name.
    const TABLE: &'static str;
    /// Primary key column.
    const ID_COLUMN: &'static str = "id";
    /// Columns that must be present and non-empty on insert.
    const REQUIRED_FIELDS: &'static [&'static str];
    /// Table-specific `(alias, column)` pairs, checked before [`COMMON_ALIASES`].
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[];
    /// Column list for reads (PostgREST `select=`).
    const SELECT: &'static str = "*";

    /// Primary key of this row.
    fn id(&self) -> Self::Id;

    /// Resolve a form key to a column name.
    #[must_use]
    fn column_for(key: &str) -> &str {
        Self::FIELD_ALIASES
            .iter()
            .chain(COMMON_ALIASES)
            .find(|&&(alias, _)| alias == key)
            .map_or(key, |&(_, column)| column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_for_prefers_table_aliases() {
        assert_eq!(Product::column_for("categoryId"), "category_id");
        assert_eq!(Product::column_for("imageUrl"), "image_url");
        assert_eq!(Product::column_for("name"), "name");
        assert_eq!(Order::column_for("userId"), "user_id");
    }

    #[test]
    fn test_tables() {
        assert_eq!(Product::TABLE, "products");
        assert_eq!(Profile::TABLE, "profiles");
        assert_eq!(NewArrival::TABLE, "new_arrivals");
        assert_eq!(WishlistItem::TABLE, "wishlist_items");
    }
}
