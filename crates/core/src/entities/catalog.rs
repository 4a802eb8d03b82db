//! Products and categories.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Entity;
use super::marketing::Offer;
use crate::types::{CategoryId, Price, ProductId, ProductStatus};
use crate::validation::{Validate, ValidationErrors, Validator};

// =============================================================================
// Product
// =============================================================================

/// A row of `products`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Price,
    #[serde(default)]
    pub compare_at_price: Option<Price>,
    pub stock: i32,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub sku: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Stock at or below this level is reported as low in the dashboard.
    pub const LOW_STOCK_THRESHOLD: i32 = 5;

    /// Whether at least one unit can be ordered.
    #[must_use]
    pub const fn is_in_stock(&self) -> bool {
        self.stock > 0
    }

    /// Whether `quantity` units can be ordered.
    #[must_use]
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        i64::from(self.stock) >= i64::from(quantity)
    }

    #[must_use]
    pub const fn is_low_stock(&self) -> bool {
        self.stock <= Self::LOW_STOCK_THRESHOLD
    }

    /// Whether the product has a higher "compare at" price.
    #[must_use]
    pub fn is_on_sale(&self) -> bool {
        self.compare_at_price.is_some_and(|c| c > self.price)
    }

    /// Price after the best applicable active offer, if any.
    #[must_use]
    pub fn effective_price(&self, offers: &[Offer], now: DateTime<Utc>) -> Price {
        offers
            .iter()
            .filter(|o| o.is_active_at(now) && o.applies_to(self))
            .map(|o| o.apply(self.price))
            .min()
            .unwrap_or(self.price)
    }

    /// Primary image, falling back to the first gallery image.
    #[must_use]
    pub fn primary_image(&self) -> Option<&str> {
        self.image_url
            .as_deref()
            .or_else(|| self.images.first().map(String::as_str))
    }
}

impl Entity for Product {
    type Id = ProductId;
    type New = NewProduct;
    type Patch = ProductPatch;

    const TABLE: &'static str = "products";
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "slug", "price"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("categoryId", "category_id"),
        ("compareAtPrice", "compare_at_price"),
        ("stockQuantity", "stock"),
    ];

    fn id(&self) -> ProductId {
        self.id
    }
}

/// Insert form for `products`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_at_price: Option<Decimal>,
    #[serde(default)]
    pub stock: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default)]
    pub status: ProductStatus,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

fn check_product_fields(
    v: &mut Validator,
    price: Option<Decimal>,
    compare_at: Option<Decimal>,
    stock: Option<i32>,
    image_url: Option<&str>,
) {
    v.optional(price, |v, p| {
        v.non_negative("price", p);
    })
    .optional(compare_at, |v, p| {
        v.non_negative("compare_at_price", p);
    })
    .optional(stock, |v, s| {
        v.non_negative_int("stock", i64::from(s));
    })
    .optional(image_url, |v, u| {
        v.url("image_url", u);
    });
}

impl Validate for NewProduct {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.required("name", &self.name)
            .max_len("name", &self.name, 200)
            .slug("slug", &self.slug);
        check_product_fields(
            &mut v,
            Some(self.price),
            self.compare_at_price,
            Some(self.stock),
            self.image_url.as_deref(),
        );
        v.finish()
    }
}

/// Partial update for `products`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_at_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProductStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_featured: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

impl Validate for ProductPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.name.as_deref(), |v, n| {
            v.required("name", n).max_len("name", n, 200);
        })
        .optional(self.slug.as_deref(), |v, s| {
            v.slug("slug", s);
        });
        check_product_fields(
            &mut v,
            self.price,
            self.compare_at_price,
            self.stock,
            self.image_url.as_deref(),
        );
        v.finish()
    }
}

// =============================================================================
// Category
// =============================================================================

/// A row of `categories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<CategoryId>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Category {
    type Id = CategoryId;
    type New = NewCategory;
    type Patch = CategoryPatch;

    const TABLE: &'static str = "categories";
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "slug"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[("parentId", "parent_id")];

    fn id(&self) -> CategoryId {
        self.id
    }
}

/// Insert form for `categories`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
}

impl Validate for NewCategory {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.required("name", &self.name)
            .max_len("name", &self.name, 100)
            .slug("slug", &self.slug)
            .optional(self.image_url.as_deref(), |v, u| {
                v.url("image_url", u);
            });
        v.finish()
    }
}

/// Partial update for `categories`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl Validate for CategoryPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.name.as_deref(), |v, n| {
            v.required("name", n).max_len("name", n, 100);
        })
        .optional(self.slug.as_deref(), |v, s| {
            v.slug("slug", s);
        })
        .optional(self.image_url.as_deref(), |v, u| {
            v.url("image_url", u);
        });
        v.finish()
    }
}
