//! Collections, offers and new arrivals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Entity;
use super::catalog::Product;
use crate::types::{CategoryId, CollectionId, NewArrivalId, OfferId, OfferKind, Price, ProductId};
use crate::validation::{Validate, ValidationErrors, Validator};

// =============================================================================
// Collection
// =============================================================================

/// A row of `collections`: a curated, ordered group of products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Collection {
    type Id = CollectionId;
    type New = NewCollection;
    type Patch = CollectionPatch;

    const TABLE: &'static str = "collections";
    const REQUIRED_FIELDS: &'static [&'static str] = &["name", "slug"];

    fn id(&self) -> CollectionId {
        self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCollection {
    pub name: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub sort_order: i32,
}

impl Validate for NewCollection {
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

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_featured: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl Validate for CollectionPatch {
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

/// A row of the `collection_products` link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProduct {
    pub collection_id: CollectionId,
    pub product_id: ProductId,
    #[serde(default)]
    pub position: i32,
}

impl CollectionProduct {
    pub const TABLE: &'static str = "collection_products";

    /// Link rows for `product_ids` in the given order.
    #[must_use]
    pub fn ordered(collection_id: CollectionId, product_ids: &[ProductId]) -> Vec<Self> {
        product_ids
            .iter()
            .zip(0..)
            .map(|(&product_id, position)| Self {
                collection_id,
                product_id,
                position,
            })
            .collect()
    }
}

// =============================================================================
// Offer
// =============================================================================

/// A row of `offers`: a time-boxed discount on a product, a category, or the
/// whole store when neither is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: OfferKind,
    pub value: Decimal,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Offer {
    /// Enabled and inside its `[starts_at, ends_at)` window.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.is_none_or(|start| start <= now)
            && self.ends_at.is_none_or(|end| now < end)
    }

    /// Whether the offer targets this product.
    #[must_use]
    pub fn applies_to(&self, product: &Product) -> bool {
        match (self.product_id, self.category_id) {
            (Some(id), _) => id == product.id,
            (None, Some(category)) => product.category_id == Some(category),
            (None, None) => true,
        }
    }

    /// Discounted price, floored at zero and rounded to cents.
    #[must_use]
    pub fn apply(&self, price: Price) -> Price {
        let discount = match self.kind {
            OfferKind::Percentage => {
                price.amount() * self.value.min(Decimal::ONE_HUNDRED) / Decimal::ONE_HUNDRED
            }
            OfferKind::FixedAmount => self.value,
        };
        price.saturating_sub(discount).rounded()
    }

    /// Short badge text such as `20% off` or `5.00 off`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.kind {
            OfferKind::Percentage => format!("{}% off", self.value.normalize()),
            OfferKind::FixedAmount => format!("{:.2} off", self.value),
        }
    }
}

impl Entity for Offer {
    type Id = OfferId;
    type New = NewOffer;
    type Patch = OfferPatch;

    const TABLE: &'static str = "offers";
    const REQUIRED_FIELDS: &'static [&'static str] = &["title", "kind", "value"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("productId", "product_id"),
        ("categoryId", "category_id"),
        ("bannerUrl", "banner_url"),
        ("startsAt", "starts_at"),
        ("endsAt", "ends_at"),
        ("discountType", "kind"),
        ("discountValue", "value"),
    ];

    fn id(&self) -> OfferId {
        self.id
    }
}

fn check_offer(
    v: &mut Validator,
    kind: Option<OfferKind>,
    value: Option<Decimal>,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
) {
    v.optional(value, |v, value| {
        v.non_negative("value", value);
        if kind == Some(OfferKind::Percentage) {
            v.range("value", value, Decimal::ZERO, Decimal::ONE_HUNDRED);
        }
    });
    if let (Some(start), Some(end)) = (starts_at, ends_at) {
        v.check("ends_at", end > start, "must be after the start date");
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOffer {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub kind: OfferKind,
    pub value: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
}

impl Validate for NewOffer {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.required("title", &self.title)
            .max_len("title", &self.title, 150)
            .optional(self.banner_url.as_deref(), |v, u| {
                v.url("banner_url", u);
            });
        check_offer(
            &mut v,
            Some(self.kind),
            Some(self.value),
            self.starts_at,
            self.ends_at,
        );
        v.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OfferKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Validate for OfferPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.title.as_deref(), |v, t| {
            v.required("title", t).max_len("title", t, 150);
        });
        check_offer(&mut v, self.kind, self.value, self.starts_at, self.ends_at);
        v.finish()
    }
}

// =============================================================================
// New arrivals
// =============================================================================

/// A row of `new_arrivals`: a product highlighted on the home page.
///
/// Reads select `*,products(*)` so the product row is embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArrival {
    pub id: NewArrivalId,
    pub product_id: ProductId,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub featured_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "products", skip_serializing_if = "Option::is_none")]
    pub product: Option<Product>,
}

impl NewArrival {
    /// Still within its feature window.
    #[must_use]
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.featured_until.is_none_or(|until| now < until)
    }
}

impl Entity for NewArrival {
    type Id = NewArrivalId;
    type New = NewNewArrival;
    type Patch = NewArrivalPatch;

    const TABLE: &'static str = "new_arrivals";
    const REQUIRED_FIELDS: &'static [&'static str] = &["product_id"];
    const FIELD_ALIASES: &'static [(&'static str, &'static str)] = &[
        ("productId", "product_id"),
        ("featuredUntil", "featured_until"),
    ];
    const SELECT: &'static str = "*,products(*)";

    fn id(&self) -> NewArrivalId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNewArrival {
    pub product_id: ProductId,
    #[serde(default)]
    pub position: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_until: Option<DateTime<Utc>>,
}

impl Validate for NewNewArrival {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.non_negative_int("position", i64::from(self.position));
        v.finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArrivalPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_until: Option<DateTime<Utc>>,
}

impl Validate for NewArrivalPatch {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.optional(self.position, |v, p| {
            v.non_negative_int("position", i64::from(p));
        });
        v.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn offer(kind: OfferKind, value: i64) -> Offer {
        let now = Utc::now();
        Offer {
            id: OfferId::generate(),
            title: "Spring".into(),
            description: None,
            kind,
            value: Decimal::from(value),
            product_id: None,
            category_id: None,
            code: None,
            banner_url: None,
            starts_at: None,
            ends_at: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_offer_window() {
        let now = Utc::now();
        let mut o = offer(OfferKind::Percentage, 10);
        assert!(o.is_active_at(now));

        o.starts_at = Some(now + Duration::hours(1));
        assert!(!o.is_active_at(now));

        o.starts_at = Some(now - Duration::hours(2));
        o.ends_at = Some(now);
        assert!(!o.is_active_at(now), "end is exclusive");

        o.ends_at = None;
        o.is_active = false;
        assert!(!o.is_active_at(now));
    }

    #[test]
    fn test_offer_apply() {
        let price = Price::parse("19.99").unwrap();
        assert_eq!(offer(OfferKind::Percentage, 25).apply(price).to_string(), "14.99");
        assert_eq!(offer(OfferKind::FixedAmount, 5).apply(price).to_string(), "14.99");
        assert_eq!(offer(OfferKind::FixedAmount, 50).apply(price), Price::ZERO);
        assert_eq!(offer(OfferKind::Percentage, 150).apply(price), Price::ZERO);
    }

    #[test]
    fn test_offer_label() {
        assert_eq!(offer(OfferKind::Percentage, 20).label(), "20% off");
        assert_eq!(offer(OfferKind::FixedAmount, 5).label(), "5.00 off");
    }

    #[test]
    fn test_new_offer_validation() {
        let now = Utc::now();
        let bad = NewOffer {
            title: "Too much".into(),
            kind: OfferKind::Percentage,
            value: Decimal::from(120),
            starts_at: Some(now),
            ends_at: Some(now - Duration::days(1)),
            ..NewOffer::default()
        };
        let errors = bad.validate().unwrap_err();
        assert_eq!(errors.message_for("value"), Some("must be between 0 and 100"));
        assert_eq!(errors.message_for("ends_at"), Some("must be after the start date"));

        let fixed = NewOffer {
            title: "Five off".into(),
            kind: OfferKind::FixedAmount,
            value: Decimal::from(120),
            ..NewOffer::default()
        };
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn test_collection_products_are_positioned() {
        let collection = CollectionId::generate();
        let a = ProductId::generate();
        let b = ProductId::generate();
        let rows = CollectionProduct::ordered(collection, &[a, b]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].product_id, b);
        assert_eq!(rows[1].position, 1);
    }

    #[test]
    fn test_new_arrival_embeds_product() {
        let row: NewArrival = serde_json::from_value(serde_json::json!({
            "id": "3e7b8a52-1c1a-4e0e-9a55-0a1f6c1b2c3d",
            "product_id": "7f9c24e5-2b6a-4c4b-8d0e-4d3b8f3f5a11",
            "position": 0,
            "created_at": "2024-03-01T10:00:00Z",
            "products": null
        }))
        .unwrap();
        assert!(row.product.is_none());
        assert!(row.is_current(Utc::now()));
    }
}
