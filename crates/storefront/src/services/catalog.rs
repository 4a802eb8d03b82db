//! Read side of the catalog: listings, detail pages, merchandising.
//!
//! Every read goes through the shared query cache, which the realtime relay
//! keeps fresh; by-id lookups from carts and collections are batched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use shopfront_backend::{
    BackendClient, BackendError, BatchLoader, CrudService, Order, Page, Query, QueryCache,
};
use shopfront_core::{
    Category, Collection, CollectionProduct, NewArrival, Offer, Price, Product, ProductId,
    ProductStatus, Review,
};
use tracing::instrument;

/// Columns matched by the search box.
const SEARCH_COLUMNS: &[&str] = &["name", "description", "sku"];

/// Listing order selected with `?sort=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Name,
}

impl ProductSort {
    /// Parse the query parameter; unknown values fall back to newest.
    #[must_use]
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("price_asc") => Self::PriceAsc,
            Some("price_desc") => Self::PriceDesc,
            Some("name") => Self::Name,
            _ => Self::Newest,
        }
    }

    #[must_use]
    pub const fn as_param(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::PriceAsc => "price_asc",
            Self::PriceDesc => "price_desc",
            Self::Name => "name",
        }
    }

    fn apply(self, query: Query) -> Query {
        match self {
            Self::Newest => query.order("created_at", Order::Desc),
            Self::PriceAsc => query.order("price", Order::Asc),
            Self::PriceDesc => query.order("price", Order::Desc),
            Self::Name => query.order("name", Order::Asc),
        }
    }
}

/// Filters for the product listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category: Option<Category>,
    pub sort: ProductSort,
    pub page: u64,
}

impl ProductFilter {
    /// Query for active products matching the filter, without paging.
    #[must_use]
    pub fn to_query(&self) -> Query {
        let mut query = Query::new().eq("status", ProductStatus::Active);
        if let Some(term) = self.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            query = query.search(SEARCH_COLUMNS, term);
        }
        if let Some(category) = &self.category {
            query = query.eq("category_id", category.id);
        }
        self.sort.apply(query)
    }
}

/// Product with its price after offers, ready for display.
#[derive(Debug, Clone)]
pub struct PricedProduct {
    pub product: Product,
    pub price: Price,
    /// Badge of the offer that set `price`, if any.
    pub offer_label: Option<String>,
}

impl PricedProduct {
    #[must_use]
    pub fn new(product: Product, offers: &[Offer], now: DateTime<Utc>) -> Self {
        let price = product.effective_price(offers, now);
        let offer_label = if price < product.price {
            offers
                .iter()
                .filter(|o| o.is_active_at(now) && o.applies_to(&product))
                .min_by_key(|o| o.apply(product.price))
                .map(Offer::label)
        } else {
            None
        };
        Self {
            product,
            price,
            offer_label,
        }
    }

    /// Whether the shopper pays less than the list price.
    #[must_use]
    pub fn is_discounted(&self) -> bool {
        self.price < self.product.price
    }

    /// Price shown struck through: list price when an offer applies,
    /// otherwise the compare-at price.
    #[must_use]
    pub fn was_price(&self) -> Option<Price> {
        if self.is_discounted() {
            Some(self.product.price)
        } else {
            self.product.compare_at_price.filter(|_| self.product.is_on_sale())
        }
    }
}

/// Cached catalog reads.
#[derive(Clone)]
pub struct Catalog {
    client: BackendClient,
    cache: QueryCache,
    products: CrudService<Product>,
    categories: CrudService<Category>,
    collections: CrudService<Collection>,
    offers: CrudService<Offer>,
    new_arrivals: CrudService<NewArrival>,
    reviews: CrudService<Review>,
    product_loader: BatchLoader<ProductId, Product>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

impl Catalog {
    /// Must be called inside a tokio runtime (spawns the batch loader).
    #[must_use]
    pub fn new(client: BackendClient, cache: QueryCache) -> Self {
        let products = CrudService::new(client.clone(), cache.clone());
        let product_loader = products.loader();
        Self {
            categories: CrudService::new(client.clone(), cache.clone()),
            collections: CrudService::new(client.clone(), cache.clone()),
            offers: CrudService::new(client.clone(), cache.clone()),
            new_arrivals: CrudService::new(client.clone(), cache.clone()),
            reviews: CrudService::new(client.clone(), cache.clone()),
            products,
            product_loader,
            client,
            cache,
        }
    }

    #[must_use]
    pub const fn products(&self) -> &CrudService<Product> {
        &self.products
    }

    #[must_use]
    pub const fn reviews(&self) -> &CrudService<Review> {
        &self.reviews
    }

    // =========================================================================
    // Merchandising
    // =========================================================================

    /// Offers currently running.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the offers cannot be read.
    pub async fn active_offers(&self, now: DateTime<Utc>) -> Result<Vec<Offer>, BackendError> {
        let offers = self
            .offers
            .list(&Query::new().eq("is_active", true).order("created_at", Order::Desc))
            .await?;
        Ok(offers.into_iter().filter(|o| o.is_active_at(now)).collect())
    }

    /// Featured collections in display order.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the collections cannot be read.
    pub async fn featured_collections(&self, limit: u64) -> Result<Vec<Collection>, BackendError> {
        self.collections
            .list(
                &Query::new()
                    .eq("is_featured", true)
                    .order("sort_order", Order::Asc)
                    .limit(limit),
            )
            .await
    }

    /// Current new arrivals whose product is on sale.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the arrivals cannot be read.
    pub async fn new_arrivals(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Product>, BackendError> {
        let arrivals = self
            .new_arrivals
            .list(&Query::new().order("position", Order::Asc))
            .await?;
        Ok(arrivals
            .into_iter()
            .filter(|a| a.is_current(now))
            .filter_map(|a| a.product)
            .filter(|p| p.status == ProductStatus::Active)
            .take(limit)
            .collect())
    }

    /// Featured active products, newest first.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the products cannot be read.
    pub async fn featured_products(&self, limit: u64) -> Result<Vec<Product>, BackendError> {
        self.products
            .list(
                &Query::new()
                    .eq("status", ProductStatus::Active)
                    .eq("is_featured", true)
                    .order("created_at", Order::Desc)
                    .limit(limit),
            )
            .await
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// One page of the product listing.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the listing cannot be read.
    #[instrument(skip(self))]
    pub async fn search_products(
        &self,
        filter: &ProductFilter,
        per_page: u64,
    ) -> Result<Page<Product>, BackendError> {
        self.products
            .page(&filter.to_query(), filter.page, per_page)
            .await
    }

    /// Active product by slug.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the product cannot be read.
    pub async fn product_by_slug(&self, slug: &str) -> Result<Option<Product>, BackendError> {
        let product = self.products.get_by("slug", slug).await?;
        Ok(product.filter(|p| p.status == ProductStatus::Active))
    }

    /// Other active products from the same category.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the products cannot be read.
    pub async fn related_products(
        &self,
        product: &Product,
        limit: u64,
    ) -> Result<Vec<Product>, BackendError> {
        let Some(category_id) = product.category_id else {
            return Ok(Vec::new());
        };
        self.products
            .list(
                &Query::new()
                    .eq("status", ProductStatus::Active)
                    .eq("category_id", category_id)
                    .neq("id", product.id)
                    .order("created_at", Order::Desc)
                    .limit(limit),
            )
            .await
    }

    /// Look up products by id through the batch loader.
    ///
    /// # Errors
    ///
    /// Returns the first lookup error.
    pub async fn products_by_id(
        &self,
        ids: Vec<ProductId>,
    ) -> Result<HashMap<ProductId, Product>, BackendError> {
        let found = self.product_loader.load_many(ids).await?;
        Ok(found
            .into_iter()
            .flatten()
            .map(|p| (p.id, p))
            .collect())
    }

    // =========================================================================
    // Categories and collections
    // =========================================================================

    /// Categories in display order.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the categories cannot be read.
    pub async fn categories(&self) -> Result<Vec<Category>, BackendError> {
        self.categories
            .list(&Query::new().order("sort_order", Order::Asc).order("name", Order::Asc))
            .await
    }

    /// # Errors
    ///
    /// Returns `BackendError` if the category cannot be read.
    pub async fn category_by_slug(&self, slug: &str) -> Result<Option<Category>, BackendError> {
        self.categories.get_by("slug", slug).await
    }

    /// All collections in display order.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the collections cannot be read.
    pub async fn collections(&self) -> Result<Vec<Collection>, BackendError> {
        self.collections
            .list(&Query::new().order("sort_order", Order::Asc).order("name", Order::Asc))
            .await
    }

    /// # Errors
    ///
    /// Returns `BackendError` if the collection cannot be read.
    pub async fn collection_by_slug(&self, slug: &str) -> Result<Option<Collection>, BackendError> {
        self.collections.get_by("slug", slug).await
    }

    /// Active products of a collection in their curated order.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if membership or products cannot be read.
    #[instrument(skip(self, collection), fields(collection = %collection.slug))]
    pub async fn collection_products(
        &self,
        collection: &Collection,
    ) -> Result<Vec<Product>, BackendError> {
        let query = Query::new()
            .eq("collection_id", collection.id)
            .order("position", Order::Asc);
        let value = self
            .cache
            .get_or_fetch(
                query.cache_key(CollectionProduct::TABLE),
                self.client.select_value(CollectionProduct::TABLE, &query),
            )
            .await?;
        let links: Vec<CollectionProduct> = serde_json::from_value(Value::clone(&value))?;

        let ids: Vec<ProductId> = links.iter().map(|l| l.product_id).collect();
        let mut products = self.products_by_id(ids.clone()).await?;
        Ok(ids
            .into_iter()
            .filter_map(|id| products.remove(&id))
            .filter(|p| p.status == ProductStatus::Active)
            .collect())
    }

    /// Newest-first reviews of a product.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the reviews cannot be read.
    pub async fn reviews_for(&self, product_id: ProductId) -> Result<Vec<Review>, BackendError> {
        self.reviews
            .list(
                &Query::new()
                    .eq("product_id", product_id)
                    .order("created_at", Order::Desc)
                    .limit(50),
            )
            .await
    }

    /// Price every product against the current offers.
    #[must_use]
    pub fn price_all(
        products: Vec<Product>,
        offers: &[Offer],
        now: DateTime<Utc>,
    ) -> Vec<PricedProduct> {
        products
            .into_iter()
            .map(|p| PricedProduct::new(p, offers, now))
            .collect()
    }

    #[must_use]
    pub const fn cache(&self) -> &QueryCache {
        &self.cache
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use shopfront_core::{CategoryId, OfferId, OfferKind};

    use super::*;

    fn product(price: i64) -> Product {
        Product {
            id: ProductId::generate(),
            name: "Green Tea".into(),
            slug: "green-tea".into(),
            description: None,
            price: Price::from_cents(price).unwrap(),
            compare_at_price: None,
            stock: 10,
            category_id: None,
            image_url: None,
            images: Vec::new(),
            status: ProductStatus::Active,
            is_featured: false,
            sku: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn offer(kind: OfferKind, value: Decimal) -> Offer {
        Offer {
            id: OfferId::generate(),
            title: "Sale".into(),
            description: None,
            kind,
            value,
            product_id: None,
            category_id: None,
            code: None,
            banner_url: None,
            starts_at: None,
            ends_at: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sort_param() {
        assert_eq!(ProductSort::from_param(Some("price_asc")), ProductSort::PriceAsc);
        assert_eq!(ProductSort::from_param(Some("bogus")), ProductSort::Newest);
        assert_eq!(ProductSort::from_param(None), ProductSort::Newest);
        assert_eq!(ProductSort::Name.as_param(), "name");
    }

    #[test]
    fn test_filter_query() {
        let category = Category {
            id: CategoryId::generate(),
            name: "Tea".into(),
            slug: "tea".into(),
            description: None,
            parent_id: None,
            image_url: None,
            sort_order: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let filter = ProductFilter {
            search: Some(" matcha ".into()),
            category: Some(category.clone()),
            sort: ProductSort::PriceDesc,
            page: 2,
        };
        let pairs = filter.to_query().to_pairs();
        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("status").as_deref(), Some("eq.active"));
        assert_eq!(get("category_id"), Some(format!("eq.{}", category.id)));
        assert_eq!(get("order").as_deref(), Some("price.desc"));
        assert!(get("or").unwrap().contains("name.ilike.*matcha*"));
    }

    #[test]
    fn test_blank_search_adds_no_filter() {
        let filter = ProductFilter {
            search: Some("   ".into()),
            ..Default::default()
        };
        assert!(filter.to_query().to_pairs().iter().all(|(k, _)| k != "or"));
    }

    #[test]
    fn test_priced_product_uses_best_offer() {
        let now = Utc::now();
        let offers = vec![
            offer(OfferKind::Percentage, Decimal::from(10)),
            offer(OfferKind::FixedAmount, Decimal::from(5)),
        ];
        let priced = PricedProduct::new(product(2000), &offers, now);
        assert_eq!(priced.price.to_string(), "15.00");
        assert_eq!(priced.offer_label.as_deref(), Some("5.00 off"));
        assert!(priced.is_discounted());
        assert_eq!(priced.was_price().unwrap().to_string(), "20.00");
    }

    #[test]
    fn test_priced_product_without_offers() {
        let mut p = product(2000);
        p.compare_at_price = Some(Price::from_cents(2500).unwrap());
        let priced = PricedProduct::new(p, &[], Utc::now());
        assert!(!priced.is_discounted());
        assert!(priced.offer_label.is_none());
        assert_eq!(priced.was_price().unwrap().to_string(), "25.00");
    }
}
