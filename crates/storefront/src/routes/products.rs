//! Product route handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    Form,
    extract::{Path, Query, State},
    response::Redirect,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use shopfront_backend::Query as BackendQuery;
use shopfront_core::{Category, NewReview, Review, average_rating};
use tower_sessions::Session;
use tracing::instrument;

use super::{ListingQuery, Pagination, non_blank, redirect_with};
use crate::error::{AppError, Result, add_breadcrumb};
use crate::filters;
use crate::middleware::{PageContext, RequireAuth};
use crate::models::{CompareList, Flash, session_keys};
use crate::services::{Catalog, PricedProduct, ProductFilter, ProductSort};
use crate::state::AppState;

const RELATED_PRODUCTS: u64 = 4;

/// Product listing template, shared by `/products` and `/categories/{slug}`.
#[derive(Template, WebTemplate)]
#[template(path = "products/index.html")]
pub struct ProductListTemplate {
    pub page: PageContext,
    pub heading: String,
    pub description: Option<String>,
    /// Listing path the filter form posts back to.
    pub action: String,
    pub products: Vec<PricedProduct>,
    pub pagination: Pagination,
    pub search: String,
    pub sort: &'static str,
    pub category: Option<Category>,
}

/// Product detail template.
#[derive(Template, WebTemplate)]
#[template(path = "products/show.html")]
pub struct ProductShowTemplate {
    pub page: PageContext,
    pub item: PricedProduct,
    pub category: Option<Category>,
    pub reviews: Vec<Review>,
    pub average_rating: Option<Decimal>,
    pub related: Vec<PricedProduct>,
    pub in_wishlist: bool,
    pub in_compare: bool,
}

impl ProductShowTemplate {
    /// Whether the signed-in user already reviewed this product.
    #[must_use]
    pub fn has_reviewed(&self) -> bool {
        self.page
            .user
            .as_ref()
            .is_some_and(|u| self.reviews.iter().any(|r| r.user_id == u.id))
    }
}

/// Build the filter and page for a listing request.
pub(crate) fn listing_filter(query: &ListingQuery, category: Option<Category>) -> ProductFilter {
    ProductFilter {
        search: non_blank(query.q.clone()),
        category,
        sort: ProductSort::from_param(query.sort.as_deref()),
        page: query.page_number(),
    }
}

/// Listing URL with the current filters, without the page number.
pub(crate) fn listing_url(path: &str, filter: &ProductFilter, include_category: bool) -> String {
    let mut params = Vec::new();
    if let Some(q) = &filter.search {
        params.push(format!("q={}", urlencoding::encode(q)));
    }
    if include_category && let Some(category) = &filter.category {
        params.push(format!("category={}", urlencoding::encode(&category.slug)));
    }
    if filter.sort != ProductSort::default() {
        params.push(format!("sort={}", filter.sort.as_param()));
    }
    if params.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", params.join("&"))
    }
}

/// Render one listing page for `filter`.
pub(crate) async fn render_listing(
    state: &AppState,
    page: PageContext,
    filter: ProductFilter,
    heading: String,
    description: Option<String>,
    action: &str,
) -> Result<ProductListTemplate> {
    let catalog = state.catalog();
    let now = Utc::now();
    let per_page = u64::from(state.config().page_size);

    let (results, offers) = tokio::try_join!(
        catalog.search_products(&filter, per_page),
        catalog.active_offers(now),
    )?;

    let pagination = Pagination::new(
        listing_url(action, &filter, action == "/products"),
        results.page,
        results.total_pages(),
        results.total,
    );

    Ok(ProductListTemplate {
        page,
        heading,
        description,
        action: action.to_string(),
        products: Catalog::price_all(results.items, &offers, now),
        pagination,
        search: filter.search.clone().unwrap_or_default(),
        sort: filter.sort.as_param(),
        category: filter.category,
    })
}

/// Display the product listing.
#[instrument(skip(state, page))]
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<ListingQuery>,
    page: PageContext,
) -> Result<ProductListTemplate> {
    let category = match non_blank(query.category.clone()) {
        Some(slug) => state.catalog().category_by_slug(&slug).await?,
        None => None,
    };
    let filter = listing_filter(&query, category);
    let heading = filter.search.as_ref().map_or_else(
        || "All products".to_string(),
        |q| format!("Results for \u{201c}{q}\u{201d}"),
    );

    render_listing(&state, page, filter, heading, None, "/products").await
}

/// Display a product.
#[instrument(skip(state, session, page), fields(product.slug = %slug))]
pub async fn show(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    session: Session,
    page: PageContext,
) -> Result<ProductShowTemplate> {
    let catalog = state.catalog();
    let now = Utc::now();

    let product = catalog
        .product_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {slug}")))?;

    let category = async {
        match product.category_id {
            Some(id) => catalog.categories().await.map(|all| all.into_iter().find(|c| c.id == id)),
            None => Ok(None),
        }
    };
    let wishlisted = async {
        match &page.user {
            Some(user) => state
                .wishlist()
                .for_user(&user.access_token)
                .count(
                    &BackendQuery::new()
                        .eq("user_id", user.id)
                        .eq("product_id", product.id),
                )
                .await
                .map(|n| n > 0),
            None => Ok(false),
        }
    };

    let (reviews, related, offers, category, in_wishlist) = tokio::try_join!(
        catalog.reviews_for(product.id),
        catalog.related_products(&product, RELATED_PRODUCTS),
        catalog.active_offers(now),
        category,
        wishlisted,
    )?;

    let in_compare = session
        .get::<CompareList>(session_keys::COMPARE)
        .await?
        .is_some_and(|c| c.contains(product.id));

    Ok(ProductShowTemplate {
        average_rating: average_rating(&reviews),
        item: PricedProduct::new(product, &offers, now),
        related: Catalog::price_all(related, &offers, now),
        page,
        category,
        reviews,
        in_wishlist,
        in_compare,
    })
}

/// Review form data.
#[derive(Debug, Deserialize)]
pub struct ReviewForm {
    pub rating: i16,
    pub title: Option<String>,
    pub body: String,
}

/// Submit a review for a product.
#[instrument(skip(state, session, user, form), fields(product.slug = %slug, user_id = %user.id))]
pub async fn create_review(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    session: Session,
    RequireAuth(user): RequireAuth,
    Form(form): Form<ReviewForm>,
) -> Result<Redirect> {
    let back = format!("/products/{slug}#reviews");
    let product = state
        .catalog()
        .product_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {slug}")))?;

    let review = NewReview {
        product_id: product.id,
        user_id: user.id,
        rating: form.rating,
        title: non_blank(form.title),
        body: form.body.trim().to_string(),
        author_name: Some(user.display_name().to_string()),
    };

    let reviews = state.catalog().reviews().for_user(&user.access_token);
    match reviews.create(&review).await {
        Ok(_) => {
            add_breadcrumb("review", "Review submitted", Some(&[("product", slug.as_str())]));
            Ok(redirect_with(&session, &back, Flash::success("Thanks for your review!")).await)
        }
        Err(e) => {
            let message = AppError::from(e).user_message();
            Ok(redirect_with(&session, &back, Flash::error(message)).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_filter_defaults() {
        let filter = listing_filter(&ListingQuery::default(), None);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.sort, ProductSort::Newest);
        assert!(filter.search.is_none());
    }

    #[test]
    fn test_listing_filter_caps_huge_page() {
        let query = ListingQuery {
            page: Some(u64::MAX),
            ..ListingQuery::default()
        };
        assert_eq!(listing_filter(&query, None).page, shopfront_backend::MAX_PAGE);
    }

    #[test]
    fn test_listing_filter_clamps_page() {
        let query = ListingQuery {
            q: Some("  ".into()),
            page: Some(0),
            sort: Some("price_desc".into()),
            ..ListingQuery::default()
        };
        let filter = listing_filter(&query, None);
        assert_eq!(filter.page, 1);
        assert!(filter.search.is_none());
        assert_eq!(filter.sort, ProductSort::PriceDesc);
    }

    #[test]
    fn test_listing_url_keeps_filters() {
        let filter = ProductFilter {
            search: Some("green tea".into()),
            sort: ProductSort::Name,
            ..ProductFilter::default()
        };
        assert_eq!(
            listing_url("/products", &filter, true),
            "/products?q=green%20tea&sort=name"
        );
        assert_eq!(
            listing_url("/products", &ProductFilter::default(), true),
            "/products"
        );
    }
}
