//! Collection route handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::extract::{Path, State};
use chrono::Utc;
use shopfront_core::Collection;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::filters;
use crate::middleware::PageContext;
use crate::services::{Catalog, PricedProduct};
use crate::state::AppState;

/// Collection index template.
#[derive(Template, WebTemplate)]
#[template(path = "collections/index.html")]
pub struct CollectionsIndexTemplate {
    pub page: PageContext,
    pub collections: Vec<Collection>,
}

/// Collection detail template.
#[derive(Template, WebTemplate)]
#[template(path = "collections/show.html")]
pub struct CollectionShowTemplate {
    pub page: PageContext,
    pub collection: Collection,
    pub products: Vec<PricedProduct>,
}

/// Display all collections.
#[instrument(skip(state, page))]
pub async fn index(
    State(state): State<AppState>,
    page: PageContext,
) -> Result<CollectionsIndexTemplate> {
    let collections = state.catalog().collections().await?;
    Ok(CollectionsIndexTemplate { page, collections })
}

/// Display a collection's products in curated order.
#[instrument(skip(state, page))]
pub async fn show(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    page: PageContext,
) -> Result<CollectionShowTemplate> {
    let catalog = state.catalog();
    let now = Utc::now();

    let collection = catalog
        .collection_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("collection {slug}")))?;

    let (products, offers) = tokio::try_join!(
        catalog.collection_products(&collection),
        catalog.active_offers(now),
    )?;

    Ok(CollectionShowTemplate {
        page,
        products: Catalog::price_all(products, &offers, now),
        collection,
    })
}
