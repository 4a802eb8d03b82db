//! Home page route handler.

use askama::Template;
use askama_web::WebTemplate;
use axum::extract::State;
use chrono::Utc;
use shopfront_core::{Collection, Offer};
use tracing::instrument;

use crate::error::Result;
use crate::filters;
use crate::middleware::PageContext;
use crate::services::{Catalog, PricedProduct};
use crate::state::AppState;

const FEATURED_COLLECTIONS: u64 = 4;
const NEW_ARRIVALS: usize = 8;
const FEATURED_PRODUCTS: u64 = 8;

/// Home page template.
#[derive(Template, WebTemplate)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub page: PageContext,
    pub collections: Vec<Collection>,
    pub arrivals: Vec<PricedProduct>,
    pub featured: Vec<PricedProduct>,
    /// Running offers with a banner or code to advertise.
    pub offers: Vec<Offer>,
}

/// Display the home page.
#[instrument(skip(state, page))]
pub async fn home(State(state): State<AppState>, page: PageContext) -> Result<HomeTemplate> {
    let catalog = state.catalog();
    let now = Utc::now();

    let (collections, arrivals, featured, offers) = tokio::try_join!(
        catalog.featured_collections(FEATURED_COLLECTIONS),
        catalog.new_arrivals(now, NEW_ARRIVALS),
        catalog.featured_products(FEATURED_PRODUCTS),
        catalog.active_offers(now),
    )?;

    Ok(HomeTemplate {
        page,
        collections,
        arrivals: Catalog::price_all(arrivals, &offers, now),
        featured: Catalog::price_all(featured, &offers, now),
        offers,
    })
}
