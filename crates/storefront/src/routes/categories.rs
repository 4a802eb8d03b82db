//! Category listing route handler.

use axum::extract::{Path, Query, State};
use tracing::instrument;

use super::ListingQuery;
use super::products::{ProductListTemplate, listing_filter, render_listing};
use crate::error::{AppError, Result};
use crate::middleware::PageContext;
use crate::state::AppState;

/// Display the products of one category.
#[instrument(skip(state, page))]
pub async fn show(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<ListingQuery>,
    page: PageContext,
) -> Result<ProductListTemplate> {
    let category = state
        .catalog()
        .category_by_slug(&slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("category {slug}")))?;

    let heading = category.name.clone();
    let description = category.description.clone();
    let filter = listing_filter(&query, Some(category));
    let action = format!("/categories/{slug}");

    render_listing(&state, page, filter, heading, description, &action).await
}
