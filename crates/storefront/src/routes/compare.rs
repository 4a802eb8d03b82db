//! Product comparison route handlers.

use askama::Template;
use askama_web::WebTemplate;
use axum::{Form, extract::State, response::Redirect};
use chrono::Utc;
use serde::Deserialize;
use shopfront_core::{Category, CategoryId, ProductId};
use tower_sessions::Session;
use tracing::instrument;

use super::{redirect_with, safe_next};
use crate::error::Result;
use crate::filters;
use crate::middleware::PageContext;
use crate::models::{CompareList, Flash, session_keys};
use crate::services::{Catalog, PricedProduct};
use crate::state::AppState;

async fn load_compare(session: &Session) -> Result<CompareList> {
    Ok(session
        .get::<CompareList>(session_keys::COMPARE)
        .await?
        .unwrap_or_default())
}

/// Compare page template.
#[derive(Template, WebTemplate)]
#[template(path = "compare/show.html")]
pub struct CompareTemplate {
    pub page: PageContext,
    /// Columns in the order the products were picked.
    pub columns: Vec<CompareColumn>,
}

/// One product column of the comparison table.
#[derive(Debug, Clone)]
pub struct CompareColumn {
    pub item: PricedProduct,
    pub category: String,
}

fn category_name(categories: &[Category], id: Option<CategoryId>) -> String {
    id.and_then(|id| categories.iter().find(|c| c.id == id))
        .map_or_else(|| "\u{2014}".to_string(), |c| c.name.clone())
}

/// Display the compare table.
#[instrument(skip(state, session, page))]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
    page: PageContext,
) -> Result<CompareTemplate> {
    let list = load_compare(&session).await?;
    let now = Utc::now();

    let (mut found, offers) = tokio::try_join!(
        state.catalog().products_by_id(list.product_ids.clone()),
        state.catalog().active_offers(now),
    )?;

    let products = list
        .product_ids
        .iter()
        .filter_map(|id| found.remove(id))
        .collect();

    let columns = Catalog::price_all(products, &offers, now)
        .into_iter()
        .map(|item| CompareColumn {
            category: category_name(&page.categories, item.product.category_id),
            item,
        })
        .collect();

    Ok(CompareTemplate { page, columns })
}

/// Toggle form data.
#[derive(Debug, Deserialize)]
pub struct ToggleForm {
    pub product_id: ProductId,
    pub next: Option<String>,
}

/// Add the product to the compare list, or remove it when already there.
#[instrument(skip(session))]
pub async fn toggle(session: Session, Form(form): Form<ToggleForm>) -> Result<Redirect> {
    let back = safe_next(form.next.as_deref(), "/compare");
    let mut list = load_compare(&session).await?;

    let flash = match list.toggle(form.product_id) {
        Ok(true) => Flash::success("Added to compare."),
        Ok(false) => Flash::info("Removed from compare."),
        Err(full) => {
            return Ok(redirect_with(&session, &back, Flash::error(full.to_string())).await);
        }
    };
    session.insert(session_keys::COMPARE, &list).await?;

    Ok(redirect_with(&session, &back, flash).await)
}

/// Empty the compare list.
#[instrument(skip(session))]
pub async fn clear(session: Session) -> Result<Redirect> {
    session.remove::<CompareList>(session_keys::COMPARE).await?;
    Ok(Redirect::to("/compare"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_name() {
        let tea = Category {
            id: CategoryId::generate(),
            name: "Tea".into(),
            slug: "tea".into(),
            description: None,
            image_url: None,
            parent_id: None,
            sort_order: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = tea.id;
        let categories = vec![tea];

        assert_eq!(category_name(&categories, Some(id)), "Tea");
        assert_eq!(category_name(&categories, None), "\u{2014}");
        assert_eq!(
            category_name(&categories, Some(CategoryId::generate())),
            "\u{2014}"
        );
    }
}
