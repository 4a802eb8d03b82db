//! Collection management, including ordered product membership.

use std::collections::HashSet;

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use shopfront_backend::{Order, Query};
use shopfront_core::{
    Collection, CollectionId, CollectionProduct, Entity, ProductId, ValidationErrors,
};
use tracing::{info, instrument};

use super::{ApiJson, ApiPath, Payload};
use crate::error::{AppError, Result};
use crate::middleware::RequireAdmin;
use crate::state::AppState;

/// A collection with its products in display order.
#[derive(Debug, Serialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub product_ids: Vec<ProductId>,
}

/// Body of `PUT /api/collections/{id}/products`.
#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    pub product_ids: Vec<ProductId>,
}

impl MembershipRequest {
    /// Reject a list that names the same product twice.
    fn check(&self) -> std::result::Result<(), ValidationErrors> {
        let mut seen = HashSet::with_capacity(self.product_ids.len());
        if self.product_ids.iter().all(|id| seen.insert(*id)) {
            Ok(())
        } else {
            Err(ValidationErrors::single(
                "product_ids",
                "must not list a product twice",
            ))
        }
    }
}

async fn find_collection(state: &AppState, id: CollectionId) -> Result<Collection> {
    state
        .collections()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Collection".into()))
}

async fn member_ids(state: &AppState, id: CollectionId) -> Result<Vec<ProductId>> {
    let links: Vec<CollectionProduct> = state
        .service()
        .select(
            CollectionProduct::TABLE,
            &Query::new()
                .eq("collection_id", id)
                .order("position", Order::Asc),
        )
        .await?;
    Ok(links.into_iter().map(|link| link.product_id).collect())
}

/// GET /api/collections
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<Collection>>> {
    let collections = state
        .collections()
        .list(
            &Query::new()
                .order("sort_order", Order::Asc)
                .order("name", Order::Asc),
        )
        .await?;
    Ok(Json(collections))
}

/// GET /api/collections/{id}
pub async fn show(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiPath(id): ApiPath<CollectionId>,
) -> Result<Json<CollectionDetail>> {
    let (collection, product_ids) =
        tokio::try_join!(find_collection(&state, id), member_ids(&state, id))?;
    Ok(Json(CollectionDetail {
        collection,
        product_ids,
    }))
}

/// POST /api/collections
#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(payload): Payload,
) -> Result<(StatusCode, Json<Collection>)> {
    let collection = state.collections().create_json(payload).await?;
    info!(collection_id = %collection.id, "Collection created");
    Ok((StatusCode::CREATED, Json(collection)))
}

/// PATCH /api/collections/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, collection_id = %id))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<CollectionId>,
    ApiJson(payload): Payload,
) -> Result<Json<Collection>> {
    let collection = state.collections().update_json(id, payload).await?;
    info!("Collection updated");
    Ok(Json(collection))
}

/// DELETE /api/collections/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, collection_id = %id))]
pub async fn destroy(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<CollectionId>,
) -> Result<StatusCode> {
    state.collections().delete(id).await?;
    state.cache().invalidate_table(CollectionProduct::TABLE);
    info!("Collection deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the collection's products with `product_ids`, in that order.
///
/// PUT /api/collections/{id}/products
#[instrument(skip_all, fields(admin_id = %admin.id, collection_id = %id))]
pub async fn replace_products(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<CollectionId>,
    ApiJson(request): ApiJson<MembershipRequest>,
) -> Result<Json<CollectionDetail>> {
    request.check()?;
    let collection = find_collection(&state, id).await?;

    let removed = state
        .service()
        .delete(
            CollectionProduct::TABLE,
            &Query::new().eq("collection_id", id),
        )
        .await?;

    let links = CollectionProduct::ordered(id, &request.product_ids);
    if !links.is_empty() {
        let _: Vec<CollectionProduct> = state
            .service()
            .insert_many(CollectionProduct::TABLE, &links)
            .await?;
    }

    state.cache().invalidate_table(CollectionProduct::TABLE);
    state.cache().invalidate_table(Collection::TABLE);
    info!(removed, added = links.len(), "Collection membership replaced");

    Ok(Json(CollectionDetail {
        collection,
        product_ids: request.product_ids,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_rejects_duplicates() {
        let mug = ProductId::generate();
        let tea = ProductId::generate();

        let ok = MembershipRequest {
            product_ids: vec![mug, tea],
        };
        assert!(ok.check().is_ok());

        let empty = MembershipRequest {
            product_ids: Vec::new(),
        };
        assert!(empty.check().is_ok());

        let twice = MembershipRequest {
            product_ids: vec![mug, tea, mug],
        };
        assert_eq!(
            twice.check().unwrap_err().message_for("product_ids"),
            Some("must not list a product twice")
        );
    }

    #[test]
    fn test_membership_request_parses_ids() {
        let id = ProductId::generate();
        let request: MembershipRequest =
            serde_json::from_value(serde_json::json!({ "product_ids": [id.to_string()] }))
                .unwrap();
        assert_eq!(request.product_ids, vec![id]);
    }
}
