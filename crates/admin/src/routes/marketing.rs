//! Offers and new-arrival highlights.

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Deserialize;
use shopfront_backend::{Order, Query};
use shopfront_core::{NewArrival, NewArrivalId, Offer, OfferId};
use tracing::{info, instrument};

use super::{ApiJson, ApiPath, ApiQuery, Payload};
use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::state::AppState;

// =============================================================================
// Offers
// =============================================================================

/// Query parameters for the offer list.
#[derive(Debug, Default, Deserialize)]
pub struct OfferFilters {
    /// Only offers that are switched on and inside their time window.
    #[serde(default)]
    pub active: bool,
}

/// GET /api/offers
pub async fn list_offers(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiQuery(filters): ApiQuery<OfferFilters>,
) -> Result<Json<Vec<Offer>>> {
    let mut query = Query::new().order("created_at", Order::Desc);
    if filters.active {
        query = query.eq("is_active", true);
    }
    let mut offers = state.offers().list(&query).await?;
    if filters.active {
        let now = Utc::now();
        offers.retain(|offer| offer.is_active_at(now));
    }
    Ok(Json(offers))
}

/// POST /api/offers
#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn create_offer(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(payload): Payload,
) -> Result<(StatusCode, Json<Offer>)> {
    let offer = state.offers().create_json(payload).await?;
    info!(offer_id = %offer.id, "Offer created");
    Ok((StatusCode::CREATED, Json(offer)))
}

/// PATCH /api/offers/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, offer_id = %id))]
pub async fn update_offer(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<OfferId>,
    ApiJson(payload): Payload,
) -> Result<Json<Offer>> {
    let offer = state.offers().update_json(id, payload).await?;
    info!("Offer updated");
    Ok(Json(offer))
}

/// DELETE /api/offers/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, offer_id = %id))]
pub async fn delete_offer(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<OfferId>,
) -> Result<StatusCode> {
    state.offers().delete(id).await?;
    info!("Offer deleted");
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// New arrivals
// =============================================================================

/// GET /api/new-arrivals
pub async fn list_new_arrivals(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<NewArrival>>> {
    let arrivals = state
        .new_arrivals()
        .list(
            &Query::new()
                .order("position", Order::Asc)
                .order("created_at", Order::Desc),
        )
        .await?;
    Ok(Json(arrivals))
}

/// POST /api/new-arrivals
#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn create_new_arrival(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiJson(payload): Payload,
) -> Result<(StatusCode, Json<NewArrival>)> {
    let arrival = state.new_arrivals().create_json(payload).await?;
    info!(product_id = %arrival.product_id, "New arrival added");
    Ok((StatusCode::CREATED, Json(arrival)))
}

/// DELETE /api/new-arrivals/{id}
#[instrument(skip_all, fields(admin_id = %admin.id, new_arrival_id = %id))]
pub async fn delete_new_arrival(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<NewArrivalId>,
) -> Result<StatusCode> {
    state.new_arrivals().delete(id).await?;
    info!("New arrival removed");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_filters_default_to_all() {
        let filters: OfferFilters = serde_json::from_str("{}").unwrap();
        assert!(!filters.active);
    }
}
