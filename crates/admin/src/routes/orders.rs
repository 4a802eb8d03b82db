//! Order browsing and fulfilment status changes.

use axum::{Json, extract::State};
use serde::Deserialize;
use shopfront_backend::{Order as SortOrder, Page, Query};
use shopfront_core::{Order, OrderId, OrderPatch, OrderStatus, ValidationErrors};
use tracing::{info, instrument};

use super::{ApiJson, ApiPath, ApiQuery, page_number, parse_filter};
use crate::error::{AppError, Result};
use crate::middleware::RequireAdmin;
use crate::state::AppState;

/// Query parameters for the order list.
#[derive(Debug, Default, Deserialize)]
pub struct OrderFilters {
    pub status: Option<String>,
    pub page: Option<u64>,
}

impl OrderFilters {
    /// Backend query for these filters, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for an unknown status.
    pub fn query(&self) -> Result<Query> {
        let mut query = Query::new().order("created_at", SortOrder::Desc);
        if let Some(status) = parse_filter::<OrderStatus>(self.status.as_deref())? {
            query = query.eq("status", status);
        }
        Ok(query)
    }
}

/// Body of `PATCH /api/orders/{id}/status`.
#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

/// Patch moving `order` to `next`, if the lifecycle allows it.
fn transition(
    order: &Order,
    next: OrderStatus,
) -> std::result::Result<OrderPatch, ValidationErrors> {
    if !order.can_transition_to(next) {
        return Err(ValidationErrors::single(
            "status",
            format!("cannot change from {} to {next}", order.status),
        ));
    }
    Ok(OrderPatch {
        status: Some(next),
        ..OrderPatch::default()
    })
}

/// GET /api/orders
#[instrument(skip(state, _admin))]
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiQuery(filters): ApiQuery<OrderFilters>,
) -> Result<Json<Page<Order>>> {
    let page = state
        .orders()
        .page(
            &filters.query()?,
            page_number(filters.page),
            state.config().page_size,
        )
        .await?;
    Ok(Json(page))
}

/// GET /api/orders/{id}
pub async fn show(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    ApiPath(id): ApiPath<OrderId>,
) -> Result<Json<Order>> {
    let order = state
        .orders()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".into()))?;
    Ok(Json(order))
}

/// PATCH /api/orders/{id}/status
#[instrument(skip_all, fields(admin_id = %admin.id, order_id = %id))]
pub async fn update_status(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiPath(id): ApiPath<OrderId>,
    ApiJson(change): ApiJson<StatusChange>,
) -> Result<Json<Order>> {
    let order = state
        .orders()
        .find(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Order".into()))?;

    let patch = transition(&order, change.status)?;
    let updated = state.orders().update(id, &patch).await?;
    info!(from = %order.status, to = %updated.status, "Order status changed");
    Ok(Json(updated))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode;
    use chrono::Utc;
    use shopfront_core::{PaymentStatus, Price, UserId};

    use super::*;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: OrderId::generate(),
            user_id: UserId::generate(),
            status,
            payment_status: PaymentStatus::Unpaid,
            subtotal: Price::parse("20.00").unwrap(),
            shipping: Price::parse("5.00").unwrap(),
            discount: Price::ZERO,
            total: Price::parse("25.00").unwrap(),
            shipping_address: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            items: Vec::new(),
        }
    }

    #[test]
    fn test_allowed_transition_builds_patch() {
        let patch = transition(&order(OrderStatus::Pending), OrderStatus::Processing).unwrap();
        assert_eq!(patch.status, Some(OrderStatus::Processing));
        assert_eq!(patch.notes, None);
    }

    #[test]
    fn test_rejected_transition_names_both_states() {
        let errors = transition(&order(OrderStatus::Delivered), OrderStatus::Pending).unwrap_err();
        assert_eq!(
            errors.message_for("status"),
            Some("cannot change from delivered to pending")
        );
        assert_eq!(
            AppError::from(errors).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_order_filters() {
        let filters = OrderFilters {
            status: Some("shipped".into()),
            page: None,
        };
        let pairs = filters.query().unwrap().to_pairs();
        assert!(pairs.contains(&("status".to_string(), "eq.shipped".to_string())));

        let bad = OrderFilters {
            status: Some("lost".into()),
            page: None,
        };
        assert!(bad.query().is_err());
    }
}
