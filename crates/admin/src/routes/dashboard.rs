//! Dashboard overview.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use shopfront_backend::{Order as SortOrder, Query};
use shopfront_core::{Entity, Order, OrderStatus, Price, Product, Profile};
use tracing::instrument;

use crate::error::Result;
use crate::middleware::RequireAdmin;
use crate::state::AppState;

/// Low-stock rows shown on the dashboard.
const LOW_STOCK_LIMIT: u64 = 10;

/// Most recent orders shown on the dashboard.
const RECENT_ORDERS_LIMIT: u64 = 5;

/// Order rows fetched per request when summing revenue.
const REVENUE_BATCH: u64 = 1000;

/// Row counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub products: u64,
    pub orders: u64,
    pub pending_orders: u64,
    pub users: u64,
}

/// Dashboard payload.
#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub counts: Counts,
    /// Sum of order totals, excluding cancelled and refunded orders.
    pub revenue: Price,
    pub low_stock: Vec<Product>,
    pub recent_orders: Vec<Order>,
}

/// The two order columns revenue needs.
#[derive(Debug, Deserialize)]
struct RevenueRow {
    status: OrderStatus,
    total: Price,
}

fn revenue(rows: &[RevenueRow]) -> Price {
    rows.iter()
        .filter(|row| row.status.counts_as_revenue())
        .map(|row| row.total)
        .sum()
}

/// GET /api/dashboard
#[instrument(skip_all)]
pub async fn index(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Dashboard>> {
    let service = state.service();
    let all = Query::new();
    let pending = Query::new().eq("status", OrderStatus::Pending);
    let revenue_query = Query::new()
        .select("status,total")
        .order("id", SortOrder::Asc);
    let low_stock_query = Query::new()
        .lte("stock", Product::LOW_STOCK_THRESHOLD)
        .order("stock", SortOrder::Asc)
        .limit(LOW_STOCK_LIMIT);
    let recent_query = Query::new()
        .order("created_at", SortOrder::Desc)
        .limit(RECENT_ORDERS_LIMIT);

    let (products, orders, pending_orders, users, revenue_rows, low_stock, recent_orders) =
        tokio::try_join!(
            state.products().count(&all),
            state.orders().count(&all),
            state.orders().count(&pending),
            service.count(Profile::TABLE, &all),
            service.select_all::<RevenueRow>(Order::TABLE, &revenue_query, REVENUE_BATCH),
            state.products().list(&low_stock_query),
            state.orders().list(&recent_query),
        )?;

    Ok(Json(Dashboard {
        counts: Counts {
            products,
            orders,
            pending_orders,
            users,
        },
        revenue: revenue(&revenue_rows),
        low_stock,
        recent_orders,
    }))
}
