//! Order placement against the in-process fake backend.

#![allow(clippy::unwrap_used)]

use axum::http::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use shopfront_backend::{BackendClient, CrudService, ErrorKind, QueryCache};
use shopfront_core::{AddressSnapshot, Order, ProductId, UserId};
use shopfront_integration_tests::FakeBackend;
use shopfront_storefront::config::ShippingConfig;
use shopfront_storefront::error::AppError;
use shopfront_storefront::models::Cart;
use shopfront_storefront::services::checkout::place_order;
use shopfront_storefront::services::{Catalog, CheckoutError};

struct Shop {
    catalog: Catalog,
    orders: CrudService<Order>,
}

fn shop(fake: &FakeBackend) -> Shop {
    let config = fake.config();
    let cache = QueryCache::new(config.cache_ttl, config.cache_capacity);
    let client = BackendClient::new(config).unwrap();
    Shop {
        catalog: Catalog::new(client.clone(), cache.clone()),
        orders: CrudService::new(client, cache),
    }
}

fn seed_tea(fake: &FakeBackend, stock: i32) -> ProductId {
    let id = ProductId::generate();
    fake.seed(
        "products",
        vec![json!({
            "id": id.to_string(),
            "name": "Oolong",
            "slug": "oolong",
            "price": "12.50",
            "stock": stock,
            "status": "active",
        })],
    );
    id
}

fn address() -> AddressSnapshot {
    AddressSnapshot {
        full_name: "Ada Lovelace".into(),
        line1: "12 Analytical Way".into(),
        city: "London".into(),
        postal_code: "N1 9GU".into(),
        country: "GB".into(),
        ..AddressSnapshot::default()
    }
}

fn cart_of(product_id: ProductId, quantity: u32) -> Cart {
    let mut cart = Cart::default();
    cart.add(product_id, quantity);
    cart
}

#[tokio::test]
async fn test_order_is_written_with_items_and_totals() {
    let fake = FakeBackend::start().await;
    let tea = seed_tea(&fake, 10);
    let shop = shop(&fake);

    let order = place_order(
        &shop.catalog,
        &shop.orders,
        UserId::generate(),
        &cart_of(tea, 2),
        address(),
        &ShippingConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(order.subtotal.amount(), Decimal::new(2500, 2));
    assert_eq!(order.shipping.amount(), Decimal::new(500, 2));
    assert_eq!(order.total.amount(), Decimal::new(3000, 2));
    assert_eq!(order.items.len(), 1);
    let item = order.items.first().unwrap();
    assert_eq!(item.product_id, tea);
    assert_eq!(item.quantity, 2);
    assert_eq!(item.order_id, order.id);

    assert_eq!(fake.rows("orders").len(), 1);
    let stored: Vec<Value> = fake.rows("order_items");
    assert_eq!(stored.len(), 1);
    assert_eq!(
        stored.first().and_then(|r| r.get("order_id")),
        Some(&json!(order.id.to_string()))
    );
}

#[tokio::test]
async fn test_failed_items_remove_the_order() {
    let fake = FakeBackend::start().await;
    let tea = seed_tea(&fake, 10);
    let shop = shop(&fake);
    fake.fail_next_on(
        Method::POST,
        "order_items",
        StatusCode::FORBIDDEN,
        json!({
            "code": "42501",
            "message": "new row violates row-level security policy for table \"order_items\""
        }),
    );

    let err = place_order(
        &shop.catalog,
        &shop.orders,
        UserId::generate(),
        &cart_of(tea, 1),
        address(),
        &ShippingConfig::default(),
    )
    .await
    .unwrap_err();

    let CheckoutError::Backend(backend) = &err else {
        panic!("expected a backend error, got {err:?}");
    };
    assert_eq!(backend.kind(), ErrorKind::PermissionDenied);
    assert_eq!(AppError::from(err).kind(), ErrorKind::PermissionDenied);

    assert_eq!(fake.hits(&Method::POST, "orders"), 1);
    assert_eq!(fake.hits(&Method::POST, "order_items"), 1);
    assert_eq!(fake.hits(&Method::DELETE, "orders"), 1);
    assert!(fake.rows("orders").is_empty());
    assert!(fake.rows("order_items").is_empty());
}

#[tokio::test]
async fn test_short_stock_writes_nothing() {
    let fake = FakeBackend::start().await;
    let tea = seed_tea(&fake, 3);
    let shop = shop(&fake);

    let err = place_order(
        &shop.catalog,
        &shop.orders,
        UserId::generate(),
        &cart_of(tea, 5),
        address(),
        &ShippingConfig::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CheckoutError::InsufficientStock { available: 3, .. }));
    assert_eq!(fake.hits(&Method::POST, "orders"), 0);
    assert!(fake.rows("orders").is_empty());
}
