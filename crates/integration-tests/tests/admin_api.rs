//! Live tests for the admin JSON API.
//!
//! These tests require:
//! - The admin server running (cargo run -p shopfront-admin)
//! - `ADMIN_TEST_EMAIL` / `ADMIN_TEST_PASSWORD` for an account promoted with
//!   `shopfront admin promote`
//!
//! Run with: cargo test -p shopfront-integration-tests -- --ignored

#![allow(clippy::unwrap_used)]

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use shopfront_integration_tests::{admin_base_url, cookie_client};

/// Signed-in client; the session cookie is kept in its store.
async fn signed_in_client() -> Client {
    let client = cookie_client();
    let email = std::env::var("ADMIN_TEST_EMAIL").unwrap();
    let password = std::env::var("ADMIN_TEST_PASSWORD").unwrap();

    let resp = client
        .post(format!("{}/auth/login", admin_base_url()))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    client
}

#[tokio::test]
#[ignore = "Requires running admin server"]
async fn test_api_requires_session() {
    let resp = cookie_client()
        .get(format!("{}/api/products", admin_base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
}

#[tokio::test]
#[ignore = "Requires running admin server"]
async fn test_bad_credentials_are_rejected() {
    let resp = cookie_client()
        .post(format!("{}/auth/login", admin_base_url()))
        .json(&json!({ "email": "nobody@example.com", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "Requires running admin server and admin credentials"]
async fn test_dashboard_after_sign_in() {
    let client = signed_in_client().await;
    let base_url = admin_base_url();

    let me: Value = client
        .get(format!("{base_url}/api/me"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(me.get("email").is_some());

    let dashboard: Value = client
        .get(format!("{base_url}/api/dashboard"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(dashboard.pointer("/counts/products").is_some());
    assert!(dashboard.get("revenue").is_some());
}

#[tokio::test]
#[ignore = "Requires running admin server and admin credentials"]
async fn test_product_lifecycle() {
    let client = signed_in_client().await;
    let base_url = admin_base_url();
    let slug = format!("it-{}", uuid::Uuid::new_v4().simple());

    let resp = client
        .post(format!("{base_url}/api/products"))
        .json(&json!({ "name": "Integration Mug", "slug": slug, "price": "9.99", "stock": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let product: Value = resp.json().await.unwrap();
    let id = product.get("id").and_then(Value::as_str).unwrap().to_string();

    let resp = client
        .patch(format!("{base_url}/api/products/{id}"))
        .json(&json!({ "isFeatured": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated.get("is_featured"), Some(&Value::Bool(true)));

    let resp = client
        .delete(format!("{base_url}/api/products/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
#[ignore = "Requires running admin server and admin credentials"]
async fn test_invalid_product_is_unprocessable() {
    let client = signed_in_client().await;

    let resp = client
        .post(format!("{}/api/products", admin_base_url()))
        .json(&json!({ "name": "", "slug": "Bad Slug", "price": "-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
