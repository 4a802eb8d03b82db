//! Live tests for the storefront.
//!
//! These tests require:
//! - The storefront running (cargo run -p shopfront-storefront)
//! - A reachable hosted backend with at least one active product
//!
//! Run with: cargo test -p shopfront-integration-tests -- --ignored

#![allow(clippy::unwrap_used)]

use reqwest::StatusCode;
use shopfront_integration_tests::{cookie_client, storefront_base_url};

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_health() {
    let resp = cookie_client()
        .get(format!("{}/health", storefront_base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "Requires running storefront and backend"]
async fn test_readiness_checks_backend() {
    let resp = cookie_client()
        .get(format!("{}/health/ready", storefront_base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore = "Requires running storefront and backend"]
async fn test_home_page_sets_security_headers() {
    let resp = cookie_client()
        .get(storefront_base_url())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let headers = resp.headers();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
#[ignore = "Requires running storefront and backend"]
async fn test_product_listing_and_missing_product() {
    let client = cookie_client();
    let base_url = storefront_base_url();

    let resp = client
        .get(format!("{base_url}/products?sort=price_asc"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .get(format!("{base_url}/products/no-such-product-slug"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_account_requires_sign_in() {
    let resp = cookie_client()
        .get(format!("{}/account/orders", storefront_base_url()))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_redirection());
    let location = resp.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(location, "/auth/login?next=%2Faccount%2Forders");
}

#[tokio::test]
#[ignore = "Requires running storefront"]
async fn test_empty_cart_renders() {
    let resp = cookie_client()
        .get(format!("{}/cart", storefront_base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
