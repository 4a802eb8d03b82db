//! `CrudService` and `BackendClient` against the in-process fake backend.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::json;
use shopfront_backend::{
    BackendClient, BackendError, CrudService, ErrorKind, MAX_PAGE, Order as SortOrder, Query,
    QueryCache,
};
use shopfront_core::{Category, CategoryPatch, NewCategory, Product, ProductStatus};
use shopfront_integration_tests::{FakeBackend, SERVICE_KEY};

fn category(slug: &str) -> NewCategory {
    NewCategory {
        name: slug.to_uppercase(),
        slug: slug.to_string(),
        ..NewCategory::default()
    }
}

fn cached(fake: &FakeBackend) -> (CrudService<Category>, QueryCache) {
    let config = fake.config();
    let cache = QueryCache::new(config.cache_ttl, config.cache_capacity);
    let client = BackendClient::new(config).unwrap();
    (CrudService::new(client, cache.clone()), cache)
}

#[tokio::test]
async fn test_create_then_read_back() {
    let fake = FakeBackend::start().await;
    let client = BackendClient::new(fake.config()).unwrap();
    let categories = CrudService::<Category>::uncached(client);

    let created = categories.create(&category("mugs")).await.unwrap();
    assert_eq!(created.slug, "mugs");
    assert_eq!(fake.rows("categories").len(), 1);

    let found = categories.find(created.id).await.unwrap().unwrap();
    assert_eq!(found, created);

    let by_slug = categories.get_by("slug", "mugs").await.unwrap();
    assert_eq!(by_slug.map(|c| c.id), Some(created.id));
    assert!(categories.get_by("slug", "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cached_reads_hit_backend_once_until_a_write() {
    let fake = FakeBackend::start().await;
    let (categories, _cache) = cached(&fake);
    let all = Query::new();

    categories.create(&category("mugs")).await.unwrap();
    assert_eq!(categories.list(&all).await.unwrap().len(), 1);
    assert_eq!(categories.list(&all).await.unwrap().len(), 1);
    assert_eq!(fake.hits(&Method::GET, "categories"), 1);

    categories.create(&category("plates")).await.unwrap();
    assert_eq!(categories.list(&all).await.unwrap().len(), 2);
    assert_eq!(fake.hits(&Method::GET, "categories"), 2);
}

#[tokio::test]
async fn test_invalid_input_never_reaches_backend() {
    let fake = FakeBackend::start().await;
    let client = BackendClient::new(fake.config()).unwrap();
    let categories = CrudService::<Category>::uncached(client);

    let err = categories.create(&category("Not A Slug")).await.unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)));
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_update_and_delete_by_id() {
    let fake = FakeBackend::start().await;
    let client = BackendClient::new(fake.config()).unwrap();
    let categories = CrudService::<Category>::uncached(client);

    let created = categories.create(&category("mugs")).await.unwrap();
    let patch = CategoryPatch {
        name: Some("Coffee Mugs".into()),
        ..CategoryPatch::default()
    };
    let updated = categories.update(created.id, &patch).await.unwrap();
    assert_eq!(updated.name, "Coffee Mugs");
    assert_eq!(updated.slug, "mugs");

    categories.delete(created.id).await.unwrap();
    assert!(fake.rows("categories").is_empty());

    let err = categories.delete(created.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_count_and_page() {
    let fake = FakeBackend::start().await;
    fake.seed(
        "products",
        (0..7)
            .map(|i| {
                json!({
                    "name": format!("Item {i}"),
                    "slug": format!("item-{i}"),
                    "price": "5.00",
                    "stock": i,
                    "status": if i % 2 == 0 { "active" } else { "draft" },
                })
            })
            .collect(),
    );
    let client = BackendClient::new(fake.config()).unwrap();
    let products = CrudService::<Product>::uncached(client);

    assert_eq!(products.count(&Query::new()).await.unwrap(), 7);
    assert_eq!(
        products
            .count(&Query::new().eq("status", ProductStatus::Active))
            .await
            .unwrap(),
        4
    );

    let page = products.page(&Query::new(), 2, 3).await.unwrap();
    assert_eq!(page.total, 7);
    assert_eq!(page.items.len(), 3);
    assert_eq!(page.items.first().map(|p| p.slug.as_str()), Some("item-3"));

    let far = products.page(&Query::new(), u64::MAX, 3).await.unwrap();
    assert_eq!(far.page, MAX_PAGE);
    assert_eq!(far.total, 7);
    assert!(far.items.is_empty());
}

#[tokio::test]
async fn test_select_all_reads_past_the_row_cap() {
    let fake = FakeBackend::start().await;
    fake.seed(
        "products",
        (0..25)
            .map(|i| {
                json!({
                    "name": format!("Item {i}"),
                    "slug": format!("item-{i}"),
                    "price": "5.00",
                    "stock": i,
                    "status": "active",
                })
            })
            .collect(),
    );
    fake.set_max_rows(10);
    let client = BackendClient::new(fake.config()).unwrap();
    let query = Query::new().order("id", SortOrder::Asc);

    let capped: Vec<Product> = client.select("products", &query).await.unwrap();
    assert_eq!(capped.len(), 10);

    let all: Vec<Product> = client.select_all("products", &query, 1000).await.unwrap();
    assert_eq!(all.len(), 25);
    assert_eq!(all.iter().map(|p| p.stock).sum::<i32>(), 300);
    // One capped read, then pages at offsets 0, 10, 20 and an empty one at 25.
    assert_eq!(fake.hits(&Method::GET, "products"), 5);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let fake = FakeBackend::start().await;
    fake.fail_next(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "message": "upstream connection reset" }),
    );
    let client = BackendClient::new(fake.config()).unwrap();
    let categories = CrudService::<Category>::uncached(client);

    assert!(categories.list(&Query::new()).await.unwrap().is_empty());
    assert_eq!(fake.hits(&Method::GET, "categories"), 2);
}

#[tokio::test]
async fn test_timed_out_insert_is_not_sent_twice() {
    let fake = FakeBackend::start().await;
    fake.set_latency(Duration::from_millis(300));
    let mut config = fake.config();
    config.timeout = Duration::from_millis(100);
    let client = BackendClient::new(config).unwrap();

    let err = client
        .insert::<Category, _>("categories", &category("mugs"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(fake.hits(&Method::POST, "categories"), 1);
    assert_eq!(fake.rows("categories").len(), 1);
}

#[tokio::test]
async fn test_timed_out_read_is_retried() {
    let fake = FakeBackend::start().await;
    fake.set_latency(Duration::from_millis(300));
    let mut config = fake.config();
    config.timeout = Duration::from_millis(100);
    let client = BackendClient::new(config).unwrap();

    let err = client
        .select::<Category>("categories", &Query::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(fake.hits(&Method::GET, "categories"), 3);
}

#[tokio::test]
async fn test_policy_failure_is_not_retried() {
    let fake = FakeBackend::start().await;
    fake.fail_next(
        StatusCode::FORBIDDEN,
        json!({
            "code": "42501",
            "message": "new row violates row-level security policy for table \"categories\""
        }),
    );
    let client = BackendClient::new(fake.config()).unwrap();
    let categories = CrudService::<Category>::uncached(client);

    let err = categories.create(&category("mugs")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    assert_eq!(
        err.kind().user_message(),
        "You do not have permission to perform this action."
    );
    assert_eq!(fake.hits(&Method::POST, "categories"), 1);
}

#[tokio::test]
async fn test_concurrent_identical_reads_share_one_request() {
    let fake = FakeBackend::start().await;
    fake.set_latency(Duration::from_millis(100));
    let client = BackendClient::new(fake.config()).unwrap();
    let query = Query::new().eq("slug", "mugs");

    let reads = (0..5).map(|_| {
        let client = client.clone();
        let query = query.clone();
        tokio::spawn(async move { client.select::<Category>("categories", &query).await })
    });
    for read in join_all(reads).await {
        assert!(read.unwrap().unwrap().is_empty());
    }
    assert_eq!(fake.hits(&Method::GET, "categories"), 1);
}

async fn join_all<T>(
    handles: impl Iterator<Item = tokio::task::JoinHandle<T>>,
) -> Vec<Result<T, tokio::task::JoinError>> {
    let handles: Vec<_> = handles.collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await);
    }
    results
}

#[tokio::test]
async fn test_credentials_are_sent_per_handle() {
    let fake = FakeBackend::start().await;
    let client = BackendClient::new(fake.config()).unwrap();

    client.select::<Category>("categories", &Query::new()).await.unwrap();
    client
        .service()
        .unwrap()
        .select::<Category>("categories", &Query::new().limit(1))
        .await
        .unwrap();

    let bearers: Vec<_> = fake.requests().into_iter().map(|r| r.bearer).collect();
    assert_eq!(bearers.len(), 2);
    assert_ne!(bearers.first(), bearers.last());
    assert_eq!(bearers.last().cloned().flatten().as_deref(), Some(SERVICE_KEY));
}

#[tokio::test]
async fn test_unfiltered_delete_is_refused() {
    let fake = FakeBackend::start().await;
    let client = BackendClient::new(fake.config()).unwrap();

    let err = client.delete("categories", &Query::new()).await.unwrap_err();
    assert!(matches!(err, BackendError::Validation(_)));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_ping_reaches_table_root() {
    let fake = FakeBackend::start().await;
    let client = BackendClient::new(fake.config()).unwrap();
    client.ping().await.unwrap();
}
