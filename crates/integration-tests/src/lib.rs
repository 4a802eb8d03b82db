//! Integration tests for Shopfront.
//!
//! # Running Tests
//!
//! ```bash
//! # Backend client tests against the in-process fake (no network)
//! cargo test -p shopfront-integration-tests
//!
//! # Live tests against running servers
//! STOREFRONT_BASE_URL=http://localhost:3000 ADMIN_BASE_URL=https://localhost:3001 \
//!     cargo test -p shopfront-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `backend_crud` - `CrudService` and `BackendClient` against [`FakeBackend`]
//! - `checkout` - Order placement and its cleanup against [`FakeBackend`]
//! - `storefront` - Storefront pages over HTTP (ignored by default)
//! - `admin_api` - Admin JSON API over HTTP (ignored by default)

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::{Map, Value, json};
use shopfront_backend::{BackendConfig, RetryPolicy};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Anon key the fake accepts.
pub const ANON_KEY: &str = "anon-key-for-tests-0123456789abcdef";

/// Service-role key the fake accepts.
pub const SERVICE_KEY: &str = "service-key-for-tests-0123456789abcdef";

/// Query keys that shape a read rather than filter it.
const RESERVED_KEYS: &[&str] = &["select", "order", "limit", "offset", "or", "on_conflict"];

/// One request the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: Method,
    pub table: String,
    pub bearer: Option<String>,
}

/// A canned error response, optionally limited to one method and table.
struct Failure {
    target: Option<(Method, String)>,
    status: StatusCode,
    body: Value,
}

impl Failure {
    fn applies_to(&self, method: &Method, table: &str) -> bool {
        self.target
            .as_ref()
            .is_none_or(|(m, t)| m == method && t == table)
    }
}

#[derive(Default)]
struct FakeState {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    requests: Mutex<Vec<Recorded>>,
    failures: Mutex<VecDeque<Failure>>,
    latency: Mutex<Duration>,
    max_rows: Mutex<Option<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// In-process stand-in for the hosted table API.
///
/// Understands enough of the REST dialect for the client: `eq.` filters,
/// `limit`/`offset`, exact counts via `Content-Range`, and
/// `return=representation` writes. Other filters are ignored.
///
/// Latency is added after a request has been applied, so a client that gives
/// up waiting still leaves its write behind, as a real server would.
pub struct FakeBackend {
    addr: SocketAddr,
    state: Arc<FakeState>,
    server: JoinHandle<()>,
}

impl FakeBackend {
    /// Bind to an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .route("/rest/v1/", get(|| async { StatusCode::OK }))
            .route("/rest/v1/{table}", any(handle_table))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("bind fake backend: {e}"));
        let addr = listener
            .local_addr()
            .unwrap_or_else(|e| panic!("fake backend address: {e}"));
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointed at the fake, with a service key and
    /// millisecond backoff.
    ///
    /// # Panics
    ///
    /// Panics if the fake's URL is rejected.
    #[must_use]
    pub fn config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(&self.url(), ANON_KEY)
            .unwrap_or_else(|e| panic!("fake backend config: {e}"));
        config.service_role_key = Some(SERVICE_KEY.to_string().into());
        config.timeout = Duration::from_secs(2);
        config.retry = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        };
        config
    }

    /// Replace the rows of `table`.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let rows = rows.into_iter().map(with_row_defaults).collect();
        lock(&self.state.tables).insert(table.to_string(), rows);
    }

    /// Current rows of `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.state.tables).get(table).cloned().unwrap_or_default()
    }

    /// Answer the next request with `status` and `body` instead of serving it.
    pub fn fail_next(&self, status: StatusCode, body: Value) {
        lock(&self.state.failures).push_back(Failure {
            target: None,
            status,
            body,
        });
    }

    /// Answer the next `method` request for `table` with `status` and `body`.
    /// Other requests are served normally.
    pub fn fail_next_on(&self, method: Method, table: &str, status: StatusCode, body: Value) {
        lock(&self.state.failures).push_back(Failure {
            target: Some((method, table.to_string())),
            status,
            body,
        });
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.state.latency) = latency;
    }

    /// Return at most `max_rows` rows per read, like the server's row cap.
    pub fn set_max_rows(&self, max_rows: usize) {
        *lock(&self.state.max_rows) = Some(max_rows);
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Recorded> {
        lock(&self.state.requests).clone()
    }

    /// Number of `method` requests received for `table`.
    #[must_use]
    pub fn hits(&self, method: &Method, table: &str) -> usize {
        lock(&self.state.requests)
            .iter()
            .filter(|r| r.method == *method && r.table == table)
            .count()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn with_row_defaults(row: Value) -> Value {
    let Value::Object(mut map) = row else {
        return row;
    };
    let now = chrono::Utc::now().to_rfc3339();
    map.entry("id")
        .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
    map.entry("created_at")
        .or_insert_with(|| Value::String(now.clone()));
    map.entry("updated_at").or_insert(Value::String(now));
    Value::Object(map)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(row: &Value, filters: &[(String, String)]) -> bool {
    filters.iter().all(|(column, condition)| {
        condition
            .strip_prefix("eq.")
            .is_none_or(|expected| row.get(column).is_some_and(|v| text(v) == expected))
    })
}

fn number(pairs: &[(String, String)], key: &str) -> Option<usize> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToString::to_string)
}

fn merge(row: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = row {
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
        fields.insert(
            "updated_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
}

async fn handle_table(
    State(state): State<Arc<FakeState>>,
    method: Method,
    Path(table): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    lock(&state.requests).push(Recorded {
        method: method.clone(),
        table: table.clone(),
        bearer: bearer(&headers),
    });

    let response = apply(&state, &method, &table, &pairs, &body);

    let latency = *lock(&state.latency);
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
    response
}

fn apply(
    state: &FakeState,
    method: &Method,
    table: &str,
    pairs: &[(String, String)],
    body: &[u8],
) -> Response {
    {
        let mut failures = lock(&state.failures);
        if let Some(index) = failures.iter().position(|f| f.applies_to(method, table))
            && let Some(failure) = failures.remove(index)
        {
            return (failure.status, Json(failure.body)).into_response();
        }
    }

    let filters: Vec<(String, String)> = pairs
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    let payload: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "code": "PGRST102", "message": e.to_string() })),
                )
                    .into_response();
            }
        }
    };
    let max_rows = lock(&state.max_rows).unwrap_or(usize::MAX);

    let mut tables = lock(&state.tables);
    let rows = tables.entry(table.to_string()).or_default();

    match *method {
        Method::GET | Method::HEAD => {
            let matching: Vec<Value> =
                rows.iter().filter(|r| matches(r, &filters)).cloned().collect();
            let total = matching.len();
            let offset = number(pairs, "offset").unwrap_or(0);
            let limit = number(pairs, "limit").unwrap_or(usize::MAX).min(max_rows);
            let page: Vec<Value> = matching.into_iter().skip(offset).take(limit).collect();

            let mut response = if *method == Method::HEAD {
                StatusCode::OK.into_response()
            } else {
                Json(Value::Array(page.clone())).into_response()
            };
            let range = if page.is_empty() {
                format!("*/{total}")
            } else {
                format!("{offset}-{}/{total}", offset + page.len() - 1)
            };
            if let Ok(value) = HeaderValue::from_str(&range) {
                response.headers_mut().insert("content-range", value);
            }
            response
        }
        Method::POST => {
            let inserted: Vec<Value> = match payload {
                Value::Array(items) => items.into_iter().map(with_row_defaults).collect(),
                other => vec![with_row_defaults(other)],
            };
            rows.extend(inserted.iter().cloned());
            (StatusCode::CREATED, Json(Value::Array(inserted))).into_response()
        }
        Method::PATCH => {
            let Value::Object(patch) = payload else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let mut updated = Vec::new();
            for row in rows.iter_mut().filter(|r| matches(r, &filters)) {
                merge(row, &patch);
                updated.push(row.clone());
            }
            Json(Value::Array(updated)).into_response()
        }
        Method::DELETE => {
            let (removed, kept): (Vec<Value>, Vec<Value>) =
                rows.drain(..).partition(|r| matches(r, &filters));
            *rows = kept;
            Json(Value::Array(removed)).into_response()
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

// =============================================================================
// Live server helpers
// =============================================================================

/// Base URL of a running storefront.
#[must_use]
pub fn storefront_base_url() -> String {
    std::env::var("STOREFRONT_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

/// Base URL of a running admin API.
#[must_use]
pub fn admin_base_url() -> String {
    std::env::var("ADMIN_BASE_URL").unwrap_or_else(|_| "https://localhost:3001".to_string())
}

/// HTTP client that keeps cookies between requests.
///
/// Self-signed certificates are accepted so the admin's local TLS setup
/// works.
///
/// # Panics
///
/// Panics if the client cannot be built.
#[must_use]
pub fn cookie_client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .danger_accept_invalid_certs(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|e| panic!("build HTTP client: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_filters_match_by_text() {
        let row = json!({ "id": "a", "stock": 3, "status": "active" });
        assert!(matches(&row, &[("stock".into(), "eq.3".into())]));
        assert!(matches(&row, &[("status".into(), "eq.active".into())]));
        assert!(!matches(&row, &[("status".into(), "eq.draft".into())]));
        assert!(matches(&row, &[("name".into(), "ilike.*x*".into())]));
    }

    #[test]
    fn test_row_defaults_keep_given_values() {
        let row = with_row_defaults(json!({ "id": "fixed" }));
        assert_eq!(row.get("id"), Some(&json!("fixed")));
        assert!(row.get("created_at").is_some());
    }

    #[test]
    fn test_targeted_failure_skips_other_requests() {
        let failure = Failure {
            target: Some((Method::POST, "order_items".into())),
            status: StatusCode::FORBIDDEN,
            body: Value::Null,
        };
        assert!(failure.applies_to(&Method::POST, "order_items"));
        assert!(!failure.applies_to(&Method::POST, "orders"));
        assert!(!failure.applies_to(&Method::GET, "order_items"));
    }
}
