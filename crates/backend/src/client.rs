//! Table API client.
//!
//! Every request is authorized with the project's `apikey` header plus a
//! bearer token (anon key, signed-in user's access token, or the service-role
//! key) and raced against the configured timeout. Transient failures are
//! retried with backoff; writes that are not idempotent are only retried
//! when the connection was never established.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::{Deserialize, DeserializeOwned};
use serde_json::Value;
use shopfront_core::ValidationErrors;
use tracing::{debug, instrument};

use crate::config::BackendConfig;
use crate::dedup::InFlight;
use crate::error::BackendError;
use crate::query::Query;
use crate::retry::{Replay, retry_with, with_timeout};

const USER_AGENT: &str = concat!("shopfront/", env!("CARGO_PKG_VERSION"));

type SharedRows = Result<Arc<Value>, Arc<BackendError>>;

/// Whose identity a request runs under.
#[derive(Clone)]
enum Credential {
    Anon,
    User(SecretString),
    Service(SecretString),
}

impl Credential {
    fn fingerprint(&self) -> String {
        match self {
            Self::Anon => "anon".to_string(),
            Self::Service(_) => "service".to_string(),
            Self::User(token) => {
                let mut hasher = DefaultHasher::new();
                token.expose_secret().hash(&mut hasher);
                format!("user:{:x}", hasher.finish())
            }
        }
    }
}

/// Response parts kept after the status check.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Client for the hosted table API.
///
/// Cheap to clone; clones share the HTTP connection pool and the in-flight
/// request map.
#[derive(Clone)]
pub struct BackendClient {
    inner: Arc<BackendClientInner>,
    credential: Credential,
}

struct BackendClientInner {
    http: reqwest::Client,
    config: BackendConfig,
    in_flight: InFlight<SharedRows>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let credential = match self.credential {
            Credential::Anon => "anon",
            Credential::User(_) => "user",
            Credential::Service(_) => "service",
        };
        f.debug_struct("BackendClient")
            .field("url", &self.inner.config.url.as_str())
            .field("credential", &credential)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Create an anon-key client.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Http` if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(BackendClientInner {
                http,
                config,
                in_flight: InFlight::new(),
            }),
            credential: Credential::Anon,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Handle that runs requests as the signed-in user, so row-level
    /// security applies to them.
    #[must_use]
    pub fn with_access_token(&self, access_token: &str) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            credential: Credential::User(SecretString::from(access_token.to_string())),
        }
    }

    /// Handle that runs requests with the service-role key.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::MissingServiceKey` when no key is configured.
    pub fn service(&self) -> Result<Self, BackendError> {
        let key = self
            .inner
            .config
            .service_role_key
            .clone()
            .ok_or(BackendError::MissingServiceKey)?;
        Ok(Self {
            inner: Arc::clone(&self.inner),
            credential: Credential::Service(key),
        })
    }

    /// Whether requests run with the service-role key.
    #[must_use]
    pub const fn is_service(&self) -> bool {
        matches!(self.credential, Credential::Service(_))
    }

    /// Whether requests run as a signed-in user.
    #[must_use]
    pub const fn is_user(&self) -> bool {
        matches!(self.credential, Credential::User(_))
    }

    /// Add `apikey` and `Authorization` headers for this handle's credential.
    pub(crate) fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let anon = self.inner.config.anon_key.expose_secret();
        let (apikey, bearer) = match &self.credential {
            Credential::Anon => (anon, anon),
            Credential::User(token) => (anon, token.expose_secret()),
            Credential::Service(key) => (key.expose_secret(), key.expose_secret()),
        };
        request
            .header("apikey", apikey)
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
    }

    /// Send a request built by `build`, with timeout and retry.
    ///
    /// `build` is called once per attempt. Non-success statuses become
    /// `BackendError::Api`.
    pub(crate) async fn send<F>(
        &self,
        op: &str,
        replay: Replay,
        build: F,
    ) -> Result<RawResponse, BackendError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let timeout = self.inner.config.timeout;
        retry_with(&self.inner.config.retry, replay, op, || {
            let request = build();
            with_timeout(timeout, async move {
                let response = request.send().await?;
                let status = response.status().as_u16();
                let headers = response.headers().clone();
                let body = response.text().await?;
                if !(200..300).contains(&status) {
                    return Err(BackendError::from_response(status, &body));
                }
                Ok(RawResponse {
                    status,
                    headers,
                    body,
                })
            })
        })
        .await
    }

    fn table_request(
        &self,
        method: reqwest::Method,
        table: &str,
        pairs: &[(String, String)],
    ) -> reqwest::RequestBuilder {
        let request = self
            .inner
            .http
            .request(method, self.inner.config.rest_url(table))
            .query(pairs);
        self.authorize(request)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Rows matching `query` as raw JSON.
    ///
    /// Identical concurrent reads under the same credential share one request.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport or API failure.
    #[instrument(skip(self, query), fields(table = %table))]
    pub async fn select_value(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Arc<Value>, BackendError> {
        let key = format!("{}|{}", self.credential.fingerprint(), query.cache_key(table));
        let client = self.clone();
        let table = table.to_string();
        let pairs = with_default_select(query);

        self.inner
            .in_flight
            .run(key, async move {
                let raw = client
                    .send("select", Replay::Safe, || {
                        client.table_request(reqwest::Method::GET, &table, &pairs)
                    })
                    .await
                    .map_err(Arc::new)?;
                let rows: Value = serde_json::from_str(&raw.body)
                    .map_err(|e| Arc::new(BackendError::from(e)))?;
                Ok(Arc::new(rows))
            })
            .await
            .map_err(BackendError::from_shared)
    }

    /// Rows matching `query`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Decode` if rows do not match `T`.
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<T>, BackendError> {
        let value = self.select_value(table, query).await?;
        decode_rows(&value)
    }

    /// Every row matching `query`, read `batch` rows at a time so the
    /// server's max-rows cap cannot truncate the result.
    ///
    /// Any paging on `query` is replaced. Give it a total ordering (for
    /// example by `id`) so batches neither overlap nor skip rows.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` from the first batch that fails.
    #[instrument(skip(self, query), fields(table = %table))]
    pub async fn select_all<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        batch: u64,
    ) -> Result<Vec<T>, BackendError> {
        let batch = batch.max(1);
        let mut rows = Vec::new();
        loop {
            // Advance by rows received, not by `batch`: the cap may be smaller.
            let offset = u64::try_from(rows.len()).unwrap_or(u64::MAX);
            let page: Vec<T> = self
                .select(table, &query.clone().offset(offset).limit(batch))
                .await?;
            if page.is_empty() {
                break;
            }
            rows.extend(page);
        }
        debug!(rows = rows.len(), "Read all rows");
        Ok(rows)
    }

    /// First row matching `query`, if any.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Option<T>, BackendError> {
        let rows = self.select::<T>(table, &query.clone().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Number of rows matching `query`'s filters.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on failure or when the count header is missing.
    #[instrument(skip(self, query), fields(table = %table))]
    pub async fn count(&self, table: &str, query: &Query) -> Result<u64, BackendError> {
        let pairs = query.without_paging().to_pairs();
        let raw = self
            .send("count", Replay::Safe, || {
                self.table_request(reqwest::Method::HEAD, table, &pairs)
                    .header("Prefer", "count=exact")
            })
            .await?;

        raw.headers
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| BackendError::Api {
                status: raw.status,
                code: None,
                message: "missing row count in response".to_string(),
                details: None,
                hint: None,
            })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert one row and return it as stored.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on failure; `NotFound` if the backend returned
    /// no representation (for example, RLS hid the new row).
    #[instrument(skip(self, body), fields(table = %table))]
    pub async fn insert<T, B>(&self, table: &str, body: &B) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let rows: Vec<T> = self.insert_many(table, body).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("{table}: inserted row not returned")))
    }

    /// Insert one or many rows (`body` may be an object or an array).
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    pub async fn insert_many<T, B>(&self, table: &str, body: &B) -> Result<Vec<T>, BackendError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(body)?;
        let raw = self
            .send("insert", Replay::Unsafe, || {
                self.table_request(reqwest::Method::POST, table, &[])
                    .header("Prefer", "return=representation")
                    .json(&payload)
            })
            .await?;
        debug!(table, "Inserted rows");
        parse_rows(&raw.body)
    }

    /// Insert or merge rows on conflict with `on_conflict` columns.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    #[instrument(skip(self, body), fields(table = %table))]
    pub async fn upsert<T, B>(
        &self,
        table: &str,
        body: &B,
        on_conflict: Option<&str>,
    ) -> Result<Vec<T>, BackendError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(body)?;
        let pairs: Vec<(String, String)> = on_conflict
            .map(|c| vec![("on_conflict".to_string(), c.to_string())])
            .unwrap_or_default();
        let raw = self
            .send("upsert", Replay::Unsafe, || {
                self.table_request(reqwest::Method::POST, table, &pairs)
                    .header("Prefer", "return=representation,resolution=merge-duplicates")
                    .json(&payload)
            })
            .await?;
        parse_rows(&raw.body)
    }

    /// Apply `patch` to every row matching `query`; returns the updated rows.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Validation` if `query` has no filter.
    #[instrument(skip(self, query, patch), fields(table = %table))]
    pub async fn update<T, B>(
        &self,
        table: &str,
        query: &Query,
        patch: &B,
    ) -> Result<Vec<T>, BackendError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        require_filter(query)?;
        let payload = serde_json::to_value(patch)?;
        let pairs = query.to_pairs();
        let raw = self
            .send("update", Replay::Safe, || {
                self.table_request(reqwest::Method::PATCH, table, &pairs)
                    .header("Prefer", "return=representation")
                    .json(&payload)
            })
            .await?;
        parse_rows(&raw.body)
    }

    /// Delete every row matching `query`; returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Validation` if `query` has no filter.
    #[instrument(skip(self, query), fields(table = %table))]
    pub async fn delete(&self, table: &str, query: &Query) -> Result<usize, BackendError> {
        require_filter(query)?;
        let mut pairs = query.to_pairs();
        pairs.retain(|(k, _)| k != "select");
        pairs.push(("select".to_string(), "id".to_string()));
        let raw = self
            .send("delete", Replay::Unsafe, || {
                self.table_request(reqwest::Method::DELETE, table, &pairs)
                    .header("Prefer", "return=representation")
            })
            .await?;
        let rows: Vec<Value> = parse_rows(&raw.body)?;
        Ok(rows.len())
    }

    /// Call a database function.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    #[instrument(skip(self, args))]
    pub async fn rpc<T, A>(&self, function: &str, args: &A) -> Result<T, BackendError>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(args)?;
        let url = self.inner.config.rest_url(&format!("rpc/{function}"));
        let raw = self
            .send("rpc", Replay::Unsafe, || {
                self.authorize(self.inner.http.post(&url)).json(&payload)
            })
            .await?;
        let body = if raw.body.trim().is_empty() { "null" } else { raw.body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    /// Cheap reachability check against the table API root.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend cannot be reached.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let url = self.inner.config.rest_url("");
        with_timeout(self.inner.config.timeout, async {
            let response = self.authorize(self.inner.http.get(&url)).send().await?;
            let status = response.status().as_u16();
            if status >= 500 {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::from_response(status, &body));
            }
            Ok(())
        })
        .await
    }
}

fn with_default_select(query: &Query) -> Vec<(String, String)> {
    let mut pairs = query.to_pairs();
    if query.selected().is_none() {
        pairs.insert(0, ("select".to_string(), "*".to_string()));
    }
    pairs
}

fn require_filter(query: &Query) -> Result<(), BackendError> {
    if query.has_filters() {
        Ok(())
    } else {
        Err(ValidationErrors::single("filter", "is required for updates and deletes").into())
    }
}

fn parse_rows<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, BackendError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(body)?;
    decode_rows(&value)
}

/// Decode a JSON array (or a single object) into rows.
pub(crate) fn decode_rows<T: DeserializeOwned>(value: &Value) -> Result<Vec<T>, BackendError> {
    match value {
        Value::Array(_) => Ok(Vec::<T>::deserialize(value)?),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![T::deserialize(other)?]),
    }
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn client() -> BackendClient {
        let mut config = BackendConfig::new("https://proj.backend.test", "anon-key").unwrap();
        config.service_role_key = Some(SecretString::from("service-key"));
        BackendClient::new(config).unwrap()
    }

    fn headers(client: &BackendClient) -> (String, String) {
        let request = client
            .authorize(client.http().get("https://proj.backend.test/rest/v1/products"))
            .build()
            .unwrap();
        let h = request.headers();
        (
            h.get("apikey").unwrap().to_str().unwrap().to_string(),
            h.get(AUTHORIZATION).unwrap().to_str().unwrap().to_string(),
        )
    }

    #[test]
    fn test_credentials_select_headers() {
        let anon = client();
        assert_eq!(headers(&anon), ("anon-key".into(), "Bearer anon-key".into()));

        let user = anon.with_access_token("user-jwt");
        assert!(user.is_user());
        assert_eq!(headers(&user), ("anon-key".into(), "Bearer user-jwt".into()));

        let service = anon.service().unwrap();
        assert!(service.is_service());
        assert_eq!(headers(&service), ("service-key".into(), "Bearer service-key".into()));
    }

    #[test]
    fn test_service_requires_key() {
        let config = BackendConfig::new("https://proj.backend.test", "anon-key").unwrap();
        let client = BackendClient::new(config).unwrap();
        assert!(matches!(client.service(), Err(BackendError::MissingServiceKey)));
    }

    #[test]
    fn test_fingerprints_separate_users() {
        let anon = client();
        let a = anon.with_access_token("a").credential.fingerprint();
        let b = anon.with_access_token("b").credential.fingerprint();
        assert_ne!(a, b);
        assert!(a.starts_with("user:"));
        assert_eq!(anon.credential.fingerprint(), "anon");
    }

    #[test]
    fn test_debug_hides_credentials() {
        let debug = format!("{:?}", client().with_access_token("secret-token"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("user"));
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("0-24/3573"), Some(3573));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-24/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn test_decode_rows_accepts_array_object_and_null() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Row {
            id: u32,
        }
        let rows: Vec<Row> = decode_rows(&json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(rows, vec![Row { id: 1 }, Row { id: 2 }]);
        let rows: Vec<Row> = decode_rows(&json!({"id": 3})).unwrap();
        assert_eq!(rows, vec![Row { id: 3 }]);
        let rows: Vec<Row> = decode_rows(&Value::Null).unwrap();
        assert!(rows.is_empty());
        assert!(decode_rows::<Row>(&json!([{"id": "x"}])).is_err());
    }

    #[test]
    fn test_default_select_added() {
        let pairs = with_default_select(&Query::new().eq("id", 1));
        assert_eq!(pairs[0], ("select".to_string(), "*".to_string()));
        let pairs = with_default_select(&Query::new().select("id,name"));
        assert_eq!(pairs, vec![("select".to_string(), "id,name".to_string())]);
    }

    #[tokio::test]
    async fn test_unfiltered_writes_are_refused() {
        let client = client();
        let err = client.delete("products", &Query::new()).await.unwrap_err();
        assert!(err.validation_errors().is_some());
        let err = client
            .update::<Value, _>("products", &Query::new().limit(1), &json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(err.validation_errors().is_some());
    }
}
