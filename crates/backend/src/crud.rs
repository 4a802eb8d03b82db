//! Generic create/read/update/delete over any [`Entity`].
//!
//! Reads go through the shared [`QueryCache`]; writes validate their input,
//! normalize field names, call the backend, and invalidate the entity's
//! table.

use std::collections::HashMap;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{Map, Value};
use shopfront_core::entities::READ_ONLY_FIELDS;
use shopfront_core::{Entity, Validate, ValidationErrors};
use tracing::{debug, instrument};

use crate::cache::QueryCache;
use crate::client::{BackendClient, decode_rows};
use crate::dedup::BatchLoader;
use crate::error::BackendError;
use crate::query::{Query, clamp_page};

/// CRUD operations for one table.
pub struct CrudService<E> {
    client: BackendClient,
    /// Cache used for reads.
    cache: Option<QueryCache>,
    /// Cache invalidated after writes.
    invalidates: Option<QueryCache>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for CrudService<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            cache: self.cache.clone(),
            invalidates: self.invalidates.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> std::fmt::Debug for CrudService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudService")
            .field("table", &E::TABLE)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl<E: Entity> CrudService<E> {
    /// Service whose reads are cached in `cache`.
    ///
    /// The cache is keyed by query only, so share one cache between handles
    /// with the same credential (anon reads, or the admin's service role).
    #[must_use]
    pub fn new(client: BackendClient, cache: QueryCache) -> Self {
        Self {
            client,
            cache: Some(cache.clone()),
            invalidates: Some(cache),
            _entity: PhantomData,
        }
    }

    /// Service that always reads from the backend.
    #[must_use]
    pub const fn uncached(client: BackendClient) -> Self {
        Self {
            client,
            cache: None,
            invalidates: None,
            _entity: PhantomData,
        }
    }

    /// Uncached handle acting as the signed-in user. Writes still invalidate
    /// the shared cache.
    #[must_use]
    pub fn for_user(&self, access_token: &str) -> Self {
        Self {
            client: self.client.with_access_token(access_token),
            cache: None,
            invalidates: self.invalidates.clone(),
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub const fn client(&self) -> &BackendClient {
        &self.client
    }

    fn read_query(query: &Query) -> Query {
        if query.selected().is_some() {
            query.clone()
        } else {
            query.clone().select(E::SELECT)
        }
    }

    async fn read_value(&self, query: &Query) -> Result<Arc<Value>, BackendError> {
        match &self.cache {
            Some(cache) => {
                let key = query.cache_key(E::TABLE);
                cache
                    .get_or_fetch(key, self.client.select_value(E::TABLE, query))
                    .await
            }
            None => self.client.select_value(E::TABLE, query).await,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Rows matching `query`; embeds from `E::SELECT` unless `query` selects.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    #[instrument(skip(self, query), fields(table = E::TABLE))]
    pub async fn list(&self, query: &Query) -> Result<Vec<E>, BackendError> {
        let value = self.read_value(&Self::read_query(query)).await?;
        decode_rows(&value)
    }

    /// Row by primary key, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    pub async fn find(&self, id: E::Id) -> Result<Option<E>, BackendError> {
        self.get_by(E::ID_COLUMN, id).await
    }

    /// Row by primary key.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` when no row matches.
    pub async fn get(&self, id: E::Id) -> Result<E, BackendError> {
        self.find(id)
            .await?
            .ok_or_else(|| BackendError::NotFound(format!("{} {id}", E::TABLE)))
    }

    /// First row whose `column` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    pub async fn get_by(
        &self,
        column: &str,
        value: impl Display,
    ) -> Result<Option<E>, BackendError> {
        let rows = self.list(&Query::new().eq(column, value).limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Number of rows matching `query`'s filters.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport or API failure.
    #[instrument(skip(self, query), fields(table = E::TABLE))]
    pub async fn count(&self, query: &Query) -> Result<u64, BackendError> {
        let Some(cache) = &self.cache else {
            return self.client.count(E::TABLE, query).await;
        };

        let key = format!("{}#count", query.without_paging().cache_key(E::TABLE));
        let client = &self.client;
        let value = cache
            .get_or_fetch(key, async move {
                let count = client.count(E::TABLE, query).await?;
                Ok(Arc::new(Value::from(count)))
            })
            .await?;
        Ok(value.as_u64().unwrap_or_default())
    }

    /// One page of rows plus the total across all pages.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport, API, or decode failure.
    pub async fn page(
        &self,
        query: &Query,
        page: u64,
        per_page: u64,
    ) -> Result<Page<E>, BackendError> {
        let page = clamp_page(page);
        let per_page = per_page.max(1);
        let paged = query.clone().page(page, per_page);
        let (items, total) = futures::try_join!(self.list(&paged), self.count(query))?;
        Ok(Page {
            items,
            page,
            per_page,
            total,
        })
    }

    /// Batch loader resolving by-id lookups with one `in.(...)` query per window.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn loader(&self) -> BatchLoader<E::Id, E> {
        let service = self.clone();
        BatchLoader::new(
            BatchLoader::<E::Id, E>::DEFAULT_WINDOW,
            BatchLoader::<E::Id, E>::DEFAULT_MAX_BATCH,
            move |ids: Vec<E::Id>| {
                let service = service.clone();
                async move {
                    let query = Query::new().in_list(E::ID_COLUMN, &ids).select(E::SELECT);
                    let value = service.client.select_value(E::TABLE, &query).await?;
                    let rows: Vec<E> = decode_rows(&value)?;
                    Ok(rows.into_iter().map(|row| (row.id(), row)).collect::<HashMap<_, _>>())
                }
            },
        )
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Validate and insert `input`; returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Validation` for invalid input, otherwise any
    /// backend failure.
    #[instrument(skip(self, input), fields(table = E::TABLE))]
    pub async fn create(&self, input: &E::New) -> Result<E, BackendError> {
        input.validate()?;
        let payload = prepare_insert::<E>(object_of(input)?)?;
        let row: E = self.client.insert(E::TABLE, &payload).await?;
        debug!(id = %row.id(), "Created row");
        self.invalidate();
        Ok(row)
    }

    /// Validate and apply `patch` to the row `id`; returns the updated row.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` when no row matched.
    #[instrument(skip(self, patch), fields(table = E::TABLE, id = %id))]
    pub async fn update(&self, id: E::Id, patch: &E::Patch) -> Result<E, BackendError> {
        patch.validate()?;
        let payload = strip_read_only(object_of(patch)?);
        if payload.is_empty() {
            return self.get(id).await;
        }
        let rows: Vec<E> = self
            .client
            .update(E::TABLE, &Query::new().eq(E::ID_COLUMN, id), &payload)
            .await?;
        self.invalidate();
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("{} {id}", E::TABLE)))
    }

    /// Delete the row `id`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` when no row matched.
    #[instrument(skip(self), fields(table = E::TABLE, id = %id))]
    pub async fn delete(&self, id: E::Id) -> Result<(), BackendError> {
        let deleted = self
            .client
            .delete(E::TABLE, &Query::new().eq(E::ID_COLUMN, id))
            .await?;
        self.invalidate();
        if deleted == 0 {
            return Err(BackendError::NotFound(format!("{} {id}", E::TABLE)));
        }
        Ok(())
    }

    /// Create from a loosely-keyed form payload (camelCase aliases allowed).
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Validation` when required fields are missing or
    /// the payload does not form a valid insert.
    pub async fn create_json(&self, payload: Map<String, Value>) -> Result<E, BackendError> {
        let fields = prepare_insert::<E>(translate_fields::<E>(payload))?;
        let input: E::New = from_fields(fields)?;
        self.create(&input).await
    }

    /// Update from a loosely-keyed form payload.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Validation` when the payload does not form a
    /// valid patch.
    pub async fn update_json(
        &self,
        id: E::Id,
        payload: Map<String, Value>,
    ) -> Result<E, BackendError> {
        let fields = strip_read_only(translate_fields::<E>(payload));
        let patch: E::Patch = from_fields(fields)?;
        self.update(id, &patch).await
    }

    /// Drop cached reads of this table.
    pub fn invalidate(&self) {
        if let Some(cache) = &self.invalidates {
            cache.invalidate_table(E::TABLE);
        }
    }
}

/// A page of rows from [`CrudService::page`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number.
    pub page: u64,
    pub per_page: u64,
    /// Rows matching the query across all pages.
    pub total: u64,
}

impl<T> Page<T> {
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        if self.total == 0 {
            1
        } else {
            self.total.div_ceil(self.per_page)
        }
    }

    #[must_use]
    pub const fn has_previous(&self) -> bool {
        self.page > 1
    }

    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }

    /// Transform the rows, keeping the paging numbers.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

// =============================================================================
// Payload helpers
// =============================================================================

/// Rename alias keys (e.g. `categoryId`, `imageUrl`) to column names.
#[must_use]
pub fn translate_fields<E: Entity>(payload: Map<String, Value>) -> Map<String, Value> {
    payload
        .into_iter()
        .map(|(key, value)| (E::column_for(&key).to_string(), value))
        .collect()
}

/// Drop columns the backend maintains itself.
#[must_use]
pub fn strip_read_only(mut payload: Map<String, Value>) -> Map<String, Value> {
    for field in READ_ONLY_FIELDS {
        payload.remove(*field);
    }
    payload
}

/// Check that `E::REQUIRED_FIELDS` are present and non-empty.
///
/// # Errors
///
/// Returns every missing field, each with "is required".
pub fn check_required<E: Entity>(payload: &Map<String, Value>) -> Result<(), ValidationErrors> {
    let mut missing = shopfront_core::Validator::new();
    for field in E::REQUIRED_FIELDS {
        let present = match payload.get(*field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            missing.push(field, "is required");
        }
    }
    missing.finish()
}

fn prepare_insert<E: Entity>(
    payload: Map<String, Value>,
) -> Result<Map<String, Value>, BackendError> {
    let payload = strip_read_only(payload);
    check_required::<E>(&payload)?;
    Ok(payload)
}

fn object_of<T: serde::Serialize + ?Sized>(value: &T) -> Result<Map<String, Value>, BackendError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationErrors::single("body", "must be an object").into()),
    }
}

fn from_fields<T: serde::de::DeserializeOwned>(
    fields: Map<String, Value>,
) -> Result<T, BackendError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| ValidationErrors::single("body", e.to_string()).into())
}
