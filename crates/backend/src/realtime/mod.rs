//! Realtime change feed.
//!
//! [`RealtimeConnection`] keeps a WebSocket to the backend's change feed open
//! and hands every row change to a [`RealtimeRelay`], which fans it out to
//! in-process subscribers and, once attached to a [`crate::QueryCache`],
//! drops stale cache entries after each burst of changes.

mod connection;
pub mod protocol;
mod relay;

pub use connection::{ReconnectConfig, RealtimeConnection};
pub use relay::{ConnectionState, RealtimeRelay};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::BackendError;

/// Tables the applications watch for catalog changes.
pub const CATALOG_TABLES: &[&str] = &[
    "products",
    "categories",
    "collections",
    "collection_products",
    "offers",
    "new_arrivals",
];

/// Errors raised by the change-feed connection.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl From<RealtimeError> for BackendError {
    fn from(e: RealtimeError) -> Self {
        Self::Realtime(e.to_string())
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row change reported by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// New row; empty for deletes.
    #[serde(default)]
    pub record: Value,
    /// Previous row; only carries the key unless the table has full replica identity.
    #[serde(default)]
    pub old_record: Value,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

fn default_schema() -> String {
    "public".to_string()
}

impl ChangeEvent {
    /// Build an event by hand (tests, local notifications after writes).
    #[must_use]
    pub fn new(table: impl Into<String>, kind: ChangeKind, record: Value) -> Self {
        Self {
            table: table.into(),
            schema: default_schema(),
            kind,
            record,
            old_record: Value::Null,
            commit_timestamp: Some(Utc::now()),
        }
    }

    /// Primary key of the changed row, from the new or old record.
    #[must_use]
    pub fn row_id(&self) -> Option<&str> {
        self.record
            .get("id")
            .or_else(|| self.old_record.get("id"))
            .and_then(Value::as_str)
    }
}
