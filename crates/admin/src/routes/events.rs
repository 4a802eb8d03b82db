//! Live change feed for the admin console.
//!
//! Relays row changes from the backend's realtime channel as server-sent
//! events, so open list views can refresh without polling. Each event is
//! named after its table and carries the change as JSON.

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    extract::State,
    response::{
        Sse,
        sse::{Event, KeepAlive},
    },
};
use futures::Stream;
use serde::Deserialize;
use shopfront_backend::ChangeEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::ApiQuery;
use crate::middleware::RequireAdmin;
use crate::state::AppState;

/// Query parameters for the event stream.
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only forward changes to this table.
    pub table: Option<String>,
}

impl EventFilter {
    fn matches(&self, event: &ChangeEvent) -> bool {
        self.table
            .as_deref()
            .is_none_or(|table| table == event.table)
    }
}

/// SSE frame for one change.
fn change_event(change: &ChangeEvent) -> Event {
    let data = serde_json::to_string(change).unwrap_or_else(|_| {
        r#"{"type":"error","message":"Failed to serialize event"}"#.to_string()
    });
    Event::default().event(change.table.as_str()).data(data)
}

/// GET /api/events
pub async fn stream(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ApiQuery(filter): ApiQuery<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut changes = state.relay().subscribe_all();
    let shutdown = state.shutdown_token().clone();
    debug!(admin_id = %admin.id, table = ?filter.table, "Event stream opened");

    let events = stream! {
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = changes.recv() => received,
            };
            match received {
                Ok(change) if filter.matches(&change) => yield Ok(change_event(&change)),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}
