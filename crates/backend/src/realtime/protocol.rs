//! Phoenix channel frames used by the change feed.
//!
//! Every frame is a JSON object `{topic, event, payload, ref}`. The client
//! joins one channel that asks for `postgres_changes` on each watched table
//! and sends a heartbeat on the `phoenix` topic to keep the socket alive.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ChangeEvent, RealtimeError};

/// Channel topic joined by the applications.
pub const CHANNEL_TOPIC: &str = "realtime:shopfront";

/// How often a heartbeat is sent.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// A Phoenix channel frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    /// Serialize for sending as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `RealtimeError::Protocol` if the payload cannot be encoded.
    pub fn to_text(&self) -> Result<String, RealtimeError> {
        serde_json::to_string(self).map_err(|e| RealtimeError::Protocol(e.to_string()))
    }
}

/// Join the catalog channel, subscribing to every change on `tables`.
#[must_use]
pub fn join_message(tables: &[String], access_token: &str, reference: u64) -> PhoenixMessage {
    let changes: Vec<Value> = tables
        .iter()
        .map(|table| json!({ "event": "*", "schema": "public", "table": table }))
        .collect();

    PhoenixMessage {
        topic: CHANNEL_TOPIC.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
            },
            "access_token": access_token,
        }),
        reference: Some(reference.to_string()),
    }
}

/// Keep-alive frame.
#[must_use]
pub fn heartbeat_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A row change.
    Change(ChangeEvent),
    /// Reply to a join or heartbeat.
    Reply {
        ok: bool,
        reference: Option<String>,
        response: Value,
    },
    /// The server closed or failed the channel.
    ChannelClosed(String),
    /// Presence, system and other frames the relay does not use.
    Ignored,
}

/// Decode one text frame.
///
/// # Errors
///
/// Returns `RealtimeError::Protocol` for malformed JSON or a malformed
/// change payload.
pub fn parse_frame(text: &str) -> Result<Frame, RealtimeError> {
    let message: PhoenixMessage =
        serde_json::from_str(text).map_err(|e| RealtimeError::Protocol(e.to_string()))?;

    match message.event.as_str() {
        "postgres_changes" => {
            let data = message
                .payload
                .get("data")
                .cloned()
                .ok_or_else(|| RealtimeError::Protocol("postgres_changes without data".into()))?;
            decode_change(data)
        }
        // Legacy per-event frames carry the change directly in the payload.
        "INSERT" | "UPDATE" | "DELETE" => decode_change(message.payload),
        "phx_reply" => {
            let ok = message.payload.get("status").and_then(Value::as_str) == Some("ok");
            let response = message
                .payload
                .get("response")
                .cloned()
                .unwrap_or(Value::Null);
            Ok(Frame::Reply {
                ok,
                reference: message.reference,
                response,
            })
        }
        "phx_error" | "phx_close" => Ok(Frame::ChannelClosed(format!(
            "{} on {}",
            message.event, message.topic
        ))),
        _ => Ok(Frame::Ignored),
    }
}

fn decode_change(data: Value) -> Result<Frame, RealtimeError> {
    serde_json::from_value(data)
        .map(Frame::Change)
        .map_err(|e| RealtimeError::Protocol(format!("bad change payload: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::realtime::ChangeKind;

    #[test]
    fn test_join_message_lists_tables() {
        let msg = join_message(&["products".into(), "offers".into()], "anon", 1);
        assert_eq!(msg.topic, CHANNEL_TOPIC);
        assert_eq!(msg.event, "phx_join");
        let changes = msg.payload["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1]["table"], "offers");
        assert_eq!(changes[0]["event"], "*");
        assert_eq!(msg.payload["access_token"], "anon");

        let text = msg.to_text().unwrap();
        assert!(text.contains(r#""ref":"1""#));
    }

    #[test]
    fn test_heartbeat_message() {
        let msg = heartbeat_message(7);
        assert_eq!(msg.topic, "phoenix");
        assert_eq!(msg.event, "heartbeat");
        assert_eq!(msg.reference.as_deref(), Some("7"));
    }

    #[test]
    fn test_parse_postgres_changes() {
        let text = r#"{
            "topic": "realtime:shopfront",
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "ids": [1],
                "data": {
                    "schema": "public",
                    "table": "products",
                    "type": "UPDATE",
                    "commit_timestamp": "2026-03-01T10:00:00Z",
                    "record": {"id": "p-1", "stock": 3},
                    "old_record": {"id": "p-1"},
                    "columns": []
                }
            }
        }"#;
        match parse_frame(text).unwrap() {
            Frame::Change(event) => {
                assert_eq!(event.table, "products");
                assert_eq!(event.kind, ChangeKind::Update);
                assert_eq!(event.record["stock"], 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_legacy_change() {
        let text = r#"{"topic":"realtime:public:offers","event":"INSERT","ref":null,
            "payload":{"table":"offers","schema":"public","type":"INSERT","record":{"id":"o-1"}}}"#;
        assert!(matches!(parse_frame(text).unwrap(), Frame::Change(e) if e.table == "offers"));
    }

    #[test]
    fn test_parse_reply_and_ignored() {
        let reply = r#"{"topic":"phoenix","event":"phx_reply","ref":"2",
            "payload":{"status":"ok","response":{}}}"#;
        assert!(matches!(parse_frame(reply).unwrap(), Frame::Reply { ok: true, .. }));

        let error = r#"{"topic":"realtime:shopfront","event":"phx_reply","ref":"1",
            "payload":{"status":"error","response":{"reason":"bad token"}}}"#;
        match parse_frame(error).unwrap() {
            Frame::Reply { ok, response, .. } => {
                assert!(!ok);
                assert_eq!(response["reason"], "bad token");
            }
            other => panic!("unexpected {other:?}"),
        }

        let presence =
            r#"{"topic":"realtime:shopfront","event":"presence_state","ref":null,"payload":{}}"#;
        assert_eq!(parse_frame(presence).unwrap(), Frame::Ignored);

        let closed =
            r#"{"topic":"realtime:shopfront","event":"phx_close","ref":null,"payload":{}}"#;
        assert!(matches!(parse_frame(closed).unwrap(), Frame::ChannelClosed(_)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_frame("not json").is_err());
        let missing = r#"{"topic":"t","event":"postgres_changes","payload":{}}"#;
        assert!(parse_frame(missing).is_err());
    }
}
