//! WebSocket connection to the change feed with exponential-backoff
//! reconnection.
//!
//! [`RealtimeConnection::run`] connects, joins the catalog channel, and feeds
//! every change into a [`RealtimeRelay`] until the [`CancellationToken`] is
//! triggered. Dropped connections are retried with increasing delays.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::protocol::{self, Frame, HEARTBEAT_INTERVAL};
use super::relay::{ConnectionState, RealtimeRelay};
use super::RealtimeError;
use crate::config::BackendConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the next backoff delay, clamped to `max_delay`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_delay)
    }
}

/// A change-feed subscription for a set of tables.
pub struct RealtimeConnection {
    url: String,
    access_token: SecretString,
    tables: Vec<String>,
    reconnect: ReconnectConfig,
}

impl std::fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("tables", &self.tables)
            .field("reconnect", &self.reconnect)
            .finish_non_exhaustive()
    }
}

impl RealtimeConnection {
    /// Subscribe to `tables` with the project's anon key.
    #[must_use]
    pub fn new(config: &BackendConfig, tables: &[&str]) -> Self {
        Self {
            url: config.realtime_url(),
            access_token: config.anon_key.clone(),
            tables: tables.iter().map(ToString::to_string).collect(),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Authorize the channel with a different token (e.g. the service key,
    /// so admin consoles see rows hidden from the public).
    #[must_use]
    pub fn with_access_token(mut self, token: SecretString) -> Self {
        self.access_token = token;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, relay: RealtimeRelay, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(relay, cancel))
    }

    /// Keep the feed connected until `cancel` fires.
    pub async fn run(self, relay: RealtimeRelay, cancel: CancellationToken) {
        let mut delay = self.reconnect.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            relay.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.connect() => result,
            };

            match connected {
                Ok(ws) => {
                    tracing::info!(attempt, tables = ?self.tables, "Connected to change feed");
                    relay.set_state(ConnectionState::Connected);
                    attempt = 0;
                    delay = self.reconnect.initial_delay;

                    match self.session(ws, &relay, &cancel).await {
                        Ok(()) => tracing::info!("Change feed closed"),
                        Err(e) => tracing::warn!(error = %e, "Change feed dropped"),
                    }
                    relay.set_state(ConnectionState::Disconnected);
                }
                Err(e) => {
                    relay.set_state(ConnectionState::Disconnected);
                    tracing::warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Change feed connect failed",
                    );
                }
            }

            // Wait before the next attempt, respecting cancellation.
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            delay = self.reconnect.next_delay(delay);
        }

        relay.set_state(ConnectionState::Disconnected);
        tracing::info!("Change feed stopped");
    }

    async fn connect(&self) -> Result<WsStream, RealtimeError> {
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;
        Ok(ws)
    }

    /// Drive one connected socket until it closes or `cancel` fires.
    async fn session(
        &self,
        ws: WsStream,
        relay: &RealtimeRelay,
        cancel: &CancellationToken,
    ) -> Result<(), RealtimeError> {
        let (mut sink, mut stream) = ws.split();
        let mut reference: u64 = 1;

        let join =
            protocol::join_message(&self.tables, self.access_token.expose_secret(), reference);
        sink.send(Message::Text(join.to_text()?))
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    reference += 1;
                    let beat = protocol::heartbeat_message(reference).to_text()?;
                    sink.send(Message::Text(beat))
                        .await
                        .map_err(|e| RealtimeError::Connection(e.to_string()))?;
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => handle_text(&text, relay)?,
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "Change feed socket closed by server");
                        return Ok(());
                    }
                    // Pings are answered by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(RealtimeError::Connection(e.to_string())),
                    None => return Ok(()),
                },
            }
        }
    }
}

fn handle_text(text: &str, relay: &RealtimeRelay) -> Result<(), RealtimeError> {
    match protocol::parse_frame(text) {
        Ok(Frame::Change(event)) => {
            relay.dispatch(event);
            Ok(())
        }
        Ok(Frame::Reply { ok: false, response, .. }) => {
            Err(RealtimeError::Channel(response.to_string()))
        }
        Ok(Frame::ChannelClosed(reason)) => Err(RealtimeError::Channel(reason)),
        Ok(Frame::Reply { .. } | Frame::Ignored) => Ok(()),
        Err(e) => {
            // One bad frame does not end the session.
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse change feed frame");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_full_backoff_sequence() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = config.next_delay(delay);
        }
    }

    #[test]
    fn test_custom_multiplier() {
        let config = ReconnectConfig {
            multiplier: 3.0,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(config.next_delay(Duration::from_secs(2)), Duration::from_secs(6));
    }

    #[test]
    fn test_handle_text_dispatches_changes() {
        let relay = RealtimeRelay::new();
        let mut rx = relay.subscribe("products");
        let text = r#"{"topic":"realtime:shopfront","event":"postgres_changes","ref":null,
            "payload":{"data":{"table":"products","schema":"public","type":"INSERT",
            "record":{"id":"p"}}}}"#;
        handle_text(text, &relay).unwrap();
        assert_eq!(rx.try_recv().unwrap().table, "products");
    }

    #[test]
    fn test_handle_text_failed_join_ends_session() {
        let relay = RealtimeRelay::new();
        let text = r#"{"topic":"realtime:shopfront","event":"phx_reply","ref":"1",
            "payload":{"status":"error","response":{"reason":"unauthorized"}}}"#;
        assert!(matches!(handle_text(text, &relay), Err(RealtimeError::Channel(_))));
        assert!(handle_text("garbage", &relay).is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_immediately() {
        let config = BackendConfig::new("http://127.0.0.1:9", "anon").unwrap();
        let relay = RealtimeRelay::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        RealtimeConnection::new(&config, &["products"]).run(relay.clone(), cancel).await;
        assert_eq!(relay.state(), ConnectionState::Disconnected);
    }
}
