// Feed Client - websocket adapter for ticks and candle history
// Multiplexed tick subscriptions, request/response history fetch with a
// 30 s timeout, exponential-ish reconnect backoff, and a ping keep-alive.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::core::config::FeedConfig;
use crate::core::events::{EventBus, FeedEvent};
use crate::core::types::{Candle, ConnectionStatus, Tick};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed not connected")]
    NotConnected,
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("channel closed")]
    ChannelClosed,
}

// ============================================================================
// Adapter Trait
// ============================================================================

/// Boundary contract the session manager depends on. The production
/// implementation speaks websocket; tests substitute an in-memory feed.
pub trait FeedAdapter: Send + Sync {
    /// Register a tick listener for a symbol. The first listener opens the
    /// wire subscription; further listeners share it.
    fn subscribe_ticks(&self, symbol: &str, listener_id: &str);

    /// Remove a listener; the last removal releases the wire subscription.
    fn unsubscribe_ticks(&self, symbol: &str, listener_id: &str);

    /// Fetch closed-candle history, sorted ascending, non-forming.
    fn fetch_candle_history(
        &self,
        symbol: &str,
        granularity_secs: i64,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, FeedError>>;
}

// ============================================================================
// Wire Messages
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundMessage<'a> {
    Subscribe { symbol: &'a str },
    Unsubscribe { symbol: &'a str },
    History {
        req_id: u64,
        symbol: &'a str,
        granularity: i64,
        count: usize,
    },
    Ping,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    Tick {
        symbol: String,
        price: f64,
        epoch: i64,
    },
    History {
        req_id: u64,
        candles: Vec<WireCandle>,
    },
    Pong,
    Error {
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct WireCandle {
    symbol: String,
    granularity: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    epoch: i64,
    #[serde(default)]
    tick_count: u64,
}

impl WireCandle {
    fn into_candle(self) -> Candle {
        Candle {
            symbol: self.symbol,
            timeframe_secs: self.granularity,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            start_epoch: self.epoch,
            tick_count: self.tick_count.max(1),
            is_forming: false,
        }
    }
}

enum FeedCommand {
    Send(String),
    Disconnect,
}

// ============================================================================
// Ws Feed Client
// ============================================================================

type PendingHistory = Arc<RwLock<HashMap<u64, oneshot::Sender<Result<Vec<Candle>, FeedError>>>>>;

/// Websocket-backed feed adapter. One connection task owns the socket;
/// subscriptions survive reconnects and are replayed after each connect.
pub struct WsFeedClient {
    config: FeedConfig,
    bus: Arc<EventBus>,
    state: Arc<RwLock<ConnectionStatus>>,

    // symbol -> listener ids; the wire subscription is refcounted by this.
    listeners: Arc<RwLock<HashMap<String, HashSet<String>>>>,

    cmd_tx: Arc<RwLock<Option<mpsc::UnboundedSender<FeedCommand>>>>,
    pending_history: PendingHistory,
    next_request_id: Arc<AtomicU64>,

    messages_received: Arc<RwLock<u64>>,
    reconnects: Arc<RwLock<u32>>,
}

impl WsFeedClient {
    pub fn new(config: FeedConfig, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            bus,
            state: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            cmd_tx: Arc::new(RwLock::new(None)),
            pending_history: Arc::new(RwLock::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            messages_received: Arc::new(RwLock::new(0)),
            reconnects: Arc::new(RwLock::new(0)),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn messages_received(&self) -> u64 {
        *self.messages_received.read()
    }

    /// Spawn the connection task. Reconnects with growing delay up to the
    /// configured attempt limit, then emits a terminal feed event.
    pub fn connect(self: &Arc<Self>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            client.run().await;
        });
    }

    async fn run(self: Arc<Self>) {
        let mut attempt = 0u32;
        loop {
            *self.state.write() = if attempt == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            };

            match self.run_connection().await {
                Ok(()) => {
                    // Clean shutdown requested.
                    *self.state.write() = ConnectionStatus::Disconnected;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt, "Feed connection lost");
                    self.bus.feed.publish(FeedEvent::Disconnected);
                    self.fail_pending(FeedError::NotConnected);
                }
            }

            attempt += 1;
            *self.reconnects.write() += 1;
            if attempt >= self.config.max_reconnect_attempts {
                error!(
                    attempts = attempt,
                    "Feed reconnect attempts exhausted"
                );
                *self.state.write() = ConnectionStatus::Failed;
                self.bus.feed.publish(FeedEvent::Terminal);
                return;
            }

            let delay = self.backoff_delay(attempt);
            warn!(delay_secs = delay, attempt = attempt, "Reconnecting to feed");
            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
        }
    }

    /// Delay grows by the configured multiplier from the base, capped.
    fn backoff_delay(&self, attempt: u32) -> u64 {
        let base = self.config.reconnect_delay_seconds as f64;
        let factor = self.config.reconnect_backoff_multiplier.max(1.0);
        let delay = base * factor.powi(attempt.saturating_sub(1) as i32);
        (delay as u64).min(self.config.reconnect_delay_cap_seconds)
    }

    async fn run_connection(&self) -> Result<(), FeedError> {
        let (ws_stream, _) = connect_async(&self.config.ws_url)
            .await
            .map_err(|e| FeedError::Protocol(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        info!(url = %self.config.ws_url, "Feed connected");
        *self.state.write() = ConnectionStatus::Connected;
        self.bus.feed.publish(FeedEvent::Connected);

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<FeedCommand>();
        *self.cmd_tx.write() = Some(cmd_tx);

        // Replay active subscriptions after (re)connect.
        let symbols: Vec<String> = self.listeners.read().keys().cloned().collect();
        for symbol in symbols {
            let msg = serde_json::to_string(&OutboundMessage::Subscribe { symbol: &symbol })?;
            write
                .send(Message::Text(msg))
                .await
                .map_err(|e| FeedError::Protocol(e.to_string()))?;
        }

        let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.ping_interval_seconds,
        ));
        ping_interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                command = cmd_rx.recv() => match command {
                    Some(FeedCommand::Send(payload)) => {
                        write
                            .send(Message::Text(payload))
                            .await
                            .map_err(|e| FeedError::Protocol(e.to_string()))?;
                    }
                    Some(FeedCommand::Disconnect) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                },
                _ = ping_interval.tick() => {
                    let payload = serde_json::to_string(&OutboundMessage::Ping)?;
                    write
                        .send(Message::Text(payload))
                        .await
                        .map_err(|e| FeedError::Protocol(e.to_string()))?;
                },
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_message(&text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(FeedError::Protocol("connection closed".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(FeedError::Protocol(e.to_string()));
                    }
                },
            }
        }
    }

    fn handle_message(&self, text: &str) {
        *self.messages_received.write() += 1;

        let inbound: InboundMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Unparseable feed message dropped");
                return;
            }
        };

        match inbound {
            InboundMessage::Tick {
                symbol,
                price,
                epoch,
            } => {
                self.bus.ticks.publish(Tick::new(symbol, price, epoch));
            }
            InboundMessage::History { req_id, candles } => {
                let sender = self.pending_history.write().remove(&req_id);
                if let Some(sender) = sender {
                    let mut candles: Vec<Candle> =
                        candles.into_iter().map(WireCandle::into_candle).collect();
                    candles.sort_by_key(|c| c.start_epoch);
                    let _ = sender.send(Ok(candles));
                } else {
                    debug!(req_id = req_id, "History response without awaiter");
                }
            }
            InboundMessage::Pong => {}
            InboundMessage::Error { message } => {
                warn!(message = %message, "Feed error message");
            }
        }
    }

    fn send_command(&self, payload: String) -> Result<(), FeedError> {
        match self.cmd_tx.read().as_ref() {
            Some(tx) => tx
                .send(FeedCommand::Send(payload))
                .map_err(|_| FeedError::ChannelClosed),
            None => Err(FeedError::NotConnected),
        }
    }

    pub fn disconnect(&self) {
        if let Some(tx) = self.cmd_tx.read().as_ref() {
            let _ = tx.send(FeedCommand::Disconnect);
        }
    }

    fn fail_pending(&self, _error: FeedError) {
        let mut pending = self.pending_history.write();
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(FeedError::NotConnected));
        }
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.listeners.read().keys().cloned().collect()
    }
}

impl FeedAdapter for WsFeedClient {
    fn subscribe_ticks(&self, symbol: &str, listener_id: &str) {
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(symbol.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(listener_id.to_string());
        drop(listeners);

        if first {
            debug!(symbol = symbol, "Opening wire tick subscription");
            if let Ok(payload) = serde_json::to_string(&OutboundMessage::Subscribe { symbol }) {
                if let Err(e) = self.send_command(payload) {
                    // The subscription replays on the next connect.
                    debug!(symbol = symbol, error = %e, "Subscribe deferred");
                }
            }
        }
    }

    fn unsubscribe_ticks(&self, symbol: &str, listener_id: &str) {
        let mut listeners = self.listeners.write();
        let last = match listeners.get_mut(symbol) {
            Some(entry) => {
                entry.remove(listener_id);
                entry.is_empty()
            }
            None => false,
        };
        if last {
            listeners.remove(symbol);
        }
        drop(listeners);

        if last {
            debug!(symbol = symbol, "Releasing wire tick subscription");
            if let Ok(payload) = serde_json::to_string(&OutboundMessage::Unsubscribe { symbol }) {
                let _ = self.send_command(payload);
            }
        }
    }

    fn fetch_candle_history(
        &self,
        symbol: &str,
        granularity_secs: i64,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, FeedError>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = oneshot::channel();
            self.pending_history.write().insert(req_id, tx);

            let payload = serde_json::to_string(&OutboundMessage::History {
                req_id,
                symbol: &symbol,
                granularity: granularity_secs,
                count,
            })?;
            if let Err(e) = self.send_command(payload) {
                self.pending_history.write().remove(&req_id);
                return Err(e);
            }

            let timeout = std::time::Duration::from_secs(self.config.request_timeout_seconds);
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(FeedError::ChannelClosed),
                Err(_) => {
                    self.pending_history.write().remove(&req_id);
                    Err(FeedError::Timeout(self.config.request_timeout_seconds))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventBus;

    fn make_client() -> Arc<WsFeedClient> {
        let bus = Arc::new(EventBus::new());
        Arc::new(WsFeedClient::new(FeedConfig::default(), bus))
    }

    #[test]
    fn test_initial_state() {
        let client = make_client();
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.messages_received(), 0);
    }

    #[test]
    fn test_subscription_multiplexing() {
        let client = make_client();
        client.subscribe_ticks("EURUSD", "session-1");
        client.subscribe_ticks("EURUSD", "session-2");
        assert_eq!(client.active_symbols(), vec!["EURUSD".to_string()]);

        // First unsubscribe keeps the wire subscription alive.
        client.unsubscribe_ticks("EURUSD", "session-1");
        assert_eq!(client.active_symbols().len(), 1);

        // Last unsubscribe releases it.
        client.unsubscribe_ticks("EURUSD", "session-2");
        assert!(client.active_symbols().is_empty());
    }

    #[test]
    fn test_backoff_delay_growth() {
        let client = make_client();
        let first = client.backoff_delay(1);
        let second = client.backoff_delay(2);
        let tenth = client.backoff_delay(10);
        assert_eq!(first, 5);
        assert!(second >= first);
        assert!(tenth <= FeedConfig::default().reconnect_delay_cap_seconds);
    }

    #[test]
    fn test_tick_message_published() {
        let bus = Arc::new(EventBus::new());
        let client = WsFeedClient::new(FeedConfig::default(), Arc::clone(&bus));

        let received = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&received);
        bus.ticks.subscribe(move |tick: &Tick| {
            sink.write().push(tick.clone());
        });

        client.handle_message(r#"{"type":"tick","symbol":"EURUSD","price":1.25,"epoch":1000}"#);

        let ticks = received.read();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].price, 1.25);
        assert_eq!(ticks[0].epoch, 1000);
    }

    #[test]
    fn test_malformed_message_dropped() {
        let client = make_client();
        client.handle_message("not json at all");
        client.handle_message(r#"{"type":"unknown_kind"}"#);
        assert_eq!(client.messages_received(), 2);
    }

    #[tokio::test]
    async fn test_history_without_connection_fails() {
        let client = make_client();
        let result = client.fetch_candle_history("EURUSD", 60, 300).await;
        assert!(matches!(result, Err(FeedError::NotConnected)));
    }

    #[test]
    fn test_wire_candle_conversion() {
        let wire = WireCandle {
            symbol: "EURUSD".to_string(),
            granularity: 60,
            open: 1.0,
            high: 1.2,
            low: 0.9,
            close: 1.1,
            epoch: 600,
            tick_count: 0,
        };
        let candle = wire.into_candle();
        assert_eq!(candle.start_epoch, 600);
        assert!(!candle.is_forming);
        assert_eq!(candle.tick_count, 1);
    }
}
