// Event System for Signal Foundry
// Central pub/sub bus with one typed channel per event family.
// Callbacks run synchronously inside publish(), so per-key ordering follows
// the publisher's ordering; broadcast receivers get the same sequence.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::core::types::{Candle, Outcome, Session, SignalDirection, SignalResult, Tick};

// ============================================================================
// Event Payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CandlePhase {
    Forming,
    Tick,
    Closed,
}

impl fmt::Display for CandlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Emitted by the candle aggregator: `Forming` on the first tick of an
/// interval, `Tick` on each further fold, `Closed` exactly once per boundary.
#[derive(Debug, Clone, Serialize)]
pub struct CandleEvent {
    pub phase: CandlePhase,
    pub symbol: String,
    pub timeframe_secs: i64,
    pub candle: Candle,
}

/// Published by the session manager after post-filtering.
#[derive(Debug, Clone, Serialize)]
pub struct CandleCloseSignal {
    pub session: Session,
    pub signal: SignalResult,
}

/// Published by the win/loss tracker when a pending signal resolves.
#[derive(Debug, Clone, Serialize)]
pub struct TradeResult {
    pub session_id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub direction: SignalDirection,
    pub outcome: Outcome,
    pub entry_price: f64,
    pub exit_price: f64,
    pub resolved_epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    PreSession,
    InSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolatilityWarning {
    pub session_id: String,
    pub symbol: String,
    pub kind: WarningKind,
    pub volatility_score: f64,
    pub epoch: i64,
}

#[derive(Debug, Clone, Serialize)]
pub enum SessionLifecycle {
    Started(Session),
    Stopped(Session),
}

/// Connection-level feed events. Tick fan-out has its own channel.
#[derive(Debug, Clone, Serialize)]
pub enum FeedEvent {
    Connected,
    Disconnected,
    /// Reconnect attempts exhausted; the feed will not recover on its own.
    Terminal,
}

// ============================================================================
// Channel
// ============================================================================

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// One typed event channel: synchronous callbacks plus a tokio broadcast
/// for async consumers. Modeled after a shared pub/sub bus with delivery
/// statistics.
pub struct Channel<T: Clone> {
    tx: broadcast::Sender<T>,
    callbacks: RwLock<Vec<Callback<T>>>,
    published: RwLock<u64>,
    delivered: RwLock<u64>,
}

impl<T: Clone> Channel<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            callbacks: RwLock::new(Vec::new()),
            published: RwLock::new(0),
            delivered: RwLock::new(0),
        }
    }

    /// Register a synchronous callback. Callbacks run inside `publish`
    /// on the publisher's task, preserving per-key ordering.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Get an async receiver for this channel.
    pub fn receiver(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: T) {
        *self.published.write() += 1;

        // Broadcast first; a send error just means no async receivers.
        let _ = self.tx.send(event.clone());

        let callbacks = self.callbacks.read();
        for callback in callbacks.iter() {
            callback(&event);
        }
        *self.delivered.write() += callbacks.len() as u64;
    }

    pub fn published_count(&self) -> u64 {
        *self.published.read()
    }

    pub fn delivered_count(&self) -> u64 {
        *self.delivered.read()
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().len()
    }
}

impl<T: Clone> Default for Channel<T> {
    fn default() -> Self {
        Self::new(4096)
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Process-wide bus holding every typed channel. The session manager and
/// the win/loss tracker communicate only through here, never directly.
pub struct EventBus {
    pub ticks: Channel<Tick>,
    pub candles: Channel<CandleEvent>,
    pub signals: Channel<CandleCloseSignal>,
    pub trade_results: Channel<TradeResult>,
    pub warnings: Channel<VolatilityWarning>,
    pub sessions: Channel<SessionLifecycle>,
    pub feed: Channel<FeedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            ticks: Channel::new(16384),
            candles: Channel::new(8192),
            signals: Channel::new(1024),
            trade_results: Channel::new(1024),
            warnings: Channel::new(1024),
            sessions: Channel::new(256),
            feed: Channel::new(64),
        }
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            ticks_published: self.ticks.published_count(),
            candles_published: self.candles.published_count(),
            signals_published: self.signals.published_count(),
            trade_results_published: self.trade_results.published_count(),
            warnings_published: self.warnings.published_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventBusStats {
    pub ticks_published: u64,
    pub candles_published: u64,
    pub signals_published: u64,
    pub trade_results_published: u64,
    pub warnings_published: u64,
}

// ============================================================================
// Global Event Bus (thread-safe singleton)
// ============================================================================

static GLOBAL_EVENT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Get global event bus instance (singleton).
pub fn get_event_bus() -> Arc<EventBus> {
    Arc::clone(GLOBAL_EVENT_BUS.get_or_init(|| Arc::new(EventBus::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Tick;

    #[test]
    fn test_channel_callback_delivery() {
        let channel: Channel<Tick> = Channel::new(16);
        let received = Arc::new(RwLock::new(Vec::new()));

        let sink = Arc::clone(&received);
        channel.subscribe(move |tick: &Tick| {
            sink.write().push(tick.price);
        });

        channel.publish(Tick::new("EURUSD", 1.1, 1));
        channel.publish(Tick::new("EURUSD", 1.2, 2));

        let prices = received.read();
        assert_eq!(prices.as_slice(), &[1.1, 1.2]);
        assert_eq!(channel.published_count(), 2);
        assert_eq!(channel.delivered_count(), 2);
    }

    #[test]
    fn test_channel_ordering_preserved() {
        let channel: Channel<Tick> = Channel::new(64);
        let received = Arc::new(RwLock::new(Vec::new()));

        let sink = Arc::clone(&received);
        channel.subscribe(move |tick: &Tick| {
            sink.write().push(tick.epoch);
        });

        for epoch in 0..50 {
            channel.publish(Tick::new("EURUSD", 1.0, epoch));
        }

        let epochs = received.read();
        let sorted: Vec<i64> = (0..50).collect();
        assert_eq!(epochs.as_slice(), sorted.as_slice());
    }

    #[tokio::test]
    async fn test_channel_broadcast_receiver() {
        let channel: Channel<Tick> = Channel::new(16);
        let mut rx = channel.receiver();

        channel.publish(Tick::new("EURUSD", 1.5, 10));

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.price, 1.5);
        assert_eq!(tick.epoch, 10);
    }

    #[test]
    fn test_bus_stats() {
        let bus = EventBus::new();
        bus.ticks.publish(Tick::new("EURUSD", 1.0, 0));
        let stats = bus.stats();
        assert_eq!(stats.ticks_published, 1);
        assert_eq!(stats.signals_published, 0);
    }
}
