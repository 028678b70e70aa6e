// End-to-End Flow Tests for Signal Foundry
//
// These tests exercise the full pipeline without network connections:
//   Ticks -> CandleAggregator -> SessionManager -> SignalEngine
//   -> candle close signals -> WinLossTracker -> trade results
//
// Run with: cargo test --test e2e_flow_test

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;

use signal_foundry::analytics::engine::SignalEngine;
use signal_foundry::analytics::ml::MlEnsemble;
use signal_foundry::analytics::thresholds::{AdaptiveThresholds, ThresholdSet};
use signal_foundry::analytics::volatility::VolatilityCache;
use signal_foundry::core::config::{EngineConfig, FeedConfig, SessionOptions};
use signal_foundry::core::events::{
    CandleCloseSignal, CandleEvent, CandlePhase, EventBus, TradeResult,
};
use signal_foundry::core::types::{
    Candle, Outcome, SessionPreferences, SignalDirection, Tick,
};
use signal_foundry::feed::{FeedAdapter, FeedError};
use signal_foundry::market::{CandleAggregator, PriceCache};
use signal_foundry::session::{SessionManager, WinLossTracker};

// ============================================================================
// Helpers
// ============================================================================

/// Canned-history feed; no sockets involved.
struct StaticFeed {
    history: Vec<Candle>,
}

impl FeedAdapter for StaticFeed {
    fn subscribe_ticks(&self, _symbol: &str, _listener_id: &str) {}

    fn unsubscribe_ticks(&self, _symbol: &str, _listener_id: &str) {}

    fn fetch_candle_history(
        &self,
        _symbol: &str,
        _granularity_secs: i64,
        _count: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, FeedError>> {
        let history = self.history.clone();
        Box::pin(async move { Ok(history) })
    }
}

fn make_candle(open: f64, high: f64, low: f64, close: f64, epoch: i64) -> Candle {
    Candle {
        symbol: "EURUSD".to_string(),
        timeframe_secs: 60,
        open,
        high,
        low,
        close,
        start_epoch: epoch,
        tick_count: 10,
        is_forming: false,
    }
}

/// Gently rising one-minute history starting at epoch 0.
fn drifting_history(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let base = 100.0 + i as f64 * 0.05;
            make_candle(base, base + 0.06, base - 0.02, base + 0.045, i as i64 * 60)
        })
        .collect()
}

struct World {
    bus: Arc<EventBus>,
    aggregator: Arc<CandleAggregator>,
    manager: Arc<SessionManager>,
    tracker: Arc<WinLossTracker>,
    price_cache: Arc<PriceCache>,
    ensemble: Arc<RwLock<MlEnsemble>>,
    thresholds: Arc<RwLock<AdaptiveThresholds>>,
}

fn build_world(history: Vec<Candle>) -> World {
    let bus = Arc::new(EventBus::new());
    let aggregator = Arc::new(CandleAggregator::new(Arc::clone(&bus)));
    let price_cache = Arc::new(PriceCache::new());
    let volatility_cache = Arc::new(VolatilityCache::new());
    let ensemble = Arc::new(RwLock::new(MlEnsemble::new()));
    let thresholds = Arc::new(RwLock::new(AdaptiveThresholds::new(ThresholdSet::default())));

    let engine = Arc::new(SignalEngine::with_state(
        EngineConfig::default(),
        Arc::clone(&ensemble),
        Arc::clone(&thresholds),
        Arc::clone(&volatility_cache),
    ));

    let feed = Arc::new(StaticFeed { history });
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&aggregator),
        engine,
        feed as Arc<dyn FeedAdapter>,
        Arc::clone(&bus),
        Arc::clone(&price_cache),
        FeedConfig::default(),
    ));
    manager.attach();

    let tracker = Arc::new(WinLossTracker::new(
        Arc::clone(&price_cache),
        Arc::clone(&volatility_cache),
        Arc::clone(&ensemble),
        Arc::clone(&thresholds),
        Arc::clone(&bus),
    ));
    tracker.attach();

    World {
        bus,
        aggregator,
        manager,
        tracker,
        price_cache,
        ensemble,
        thresholds,
    }
}

fn collect_signals(bus: &Arc<EventBus>) -> Arc<RwLock<Vec<CandleCloseSignal>>> {
    let collected = Arc::new(RwLock::new(Vec::new()));
    let sink = Arc::clone(&collected);
    bus.signals.subscribe(move |event: &CandleCloseSignal| {
        sink.write().push(event.clone());
    });
    collected
}

fn collect_results(bus: &Arc<EventBus>) -> Arc<RwLock<Vec<TradeResult>>> {
    let collected = Arc::new(RwLock::new(Vec::new()));
    let sink = Arc::clone(&collected);
    bus.trade_results.subscribe(move |result: &TradeResult| {
        sink.write().push(result.clone());
    });
    collected
}

// ============================================================================
// TEST 1 - Aggregation: ticks to closed candles, replay-identical
// ============================================================================

#[test]
fn test_tick_aggregation_and_replay() {
    let bus = Arc::new(EventBus::new());
    let aggregator = CandleAggregator::new(Arc::clone(&bus));
    aggregator.initialize("EURUSD", 60, Vec::new(), 100);

    let closed = Arc::new(RwLock::new(Vec::new()));
    let sink = Arc::clone(&closed);
    bus.candles.subscribe(move |event: &CandleEvent| {
        if event.phase == CandlePhase::Closed {
            sink.write().push(event.candle.clone());
        }
    });

    // Three ticks in [960, 1020), then the boundary tick at 1020.
    aggregator.process_tick(&Tick::new("EURUSD", 99.0, 960), 60);
    aggregator.process_tick(&Tick::new("EURUSD", 100.5, 990), 60);
    aggregator.process_tick(&Tick::new("EURUSD", 98.7, 1019), 60);
    aggregator.process_tick(&Tick::new("EURUSD", 101.0, 1020), 60);

    {
        let closed = closed.read();
        assert_eq!(closed.len(), 1);
        let candle = &closed[0];
        assert_eq!(candle.start_epoch, 960);
        assert_eq!(candle.open, 99.0);
        assert_eq!(candle.high, 100.5);
        assert_eq!(candle.low, 98.7);
        assert_eq!(candle.close, 98.7);
        assert_eq!(candle.tick_count, 3);
        assert_eq!(candle.start_epoch % 60, 0);
    }

    let forming = aggregator.get_forming("EURUSD", 60).unwrap();
    assert_eq!(forming.start_epoch, 1020);
    assert_eq!(forming.open, 101.0);
}

// ============================================================================
// TEST 2 - Full session flow: history, ticks, one signal per candle
// ============================================================================

#[tokio::test]
async fn test_session_flow_emits_signal_on_close() {
    let world = build_world(drifting_history(120));
    let signals = collect_signals(&world.bus);

    world
        .manager
        .start(
            "session-1",
            42,
            "EURUSD",
            60,
            SessionPreferences::default(),
            SessionOptions::default(),
        )
        .await
        .unwrap();

    // History ends at candle [7140, 7200); cross one full interval.
    world.bus.ticks.publish(Tick::new("EURUSD", 106.02, 7200));
    world.bus.ticks.publish(Tick::new("EURUSD", 106.08, 7220));
    world.bus.ticks.publish(Tick::new("EURUSD", 106.05, 7259));
    world.bus.ticks.publish(Tick::new("EURUSD", 106.10, 7260));

    let signals = signals.read();
    assert_eq!(signals.len(), 1);
    let event = &signals[0];
    assert_eq!(event.session.id, "session-1");
    assert_eq!(event.signal.symbol, "EURUSD");
    assert_eq!(event.signal.timeframe_secs, 60);
    assert_eq!(event.signal.candle_close_time, 7260);
    assert_eq!(event.signal.closed_candles_count, 121);
    assert!((event.signal.p_up + event.signal.p_down - 1.0).abs() < 1e-9);
}

// ============================================================================
// TEST 3 - Insufficient history yields a zero-confidence refusal
// ============================================================================

#[tokio::test]
async fn test_insufficient_history_refusal() {
    let world = build_world(drifting_history(48));
    let signals = collect_signals(&world.bus);

    world
        .manager
        .start(
            "session-1",
            42,
            "EURUSD",
            60,
            SessionPreferences::default(),
            SessionOptions::default(),
        )
        .await
        .unwrap();

    // History ends at candle [2820, 2880); one more close leaves 49 candles.
    world.bus.ticks.publish(Tick::new("EURUSD", 102.5, 2880));
    world.bus.ticks.publish(Tick::new("EURUSD", 102.6, 2940));

    let signals = signals.read();
    assert_eq!(signals.len(), 1);
    let signal = &signals[0].signal;
    assert_eq!(signal.direction, SignalDirection::NoTrade);
    assert_eq!(signal.confidence, 0.0);
    assert_eq!(signal.closed_candles_count, 49);
    assert!(signal.votes.is_empty());
    assert!(!signal.volatility_override);
}

// ============================================================================
// TEST 4 - Duplicate closed events produce exactly one signal
// ============================================================================

#[tokio::test]
async fn test_duplicate_candle_guard() {
    let world = build_world(drifting_history(120));
    let signals = collect_signals(&world.bus);

    world
        .manager
        .start(
            "session-1",
            42,
            "EURUSD",
            60,
            SessionPreferences::default(),
            SessionOptions::default(),
        )
        .await
        .unwrap();

    let event = CandleEvent {
        phase: CandlePhase::Closed,
        symbol: "EURUSD".to_string(),
        timeframe_secs: 60,
        candle: make_candle(106.0, 106.1, 105.9, 106.05, 7200),
    };
    world.bus.candles.publish(event.clone());
    world.bus.candles.publish(event);

    assert_eq!(signals.read().len(), 1);
}

// ============================================================================
// TEST 5 - Win/loss resolution drives stats and learner updates
// ============================================================================

#[tokio::test]
async fn test_win_loss_resolution_flow() {
    let world = build_world(drifting_history(120));
    let results = collect_results(&world.bus);

    // Inject a directional signal through the bus, as the manager would.
    let mut signal = signal_foundry::core::types::SignalResult::no_trade(
        "session-1",
        "EURUSD",
        60,
        7200,
        7200,
        120,
    );
    signal.direction = SignalDirection::Call;
    signal.confidence = 80.0;
    signal.entry_price = Some(1.2500);
    signal.feature_vector = vec![0.1; signal_foundry::analytics::FEATURE_COUNT];

    let session = signal_foundry::core::types::Session {
        id: "session-1".to_string(),
        chat_id: 42,
        symbol: "EURUSD".to_string(),
        timeframe_secs: 60,
        status: signal_foundry::core::types::SessionStatus::Active,
        started_at: 0,
        last_signal_at: None,
        preferences: SessionPreferences::default(),
    };
    world
        .bus
        .signals
        .publish(CandleCloseSignal { session, signal });
    assert_eq!(world.tracker.pending_count(), 1);

    // Price at expiry (7200 + 60) is above the entry: the CALL wins.
    world.price_cache.record(&Tick::new("EURUSD", 1.2510, 7260));
    world.tracker.poll(7260);

    let results = results.read();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, Outcome::Win);
    assert_eq!(results[0].entry_price, 1.2500);
    assert_eq!(results[0].exit_price, 1.2510);
    assert_eq!(results[0].direction, SignalDirection::Call);

    let stats = world.tracker.session_stats("session-1");
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.losses, 0);
    assert_eq!(stats.total_signals, 1);
    assert_eq!(stats.win_rate(), 100.0);

    // The outcome reached both adaptive state holders.
    assert_eq!(world.ensemble.read().update_count(), 1);
    assert_eq!(world.thresholds.read().sample_count(), 1);

    // A second poll cannot resolve the same signal again.
    world.tracker.poll(7261);
    assert_eq!(world.tracker.resolved_count(), 1);
}

// ============================================================================
// TEST 6 - End-to-end: session, candle close, expiry, outcome
// ============================================================================

#[tokio::test]
async fn test_full_cycle_when_signal_is_directional() {
    let world = build_world(drifting_history(120));
    let signals = collect_signals(&world.bus);
    let results = collect_results(&world.bus);

    world
        .manager
        .start(
            "session-1",
            42,
            "EURUSD",
            60,
            SessionPreferences::default(),
            SessionOptions::default(),
        )
        .await
        .unwrap();

    // Drive several candle cycles through the live tick path.
    let mut price = 106.02;
    for interval in 0..5 {
        let start = 7200 + interval * 60;
        for step in 0..4 {
            price += 0.01;
            world
                .bus
                .ticks
                .publish(Tick::new("EURUSD", price, start + step * 15));
        }
    }

    let emitted = signals.read().clone();
    assert!(!emitted.is_empty());

    // Every directional signal must eventually resolve exactly once.
    let directional: Vec<_> = emitted
        .iter()
        .filter(|e| e.signal.direction.is_directional())
        .collect();
    let last_epoch = 7200 + 5 * 60 + 120;
    world.tracker.poll(last_epoch);
    let results = results.read();
    assert_eq!(results.len(), directional.len());

    // And no pending entry may survive past its expiry.
    assert_eq!(world.tracker.pending_count(), 0);

    // Aggregator invariants held throughout.
    let closed = world.aggregator.get_closed("EURUSD", 60);
    assert!(closed
        .windows(2)
        .all(|w| w[0].start_epoch < w[1].start_epoch));
    for candle in &closed {
        assert!(candle.low <= candle.open.min(candle.close));
        assert!(candle.high >= candle.open.max(candle.close));
        assert_eq!(candle.start_epoch % 60, 0);
    }
}
