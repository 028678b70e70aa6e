// Win/Loss Tracker - resolves pending signals at expiry
// Observes directional signals from the bus, re-samples price at expiry,
// feeds outcomes back into the ML ensemble and the adaptive thresholds,
// and keeps per-session statistics. No direct reference to the session
// manager: everything flows through the event bus.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::analytics::ml::MlEnsemble;
use crate::analytics::thresholds::AdaptiveThresholds;
use crate::analytics::volatility::VolatilityCache;
use crate::core::events::{
    CandleCloseSignal, EventBus, SessionLifecycle, TradeResult, VolatilityWarning, WarningKind,
};
use crate::core::types::{Outcome, PendingSignal, SessionStats, SignalDirection};
use crate::market::PriceCache;

const PROCESSED_CAPACITY: usize = 1000;
const WARNING_COOLDOWN_SECS: i64 = 60;
const MAX_WARNINGS_PER_SESSION: u32 = 3;
const WARNING_SCORE: f64 = 0.6;

// ============================================================================
// Tracker
// ============================================================================

struct TrackedSession {
    chat_id: i64,
    symbol: String,
}

pub struct WinLossTracker {
    pending: RwLock<HashMap<String, PendingSignal>>,
    processed: RwLock<(VecDeque<String>, HashSet<String>)>,
    stats: RwLock<HashMap<String, SessionStats>>,
    warnings: RwLock<HashMap<String, (u32, i64)>>,
    active_sessions: RwLock<HashMap<String, TrackedSession>>,

    price_cache: Arc<PriceCache>,
    volatility_cache: Arc<VolatilityCache>,
    ensemble: Arc<RwLock<MlEnsemble>>,
    thresholds: Arc<RwLock<AdaptiveThresholds>>,
    bus: Arc<EventBus>,

    resolved_count: RwLock<u64>,
    skipped_count: RwLock<u64>,
}

impl WinLossTracker {
    pub fn new(
        price_cache: Arc<PriceCache>,
        volatility_cache: Arc<VolatilityCache>,
        ensemble: Arc<RwLock<MlEnsemble>>,
        thresholds: Arc<RwLock<AdaptiveThresholds>>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            processed: RwLock::new((
                VecDeque::with_capacity(PROCESSED_CAPACITY),
                HashSet::new(),
            )),
            stats: RwLock::new(HashMap::new()),
            warnings: RwLock::new(HashMap::new()),
            active_sessions: RwLock::new(HashMap::new()),
            price_cache,
            volatility_cache,
            ensemble,
            thresholds,
            bus,
            resolved_count: RwLock::new(0),
            skipped_count: RwLock::new(0),
        }
    }

    /// Wire the tracker to the bus: directional signals become pending
    /// entries; session lifecycle keeps the warning loop's roster current.
    pub fn attach(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        self.bus.signals.subscribe(move |event: &CandleCloseSignal| {
            tracker.observe_signal(event);
        });

        let tracker = Arc::clone(self);
        self.bus.sessions.subscribe(move |event: &SessionLifecycle| {
            match event {
                SessionLifecycle::Started(session) => {
                    tracker.active_sessions.write().insert(
                        session.id.clone(),
                        TrackedSession {
                            chat_id: session.chat_id,
                            symbol: session.symbol.clone(),
                        },
                    );
                }
                SessionLifecycle::Stopped(session) => {
                    tracker.active_sessions.write().remove(&session.id);
                    tracker.warnings.write().remove(&session.id);
                }
            }
        });
    }

    /// Spawn the 1 s expiry poll loop and the 5 s volatility re-check loop.
    pub fn spawn_loops(self: &Arc<Self>) {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                interval.tick().await;
                let now = chrono::Utc::now().timestamp();
                tracker.poll(now);
            }
        });

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
            loop {
                interval.tick().await;
                let now = chrono::Utc::now().timestamp();
                tracker.volatility_recheck(now);
            }
        });
    }

    // ------------------------------------------------------------------
    // Signal intake
    // ------------------------------------------------------------------

    fn observe_signal(&self, event: &CandleCloseSignal) {
        let signal = &event.signal;
        if !signal.direction.is_directional() {
            return;
        }
        let entry_price = match signal.entry_price {
            Some(price) => price,
            None => {
                warn!(session_id = %signal.session_id, "Directional signal without entry price dropped");
                return;
            }
        };

        let key = format!("{}_{}", signal.session_id, signal.timestamp);
        let pending = PendingSignal {
            key: key.clone(),
            session_id: signal.session_id.clone(),
            chat_id: event.session.chat_id,
            symbol: signal.symbol.clone(),
            timeframe_secs: signal.timeframe_secs,
            direction: signal.direction,
            confidence: signal.confidence,
            entry_price,
            expiry_epoch: signal.candle_close_time + signal.timeframe_secs,
            features: signal.feature_vector.clone(),
        };

        debug!(key = %key, expiry = pending.expiry_epoch, "Pending signal recorded");
        self.pending.write().insert(key, pending);
    }

    // ------------------------------------------------------------------
    // Expiry resolution
    // ------------------------------------------------------------------

    /// Resolve every pending signal whose expiry has passed, in expiry
    /// order. Callable directly with an explicit clock for tests.
    pub fn poll(&self, now_epoch: i64) {
        let mut due: Vec<PendingSignal> = {
            let pending = self.pending.read();
            pending
                .values()
                .filter(|p| p.expiry_epoch <= now_epoch)
                .cloned()
                .collect()
        };
        due.sort_by_key(|p| p.expiry_epoch);

        for signal in due {
            self.resolve(signal, now_epoch);
        }
    }

    fn resolve(&self, signal: PendingSignal, now_epoch: i64) {
        // Duplicate-expiry guard: the processed set wins over the map.
        {
            let mut processed = self.processed.write();
            if processed.1.contains(&signal.key) {
                self.pending.write().remove(&signal.key);
                return;
            }
            if processed.0.len() >= PROCESSED_CAPACITY {
                if let Some(evicted) = processed.0.pop_front() {
                    processed.1.remove(&evicted);
                }
            }
            processed.0.push_back(signal.key.clone());
            processed.1.insert(signal.key.clone());
        }
        self.pending.write().remove(&signal.key);

        let exit = match self.price_cache.latest(&signal.symbol) {
            Some(cached) => cached.price,
            None => {
                warn!(
                    key = %signal.key,
                    symbol = %signal.symbol,
                    "No cached price at expiry; outcome skipped"
                );
                *self.skipped_count.write() += 1;
                return;
            }
        };

        // Ties count as losses.
        let went_up = exit > signal.entry_price;
        let won = match signal.direction {
            SignalDirection::Call => exit > signal.entry_price,
            SignalDirection::Put => exit < signal.entry_price,
            SignalDirection::NoTrade => return,
        };
        let outcome = if won { Outcome::Win } else { Outcome::Loss };

        // Feed the learners with the features captured at emission.
        if !signal.features.is_empty() {
            self.ensemble.write().update(&signal.features, went_up);
        }
        self.thresholds
            .write()
            .record_outcome(won, signal.confidence, now_epoch);

        {
            let mut stats = self.stats.write();
            stats
                .entry(signal.session_id.clone())
                .or_default()
                .record(outcome);
        }
        *self.resolved_count.write() += 1;

        info!(
            key = %signal.key,
            outcome = %outcome,
            entry = signal.entry_price,
            exit = exit,
            "Pending signal resolved"
        );
        self.bus.trade_results.publish(TradeResult {
            session_id: signal.session_id,
            chat_id: signal.chat_id,
            symbol: signal.symbol,
            direction: signal.direction,
            outcome,
            entry_price: signal.entry_price,
            exit_price: exit,
            resolved_epoch: now_epoch,
        });
    }

    // ------------------------------------------------------------------
    // Volatility re-check
    // ------------------------------------------------------------------

    /// Warn sessions whose symbol turned volatile mid-session; at most
    /// three warnings per session, one per minute.
    pub fn volatility_recheck(&self, now_epoch: i64) {
        let sessions: Vec<(String, i64, String)> = self
            .active_sessions
            .read()
            .iter()
            .map(|(id, tracked)| (id.clone(), tracked.chat_id, tracked.symbol.clone()))
            .collect();

        for (session_id, _chat_id, symbol) in sessions {
            let analysis = match self.volatility_cache.latest(&symbol) {
                Some(analysis) => analysis,
                None => continue,
            };
            if analysis.volatility_score <= WARNING_SCORE || analysis.is_stable() {
                continue;
            }

            let should_warn = {
                let warnings = self.warnings.read();
                match warnings.get(&session_id) {
                    Some(&(count, last)) => {
                        count < MAX_WARNINGS_PER_SESSION
                            && now_epoch - last > WARNING_COOLDOWN_SECS
                    }
                    None => true,
                }
            };
            if !should_warn {
                continue;
            }

            {
                let mut warnings = self.warnings.write();
                let entry = warnings.entry(session_id.clone()).or_insert((0, 0));
                entry.0 += 1;
                entry.1 = now_epoch;
            }

            self.bus.warnings.publish(VolatilityWarning {
                session_id: session_id.clone(),
                symbol: symbol.clone(),
                kind: WarningKind::InSession,
                volatility_score: analysis.volatility_score,
                epoch: now_epoch,
            });
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    pub fn session_stats(&self, session_id: &str) -> SessionStats {
        self.stats
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn resolved_count(&self) -> u64 {
        *self.resolved_count.read()
    }

    pub fn skipped_count(&self) -> u64 {
        *self.skipped_count.read()
    }
}
