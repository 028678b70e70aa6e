// Session Manager - session lifecycle and candle-close signal routing
// Owns the session table, wires tick fan-in to the aggregator, guards
// exactly-once emission per (session, candle), and post-filters signals
// before publishing them to the UI channel.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analytics::engine::SignalEngine;
use crate::analytics::{regime, volatility};
use crate::core::config::{FeedConfig, SessionOptions};
use crate::core::events::{
    CandleCloseSignal, CandleEvent, CandlePhase, EventBus, FeedEvent, SessionLifecycle,
    VolatilityWarning, WarningKind,
};
use crate::core::status::{BotStatus, VolatilityStatusEntry};
use crate::core::types::{
    Candle, Session, SessionPreferences, SessionStatus, SignalDirection, SignalResult, Tick,
};
use crate::feed::FeedAdapter;
use crate::market::{CandleAggregator, PriceCache};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session id already exists: {0}")]
    DuplicateId(String),
    #[error("active session already exists for chat {chat_id} on {symbol}/{timeframe_secs}s")]
    DuplicatePair {
        chat_id: i64,
        symbol: String,
        timeframe_secs: i64,
    },
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("feed error: {0}")]
    Feed(#[from] crate::feed::FeedError),
}

// ============================================================================
// Session Manager
// ============================================================================

struct SessionEntry {
    session: Session,
    options: SessionOptions,
    last_signal_candle: Option<i64>,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    aggregator: Arc<CandleAggregator>,
    engine: Arc<SignalEngine>,
    feed: Arc<dyn FeedAdapter>,
    bus: Arc<EventBus>,
    price_cache: Arc<PriceCache>,
    feed_config: FeedConfig,
    signals_generated: RwLock<u64>,
}

impl SessionManager {
    pub fn new(
        aggregator: Arc<CandleAggregator>,
        engine: Arc<SignalEngine>,
        feed: Arc<dyn FeedAdapter>,
        bus: Arc<EventBus>,
        price_cache: Arc<PriceCache>,
        feed_config: FeedConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            aggregator,
            engine,
            feed,
            bus,
            price_cache,
            feed_config,
            signals_generated: RwLock::new(0),
        }
    }

    /// Wire the manager to the event bus: tick fan-in, candle-close
    /// routing, and feed reconnect re-hydration.
    pub fn attach(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        self.bus.ticks.subscribe(move |tick: &Tick| {
            manager.handle_tick(tick);
        });

        let manager = Arc::clone(self);
        self.bus.candles.subscribe(move |event: &CandleEvent| {
            if event.phase == CandlePhase::Closed {
                manager.handle_candle_close(event);
            }
        });

        let manager = Arc::clone(self);
        self.bus.feed.subscribe(move |event: &FeedEvent| {
            if matches!(event, FeedEvent::Connected) {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let manager = Arc::clone(&manager);
                    handle.spawn(async move {
                        manager.rehydrate_all().await;
                    });
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start a session: fetch history, seed the aggregator, subscribe to
    /// the symbol's tick stream, and mark the session active.
    pub async fn start(
        &self,
        session_id: &str,
        chat_id: i64,
        symbol: &str,
        timeframe_secs: i64,
        preferences: SessionPreferences,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        {
            let sessions = self.sessions.read();
            if sessions.contains_key(session_id) {
                return Err(SessionError::DuplicateId(session_id.to_string()));
            }
            let duplicate_pair = sessions.values().any(|entry| {
                entry.session.is_active()
                    && entry.session.chat_id == chat_id
                    && entry.session.symbol == symbol
                    && entry.session.timeframe_secs == timeframe_secs
            });
            if duplicate_pair {
                return Err(SessionError::DuplicatePair {
                    chat_id,
                    symbol: symbol.to_string(),
                    timeframe_secs,
                });
            }
        }

        let history = self
            .feed
            .fetch_candle_history(
                symbol,
                timeframe_secs,
                self.feed_config.history_candle_count,
            )
            .await?;
        let history_len = history.len();
        self.aggregator.initialize(
            symbol,
            timeframe_secs,
            history,
            self.engine.config().candle_capacity,
        );

        self.feed.subscribe_ticks(symbol, session_id);

        // Warn up front when the market is already volatile.
        let seeded = self.aggregator.get_closed(symbol, timeframe_secs);
        let analysis = volatility::analyze(&seeded);
        if analysis.is_volatile {
            self.bus.warnings.publish(VolatilityWarning {
                session_id: session_id.to_string(),
                symbol: symbol.to_string(),
                kind: WarningKind::PreSession,
                volatility_score: analysis.volatility_score,
                epoch: chrono::Utc::now().timestamp(),
            });
        }

        let session = Session {
            id: session_id.to_string(),
            chat_id,
            symbol: symbol.to_string(),
            timeframe_secs,
            status: SessionStatus::Active,
            started_at: chrono::Utc::now().timestamp(),
            last_signal_at: None,
            preferences,
        };

        self.sessions.write().insert(
            session_id.to_string(),
            SessionEntry {
                session: session.clone(),
                options,
                last_signal_candle: None,
            },
        );

        info!(
            session_id = session_id,
            symbol = symbol,
            timeframe = timeframe_secs,
            history = history_len,
            "Session started"
        );
        self.bus
            .sessions
            .publish(SessionLifecycle::Started(session.clone()));
        Ok(session)
    }

    /// Start a session under a freshly generated id.
    pub async fn start_new(
        &self,
        chat_id: i64,
        symbol: &str,
        timeframe_secs: i64,
        preferences: SessionPreferences,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.start(
            &session_id,
            chat_id,
            symbol,
            timeframe_secs,
            preferences,
            options,
        )
        .await
    }

    /// Stop a session. Idempotent: duplicate stops are no-ops.
    pub fn stop(&self, session_id: &str) {
        let stopped = {
            let mut sessions = self.sessions.write();
            match sessions.get_mut(session_id) {
                Some(entry) if entry.session.is_active() => {
                    entry.session.status = SessionStatus::Stopped;
                    Some(entry.session.clone())
                }
                _ => None,
            }
        };

        let session = match stopped {
            Some(session) => session,
            None => return,
        };

        self.feed.unsubscribe_ticks(&session.symbol, session_id);

        // Release aggregator state only when no other active session
        // shares the (symbol, timeframe) pair.
        let pair_in_use = self.sessions.read().values().any(|entry| {
            entry.session.is_active()
                && entry.session.symbol == session.symbol
                && entry.session.timeframe_secs == session.timeframe_secs
        });
        if !pair_in_use {
            self.aggregator
                .cleanup(&session.symbol, session.timeframe_secs);
        }

        info!(session_id = session_id, "Session stopped");
        self.bus
            .sessions
            .publish(SessionLifecycle::Stopped(session));
    }

    /// Re-hydrate every active session after a feed reconnect.
    pub async fn rehydrate_all(&self) {
        let active: Vec<(String, String, i64)> = self
            .sessions
            .read()
            .values()
            .filter(|entry| entry.session.is_active())
            .map(|entry| {
                (
                    entry.session.id.clone(),
                    entry.session.symbol.clone(),
                    entry.session.timeframe_secs,
                )
            })
            .collect();

        for (session_id, symbol, timeframe_secs) in active {
            match self
                .feed
                .fetch_candle_history(
                    &symbol,
                    timeframe_secs,
                    self.feed_config.history_candle_count,
                )
                .await
            {
                Ok(history) => {
                    self.aggregator.initialize(
                        &symbol,
                        timeframe_secs,
                        history,
                        self.engine.config().candle_capacity,
                    );
                    self.feed.subscribe_ticks(&symbol, &session_id);
                    info!(session_id = %session_id, symbol = %symbol, "Session re-hydrated");
                }
                Err(e) => {
                    warn!(
                        session_id = %session_id,
                        symbol = %symbol,
                        error = %e,
                        "Re-hydration failed; session kept for next reconnect"
                    );
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    fn handle_tick(&self, tick: &Tick) {
        self.price_cache.record(tick);

        let timeframes: Vec<i64> = {
            let sessions = self.sessions.read();
            let mut timeframes: Vec<i64> = sessions
                .values()
                .filter(|entry| {
                    entry.session.is_active() && entry.session.symbol == tick.symbol
                })
                .map(|entry| entry.session.timeframe_secs)
                .collect();
            timeframes.sort_unstable();
            timeframes.dedup();
            timeframes
        };

        for timeframe in timeframes {
            self.aggregator.process_tick(tick, timeframe);
        }
    }

    fn handle_candle_close(&self, event: &CandleEvent) {
        // Claim the candle for every matching session under the write lock,
        // then generate outside it.
        let claimed: Vec<(Session, SessionOptions)> = {
            let mut sessions = self.sessions.write();
            sessions
                .values_mut()
                .filter(|entry| {
                    entry.session.is_active()
                        && entry.session.symbol == event.symbol
                        && entry.session.timeframe_secs == event.timeframe_secs
                        && entry.last_signal_candle != Some(event.candle.start_epoch)
                })
                .map(|entry| {
                    entry.last_signal_candle = Some(event.candle.start_epoch);
                    (entry.session.clone(), entry.options.clone())
                })
                .collect()
        };

        for (session, options) in claimed {
            // Invariant guard: the filter above matches on (symbol, tf);
            // anything else reaching here is a routing defect.
            if session.symbol != event.symbol || session.timeframe_secs != event.timeframe_secs
            {
                warn!(
                    session_id = %session.id,
                    symbol = %event.symbol,
                    "Signal/session mismatch; dropping candle close"
                );
                continue;
            }
            self.generate_for_session(&session, &options, &event.candle);
        }
    }

    fn generate_for_session(&self, session: &Session, options: &SessionOptions, candle: &Candle) {
        let closed = self
            .aggregator
            .get_closed(&session.symbol, session.timeframe_secs);
        let forming = self
            .aggregator
            .get_forming(&session.symbol, session.timeframe_secs);
        let candle_close_time = candle.end_epoch();

        let deadline = std::time::Duration::from_secs(
            self.engine
                .config()
                .generation_deadline_secs
                .min((session.timeframe_secs as u64 / 2).max(1)),
        );
        let started = std::time::Instant::now();

        let signal = self.engine.generate(
            &session.id,
            &session.symbol,
            session.timeframe_secs,
            &closed,
            forming.as_ref(),
            candle_close_time,
            options,
        );

        if started.elapsed() > deadline {
            warn!(
                session_id = %session.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Signal generation exceeded deadline; cycle cancelled"
            );
            return;
        }

        let signal = self.post_filter(session, signal, &closed, forming.as_ref());

        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(&session.id) {
                entry.session.last_signal_at = Some(candle_close_time);
            }
        }
        *self.signals_generated.write() += 1;

        let mut session = session.clone();
        session.last_signal_at = Some(candle_close_time);
        debug!(
            session_id = %session.id,
            direction = %signal.direction,
            confidence = signal.confidence,
            "Publishing candle close signal"
        );
        self.bus
            .signals
            .publish(CandleCloseSignal { session, signal });
    }

    /// Final veto chain between the engine and the publish.
    fn post_filter(
        &self,
        session: &Session,
        mut signal: SignalResult,
        closed: &[Candle],
        forming: Option<&Candle>,
    ) -> SignalResult {
        if !signal.direction.is_directional() {
            return signal;
        }

        let mut estimated: Vec<Candle> = closed.to_vec();
        if let Some(forming) = forming {
            estimated.push(forming.clone());
        }

        let verdict = volatility::should_no_trade(&estimated);
        if verdict.no_trade {
            signal.suggested_direction = Some(signal.direction);
            signal.direction = SignalDirection::NoTrade;
            signal.volatility_override = true;
            signal.volatility_reason = verdict.reason;
            return signal;
        }

        let regime_analysis = regime::detect(&estimated, &signal.indicators);
        if !regime_analysis.is_tradeable {
            signal.suggested_direction = Some(signal.direction);
            signal.direction = SignalDirection::NoTrade;
            signal.volatility_override = true;
            signal.volatility_reason =
                Some(format!("Untradeable regime: {}", regime_analysis.reason));
            return signal;
        }

        let filter = session.preferences.confidence_filter as f64;
        if signal.confidence < filter {
            signal.suggested_direction = Some(signal.direction);
            signal.direction = SignalDirection::NoTrade;
            signal.is_low_confidence = true;
            return signal;
        }

        signal
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    pub fn sessions_for_chat(&self, chat_id: i64) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|entry| entry.session.chat_id == chat_id)
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|entry| entry.session.is_active())
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|entry| entry.session.is_active())
            .count()
    }

    pub fn session_candles(&self, session_id: &str) -> Option<(Vec<Candle>, Option<Candle>)> {
        let session = self.get_session(session_id)?;
        Some((
            self.aggregator
                .get_closed(&session.symbol, session.timeframe_secs),
            self.aggregator
                .get_forming(&session.symbol, session.timeframe_secs),
        ))
    }

    pub fn signals_generated(&self) -> u64 {
        *self.signals_generated.read()
    }

    /// Status snapshot for the external HTTP layer.
    pub fn bot_status(
        &self,
        uptime_seconds: u64,
        total_users: u64,
        users_accepted_terms: u64,
    ) -> BotStatus {
        let cache = self.engine.volatility_cache();
        let volatility_data = cache
            .all()
            .into_iter()
            .map(|(symbol, analysis)| VolatilityStatusEntry {
                symbol,
                volatility_score: analysis.volatility_score,
                is_stable: analysis.is_stable(),
                severity: analysis.severity().to_string(),
            })
            .collect();

        BotStatus {
            status: "running".to_string(),
            uptime_seconds,
            total_users,
            active_sessions: self.active_count(),
            signals_generated: self.signals_generated(),
            users_accepted_terms,
            last_volatility_update: cache.last_update_epoch(),
            volatility_data,
        }
    }
}
