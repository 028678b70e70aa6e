// Candle Aggregator - folds ticks into fixed-duration OHLC candles
// One series per (symbol, timeframe); emits forming/tick/closed events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::events::{CandleEvent, CandlePhase, EventBus};
use crate::core::types::{interval_start, Candle, Tick};

// ============================================================================
// Series Key & State
// ============================================================================

pub type SeriesKey = (String, i64);

/// Storage for one (symbol, timeframe) series: a bounded ring of closed
/// candles plus the current forming candle.
struct SeriesState {
    closed: VecDeque<Candle>,
    forming: Option<Candle>,
    capacity: usize,
    last_epoch: i64,

    // Statistics
    ticks_processed: u64,
    candles_closed: u64,
    dropped_out_of_order: u64,
    dropped_invalid: u64,
}

impl SeriesState {
    fn new(capacity: usize) -> Self {
        Self {
            closed: VecDeque::with_capacity(capacity),
            forming: None,
            capacity,
            last_epoch: i64::MIN,
            ticks_processed: 0,
            candles_closed: 0,
            dropped_out_of_order: 0,
            dropped_invalid: 0,
        }
    }

    fn push_closed(&mut self, candle: Candle) {
        if self.closed.len() >= self.capacity {
            self.closed.pop_front();
        }
        self.closed.push_back(candle);
        self.candles_closed += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesStats {
    pub symbol: String,
    pub timeframe_secs: i64,
    pub closed_count: usize,
    pub has_forming: bool,
    pub ticks_processed: u64,
    pub candles_closed: u64,
    pub dropped_out_of_order: u64,
    pub dropped_invalid: u64,
}

// ============================================================================
// Candle Aggregator
// ============================================================================

/// Exclusive owner of all candle storage. Callers read through snapshot
/// accessors only; `process_tick` must be invoked in epoch order per series
/// (the feed dispatch task is the single writer).
pub struct CandleAggregator {
    series: RwLock<HashMap<SeriesKey, SeriesState>>,
    bus: Arc<EventBus>,
}

impl CandleAggregator {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Seed a series with closed history. Forming candles and unsorted
    /// input are rejected from the seed; only the newest `capacity`
    /// candles are kept.
    pub fn initialize(
        &self,
        symbol: &str,
        timeframe_secs: i64,
        mut history: Vec<Candle>,
        capacity: usize,
    ) {
        history.retain(|c| !c.is_forming);
        history.sort_by_key(|c| c.start_epoch);
        history.dedup_by_key(|c| c.start_epoch);

        if history.len() > capacity {
            history.drain(..history.len() - capacity);
        }

        let mut state = SeriesState::new(capacity);
        state.last_epoch = history.last().map(|c| c.end_epoch()).unwrap_or(i64::MIN);
        state.closed = history.into();

        let mut series = self.series.write();
        series.insert((symbol.to_string(), timeframe_secs), state);

        debug!(symbol = symbol, timeframe = timeframe_secs, "Candle series initialized");
    }

    /// Fold one tick into its (symbol, timeframe) series.
    ///
    /// First tick of an interval allocates the forming candle; later ticks
    /// of the same interval update the OHLC envelope; a tick crossing the
    /// boundary freezes the forming candle, emits `Closed` exactly once,
    /// and starts the next forming candle from the crossing tick.
    pub fn process_tick(&self, tick: &Tick, timeframe_secs: i64) {
        // Events are emitted after the lock is released: close handlers
        // read back through the snapshot accessors.
        let mut emissions: Vec<(CandlePhase, Candle)> = Vec::new();

        {
            let key = (tick.symbol.clone(), timeframe_secs);
            let mut series = self.series.write();

            let state = match series.get_mut(&key) {
                Some(state) => state,
                None => {
                    warn!(
                        symbol = %tick.symbol,
                        timeframe = timeframe_secs,
                        "Tick for unknown series dropped"
                    );
                    return;
                }
            };

            if !tick.is_valid() {
                state.dropped_invalid += 1;
                return;
            }

            if tick.epoch < state.last_epoch {
                state.dropped_out_of_order += 1;
                return;
            }
            state.last_epoch = tick.epoch;
            state.ticks_processed += 1;

            let boundary = interval_start(tick.epoch, timeframe_secs);

            match state.forming.take() {
                None => {
                    let forming = Candle::from_tick(tick, timeframe_secs);
                    emissions.push((CandlePhase::Forming, forming.clone()));
                    state.forming = Some(forming);
                }
                Some(mut forming) => {
                    if boundary < forming.start_epoch {
                        // Late tick from an already-closed interval.
                        state.dropped_out_of_order += 1;
                        state.forming = Some(forming);
                        return;
                    }

                    if boundary == forming.start_epoch {
                        forming.apply_tick(tick.price);
                        emissions.push((CandlePhase::Tick, forming.clone()));
                        state.forming = Some(forming);
                    } else {
                        forming.is_forming = false;
                        emissions.push((CandlePhase::Closed, forming.clone()));
                        state.push_closed(forming);

                        let next = Candle::from_tick(tick, timeframe_secs);
                        emissions.push((CandlePhase::Forming, next.clone()));
                        state.forming = Some(next);
                    }
                }
            }
        }

        for (phase, candle) in emissions {
            self.emit(phase, &candle);
        }
    }

    fn emit(&self, phase: CandlePhase, candle: &Candle) {
        self.bus.candles.publish(CandleEvent {
            phase,
            symbol: candle.symbol.clone(),
            timeframe_secs: candle.timeframe_secs,
            candle: candle.clone(),
        });
    }

    // ------------------------------------------------------------------
    // Snapshot accessors
    // ------------------------------------------------------------------

    /// Copy of all closed candles, oldest first.
    pub fn get_closed(&self, symbol: &str, timeframe_secs: i64) -> Vec<Candle> {
        let series = self.series.read();
        series
            .get(&(symbol.to_string(), timeframe_secs))
            .map(|s| s.closed.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Copy of the current forming candle, if any.
    pub fn get_forming(&self, symbol: &str, timeframe_secs: i64) -> Option<Candle> {
        let series = self.series.read();
        series
            .get(&(symbol.to_string(), timeframe_secs))
            .and_then(|s| s.forming.clone())
    }

    /// Copy of the newest `n` closed candles, oldest first.
    pub fn get_last_n(&self, symbol: &str, timeframe_secs: i64, n: usize) -> Vec<Candle> {
        let series = self.series.read();
        series
            .get(&(symbol.to_string(), timeframe_secs))
            .map(|s| {
                let skip = s.closed.len().saturating_sub(n);
                s.closed.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn has_series(&self, symbol: &str, timeframe_secs: i64) -> bool {
        self.series
            .read()
            .contains_key(&(symbol.to_string(), timeframe_secs))
    }

    /// Release all state for a series.
    pub fn cleanup(&self, symbol: &str, timeframe_secs: i64) {
        let removed = self
            .series
            .write()
            .remove(&(symbol.to_string(), timeframe_secs));
        if removed.is_some() {
            debug!(symbol = symbol, timeframe = timeframe_secs, "Candle series released");
        }
    }

    pub fn get_stats(&self, symbol: &str, timeframe_secs: i64) -> Option<SeriesStats> {
        let series = self.series.read();
        series
            .get(&(symbol.to_string(), timeframe_secs))
            .map(|s| SeriesStats {
                symbol: symbol.to_string(),
                timeframe_secs,
                closed_count: s.closed.len(),
                has_forming: s.forming.is_some(),
                ticks_processed: s.ticks_processed,
                candles_closed: s.candles_closed,
                dropped_out_of_order: s.dropped_out_of_order,
                dropped_invalid: s.dropped_invalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventBus;
    use std::sync::Arc;

    fn make_aggregator() -> (CandleAggregator, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        (CandleAggregator::new(Arc::clone(&bus)), bus)
    }

    fn collect_closed(bus: &Arc<EventBus>) -> Arc<RwLock<Vec<Candle>>> {
        let closed = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&closed);
        bus.candles.subscribe(move |event: &CandleEvent| {
            if event.phase == CandlePhase::Closed {
                sink.write().push(event.candle.clone());
            }
        });
        closed
    }

    #[test]
    fn test_clean_aggregation_sequence() {
        let (agg, bus) = make_aggregator();
        let closed = collect_closed(&bus);

        agg.initialize("EURUSD", 60, Vec::new(), 100);

        // Three ticks inside [960, 1020), then a boundary crossing at 1020.
        agg.process_tick(&Tick::new("EURUSD", 99.0, 960), 60);
        agg.process_tick(&Tick::new("EURUSD", 100.5, 990), 60);
        agg.process_tick(&Tick::new("EURUSD", 98.7, 1019), 60);
        agg.process_tick(&Tick::new("EURUSD", 101.0, 1020), 60);

        let closed = closed.read();
        assert_eq!(closed.len(), 1);
        let candle = &closed[0];
        assert_eq!(candle.start_epoch, 960);
        assert_eq!(candle.open, 99.0);
        assert_eq!(candle.high, 100.5);
        assert_eq!(candle.low, 98.7);
        assert_eq!(candle.close, 98.7);
        assert_eq!(candle.tick_count, 3);
        assert!(!candle.is_forming);

        let forming = agg.get_forming("EURUSD", 60).unwrap();
        assert_eq!(forming.start_epoch, 1020);
        assert_eq!(forming.open, 101.0);
        assert_eq!(forming.tick_count, 1);
    }

    #[test]
    fn test_boundary_tick_starts_new_candle() {
        let (agg, _bus) = make_aggregator();
        agg.initialize("EURUSD", 60, Vec::new(), 100);

        agg.process_tick(&Tick::new("EURUSD", 1.0, 0), 60);
        // Epoch exactly at the next boundary must open a fresh candle.
        agg.process_tick(&Tick::new("EURUSD", 1.1, 60), 60);

        let closed = agg.get_closed("EURUSD", 60);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].start_epoch, 0);

        let forming = agg.get_forming("EURUSD", 60).unwrap();
        assert_eq!(forming.start_epoch, 60);
    }

    #[test]
    fn test_invalid_ticks_leave_state_unchanged() {
        let (agg, _bus) = make_aggregator();
        agg.initialize("EURUSD", 60, Vec::new(), 100);

        agg.process_tick(&Tick::new("EURUSD", 1.0, 10), 60);
        let before = agg.get_forming("EURUSD", 60).unwrap();

        agg.process_tick(&Tick::new("EURUSD", 0.0, 20), 60);
        agg.process_tick(&Tick::new("EURUSD", f64::NAN, 21), 60);
        agg.process_tick(&Tick::new("EURUSD", -3.0, 22), 60);

        let after = agg.get_forming("EURUSD", 60).unwrap();
        assert_eq!(before.tick_count, after.tick_count);
        assert_eq!(before.close, after.close);

        let stats = agg.get_stats("EURUSD", 60).unwrap();
        assert_eq!(stats.dropped_invalid, 3);
    }

    #[test]
    fn test_out_of_order_tick_dropped() {
        let (agg, _bus) = make_aggregator();
        agg.initialize("EURUSD", 60, Vec::new(), 100);

        agg.process_tick(&Tick::new("EURUSD", 1.0, 100), 60);
        agg.process_tick(&Tick::new("EURUSD", 2.0, 90), 60);

        let forming = agg.get_forming("EURUSD", 60).unwrap();
        assert_eq!(forming.tick_count, 1);
        assert_eq!(forming.close, 1.0);

        let stats = agg.get_stats("EURUSD", 60).unwrap();
        assert_eq!(stats.dropped_out_of_order, 1);
    }

    #[test]
    fn test_unknown_series_ignored() {
        let (agg, _bus) = make_aggregator();
        // No initialize: the tick must not implicitly create a series.
        agg.process_tick(&Tick::new("EURUSD", 1.0, 100), 60);
        assert!(!agg.has_series("EURUSD", 60));
    }

    #[test]
    fn test_capacity_eviction() {
        let (agg, _bus) = make_aggregator();
        agg.initialize("EURUSD", 60, Vec::new(), 3);

        // Produce 5 closed candles.
        for i in 0..6 {
            agg.process_tick(&Tick::new("EURUSD", 1.0 + i as f64, i * 60), 60);
        }

        let closed = agg.get_closed("EURUSD", 60);
        assert_eq!(closed.len(), 3);
        // Oldest evicted; start epochs strictly increasing.
        assert_eq!(closed[0].start_epoch, 120);
        assert!(closed.windows(2).all(|w| w[0].start_epoch < w[1].start_epoch));
    }

    #[test]
    fn test_initialize_truncates_and_sorts_history() {
        let (agg, _bus) = make_aggregator();

        let mut history = Vec::new();
        for i in (0..10).rev() {
            history.push(Candle {
                symbol: "EURUSD".to_string(),
                timeframe_secs: 60,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                start_epoch: i * 60,
                tick_count: 1,
                is_forming: false,
            });
        }
        agg.initialize("EURUSD", 60, history, 4);

        let closed = agg.get_closed("EURUSD", 60);
        assert_eq!(closed.len(), 4);
        assert_eq!(closed[0].start_epoch, 360);
        assert_eq!(closed[3].start_epoch, 540);
    }

    #[test]
    fn test_replay_reproduces_closes() {
        let ticks: Vec<Tick> = (0..300)
            .map(|i| Tick::new("EURUSD", 100.0 + ((i * 7) % 13) as f64 / 10.0, i * 10))
            .collect();

        let run = |ticks: &[Tick]| -> Vec<Candle> {
            let (agg, bus) = make_aggregator();
            let closed = collect_closed(&bus);
            agg.initialize("EURUSD", 60, Vec::new(), 500);
            for tick in ticks {
                agg.process_tick(tick, 60);
            }
            let out = closed.read().clone();
            out
        };

        let first = run(&ticks);
        let second = run(&ticks);
        assert!(!first.is_empty());
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.open, b.open);
            assert_eq!(a.high, b.high);
            assert_eq!(a.low, b.low);
            assert_eq!(a.close, b.close);
            assert_eq!(a.start_epoch, b.start_epoch);
            assert_eq!(a.tick_count, b.tick_count);
        }
    }

    #[test]
    fn test_get_last_n() {
        let (agg, _bus) = make_aggregator();
        agg.initialize("EURUSD", 60, Vec::new(), 100);
        for i in 0..5 {
            agg.process_tick(&Tick::new("EURUSD", 1.0, i * 60), 60);
        }
        let last = agg.get_last_n("EURUSD", 60, 2);
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].start_epoch, 120);
        assert_eq!(last[1].start_epoch, 180);
    }

    #[test]
    fn test_cleanup_releases_state() {
        let (agg, _bus) = make_aggregator();
        agg.initialize("EURUSD", 60, Vec::new(), 100);
        assert!(agg.has_series("EURUSD", 60));
        agg.cleanup("EURUSD", 60);
        assert!(!agg.has_series("EURUSD", 60));
    }
}
