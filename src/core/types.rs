// Core Type Definitions for Signal Foundry
// Shared vocabulary for the tick -> candle -> signal -> outcome pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

/// Directional trade signal emitted at candle close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalDirection {
    Call,
    Put,
    NoTrade,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalDirection::Call => write!(f, "CALL"),
            SignalDirection::Put => write!(f, "PUT"),
            SignalDirection::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

impl SignalDirection {
    pub fn is_directional(&self) -> bool {
        !matches!(self, SignalDirection::NoTrade)
    }
}

/// A single indicator's or strategy's opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteDirection {
    Up,
    Down,
    Neutral,
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteDirection::Up => write!(f, "UP"),
            VoteDirection::Down => write!(f, "DOWN"),
            VoteDirection::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

impl VoteDirection {
    pub fn as_signal(&self) -> SignalDirection {
        match self {
            VoteDirection::Up => SignalDirection::Call,
            VoteDirection::Down => SignalDirection::Put,
            VoteDirection::Neutral => SignalDirection::NoTrade,
        }
    }

    pub fn opposite(&self) -> VoteDirection {
        match self {
            VoteDirection::Up => VoteDirection::Down,
            VoteDirection::Down => VoteDirection::Up,
            VoteDirection::Neutral => VoteDirection::Neutral,
        }
    }
}

/// Resolution of a pending signal at expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Loss,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
        }
    }
}

/// Coarse confidence class produced by the ML ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    Premium,
    Standard,
    Low,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceTier::Premium => write!(f, "PREMIUM"),
            ConfidenceTier::Standard => write!(f, "STANDARD"),
            ConfidenceTier::Low => write!(f, "LOW"),
        }
    }
}

/// Candle-psychology bias classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Stopped,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Tick
// ============================================================================

/// A single price observation from the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub epoch: i64, // seconds
}

impl Tick {
    pub fn new(symbol: impl Into<String>, price: f64, epoch: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            epoch,
        }
    }

    /// Invalid ticks (non-positive or non-finite price) are dropped
    /// by the aggregator before they reach any candle.
    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick(symbol={}, price={:.5}, epoch={})",
            self.symbol, self.price, self.epoch
        )
    }
}

// ============================================================================
// Candle
// ============================================================================

/// Fixed-duration OHLC candle. `start_epoch` is always a multiple of
/// `timeframe_secs`; a closed candle is never mutated again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe_secs: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub start_epoch: i64,
    pub tick_count: u64,
    pub is_forming: bool,
}

impl Candle {
    /// Allocate a forming candle from the first tick of an interval.
    pub fn from_tick(tick: &Tick, timeframe_secs: i64) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timeframe_secs,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            start_epoch: interval_start(tick.epoch, timeframe_secs),
            tick_count: 1,
            is_forming: true,
        }
    }

    /// Fold a further tick of the same interval into the forming candle.
    pub fn apply_tick(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.tick_count += 1;
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Body as a fraction of the full range; 0 when the range is degenerate.
    pub fn body_pct(&self) -> f64 {
        if self.range() > 0.0 {
            self.body() / self.range()
        } else {
            0.0
        }
    }

    pub fn end_epoch(&self) -> i64 {
        self.start_epoch + self.timeframe_secs
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle(symbol={}, tf={}s, start={}, O={:.5}, H={:.5}, L={:.5}, C={:.5}, ticks={}{})",
            self.symbol,
            self.timeframe_secs,
            self.start_epoch,
            self.open,
            self.high,
            self.low,
            self.close,
            self.tick_count,
            if self.is_forming { ", forming" } else { "" }
        )
    }
}

/// Boundary arithmetic shared by the aggregator and the tests:
/// the interval containing `epoch` starts at floor(epoch / tf) * tf.
pub fn interval_start(epoch: i64, timeframe_secs: i64) -> i64 {
    (epoch / timeframe_secs) * timeframe_secs
}

// ============================================================================
// Vote
// ============================================================================

/// Weighted directional opinion from one indicator or strategy head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub indicator: String,
    pub direction: VoteDirection,
    pub weight: f64,
    pub reason: String,
}

impl Vote {
    pub fn new(
        indicator: impl Into<String>,
        direction: VoteDirection,
        weight: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            indicator: indicator.into(),
            direction,
            weight: weight.max(0.0),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote({} {} w={:.2}: {})",
            self.indicator, self.direction, self.weight, self.reason
        )
    }
}

// ============================================================================
// Pattern Hit & Psychology
// ============================================================================

/// A detected candlestick / chart / harmonic pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternHit {
    pub name: String,
    pub direction: VoteDirection,
    pub strength: f64, // 0.5 - 2.5, scaled by match quality
    pub reason: String,
}

impl PatternHit {
    pub fn new(
        name: impl Into<String>,
        direction: VoteDirection,
        strength: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            strength: strength.clamp(0.5, 2.5),
            reason: reason.into(),
        }
    }

    pub fn as_vote(&self) -> Vote {
        Vote::new(
            self.name.clone(),
            self.direction,
            self.strength,
            self.reason.clone(),
        )
    }
}

/// Candle-psychology record derived from the last few candles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsychologyAnalysis {
    pub body_ratio: f64,
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
    pub is_doji: bool,
    pub patterns: Vec<PatternHit>,
    pub bias: Bias,
    pub order_block_probability: f64, // 0..1
    pub fvg_detected: bool,
}

impl Default for PsychologyAnalysis {
    fn default() -> Self {
        Self {
            body_ratio: 0.0,
            upper_wick_ratio: 0.0,
            lower_wick_ratio: 0.0,
            is_doji: false,
            patterns: Vec::new(),
            bias: Bias::Neutral,
            order_block_probability: 0.0,
            fvg_detected: false,
        }
    }
}

// ============================================================================
// SignalResult
// ============================================================================

/// Complete output of one signal-generation cycle for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalResult {
    pub session_id: String,
    pub symbol: String,
    pub timeframe_secs: i64,
    pub timestamp: i64,
    pub candle_close_time: i64,
    pub direction: SignalDirection,
    pub confidence: f64, // 0..100
    pub p_up: f64,       // 0..1
    pub p_down: f64,     // 1 - p_up
    pub votes: Vec<Vote>,
    pub indicators: crate::analytics::indicators::IndicatorValues,
    pub psychology: PsychologyAnalysis,
    pub volatility_override: bool,
    pub volatility_reason: Option<String>,
    pub closed_candles_count: usize,
    pub forming_candle: Option<Candle>,
    pub entry_price: Option<f64>,
    pub suggested_direction: Option<SignalDirection>,
    pub is_low_confidence: bool,
    /// Feature snapshot captured at generation time; carried into the
    /// PendingSignal so outcome feedback needs no shared mutable state.
    pub feature_vector: Vec<f64>,
}

impl SignalResult {
    /// A refusal with zero confidence, used when history is insufficient
    /// or a gate vetoes the cycle before scoring.
    pub fn no_trade(
        session_id: impl Into<String>,
        symbol: impl Into<String>,
        timeframe_secs: i64,
        timestamp: i64,
        candle_close_time: i64,
        closed_candles_count: usize,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            symbol: symbol.into(),
            timeframe_secs,
            timestamp,
            candle_close_time,
            direction: SignalDirection::NoTrade,
            confidence: 0.0,
            p_up: 0.5,
            p_down: 0.5,
            votes: Vec::new(),
            indicators: Default::default(),
            psychology: Default::default(),
            volatility_override: false,
            volatility_reason: None,
            closed_candles_count,
            forming_candle: None,
            entry_price: None,
            suggested_direction: None,
            is_low_confidence: false,
            feature_vector: Vec::new(),
        }
    }

    pub fn with_veto(mut self, reason: impl Into<String>) -> Self {
        self.volatility_override = true;
        self.volatility_reason = Some(reason.into());
        self
    }
}

impl fmt::Display for SignalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalResult(session={}, symbol={}, dir={}, conf={:.1}, p_up={:.3})",
            self.session_id, self.symbol, self.direction, self.confidence, self.p_up
        )
    }
}

// ============================================================================
// Session
// ============================================================================

/// Per-session user preferences supplied by the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPreferences {
    pub timezone: String,
    pub confidence_filter: u8, // 80 | 90 | 95
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            confidence_filter: 80,
        }
    }
}

/// One user session: a (chat, symbol, timeframe) triple receiving signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub timeframe_secs: i64,
    pub status: SessionStatus,
    pub started_at: i64,
    pub last_signal_at: Option<i64>,
    pub preferences: SessionPreferences,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session(id={}, chat={}, symbol={}, tf={}s, status={})",
            self.id, self.chat_id, self.symbol, self.timeframe_secs, self.status
        )
    }
}

// ============================================================================
// PendingSignal
// ============================================================================

/// A directional signal awaiting resolution at its expiry epoch.
/// Carries the ML feature snapshot captured at emission so the outcome
/// can be fed back to the ensemble without any shared mutable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignal {
    pub key: String,
    pub session_id: String,
    pub chat_id: i64,
    pub symbol: String,
    pub timeframe_secs: i64,
    pub direction: SignalDirection,
    pub confidence: f64,
    pub entry_price: f64,
    pub expiry_epoch: i64,
    pub features: Vec<f64>,
}

impl fmt::Display for PendingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PendingSignal(key={}, symbol={}, dir={}, entry={:.5}, expiry={})",
            self.key, self.symbol, self.direction, self.entry_price, self.expiry_epoch
        )
    }
}

// ============================================================================
// SessionStats
// ============================================================================

/// Win/loss record accumulated per session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub wins: u64,
    pub losses: u64,
    pub total_signals: u64,
}

impl SessionStats {
    pub fn record(&mut self, outcome: Outcome) {
        self.total_signals += 1;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
        }
    }

    /// Win rate in percent; 0 when no signals resolved yet.
    pub fn win_rate(&self) -> f64 {
        if self.total_signals == 0 {
            0.0
        } else {
            self.wins as f64 / self.total_signals as f64 * 100.0
        }
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionStats(wins={}, losses={}, win_rate={:.1}%)",
            self.wins,
            self.losses,
            self.win_rate()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_start() {
        assert_eq!(interval_start(1000, 60), 960);
        assert_eq!(interval_start(1020, 60), 1020);
        assert_eq!(interval_start(1079, 60), 1020);
        assert_eq!(interval_start(1500, 300), 1500);
    }

    #[test]
    fn test_tick_validity() {
        assert!(Tick::new("EURUSD", 1.1, 100).is_valid());
        assert!(!Tick::new("EURUSD", 0.0, 100).is_valid());
        assert!(!Tick::new("EURUSD", -5.0, 100).is_valid());
        assert!(!Tick::new("EURUSD", f64::NAN, 100).is_valid());
        assert!(!Tick::new("EURUSD", f64::INFINITY, 100).is_valid());
    }

    #[test]
    fn test_candle_from_tick() {
        let tick = Tick::new("EURUSD", 1.25, 1000);
        let candle = Candle::from_tick(&tick, 60);
        assert_eq!(candle.start_epoch, 960);
        assert_eq!(candle.open, 1.25);
        assert_eq!(candle.high, 1.25);
        assert_eq!(candle.low, 1.25);
        assert_eq!(candle.close, 1.25);
        assert_eq!(candle.tick_count, 1);
        assert!(candle.is_forming);
    }

    #[test]
    fn test_candle_apply_tick() {
        let tick = Tick::new("EURUSD", 1.25, 1000);
        let mut candle = Candle::from_tick(&tick, 60);
        candle.apply_tick(1.30);
        candle.apply_tick(1.20);
        assert_eq!(candle.high, 1.30);
        assert_eq!(candle.low, 1.20);
        assert_eq!(candle.close, 1.20);
        assert_eq!(candle.tick_count, 3);
        assert!(candle.low <= candle.open.min(candle.close));
        assert!(candle.high >= candle.open.max(candle.close));
    }

    #[test]
    fn test_candle_anatomy() {
        let candle = Candle {
            symbol: "EURUSD".to_string(),
            timeframe_secs: 60,
            open: 1.0,
            high: 1.5,
            low: 0.8,
            close: 1.2,
            start_epoch: 0,
            tick_count: 4,
            is_forming: false,
        };
        assert!((candle.body() - 0.2).abs() < 1e-12);
        assert!((candle.upper_wick() - 0.3).abs() < 1e-12);
        assert!((candle.lower_wick() - 0.2).abs() < 1e-12);
        assert!((candle.range() - 0.7).abs() < 1e-12);
        assert!(candle.is_bullish());
    }

    #[test]
    fn test_session_stats() {
        let mut stats = SessionStats::default();
        stats.record(Outcome::Win);
        assert_eq!(stats.total_signals, 1);
        assert_eq!(stats.win_rate(), 100.0);
        stats.record(Outcome::Loss);
        assert_eq!(stats.win_rate(), 50.0);
    }

    #[test]
    fn test_display_traits() {
        assert_eq!(format!("{}", SignalDirection::Call), "CALL");
        assert_eq!(format!("{}", SignalDirection::NoTrade), "NO_TRADE");
        assert_eq!(format!("{}", VoteDirection::Up), "UP");
        assert_eq!(format!("{}", Outcome::Win), "WIN");
        assert_eq!(format!("{}", ConfidenceTier::Premium), "PREMIUM");
    }
}
