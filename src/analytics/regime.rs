// Market Regime Detector - trending/ranging/choppy classification
// Swing structure, price-action quality, ADX tiers, and momentum alignment
// combine into a tradeability verdict and a confidence penalty.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analytics::indicators::{IndicatorValues, TrendSide};
use crate::core::types::{Candle, SignalDirection, VoteDirection};

const SWING_WINDOW: usize = 30;
const ADX_RANGING: f64 = 12.0;
const ADX_TRENDING: f64 = 18.0;
const ADX_STRONG: f64 = 25.0;
const MIN_TREND_DURATION: u32 = 2;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Choppy,
    Unknown,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceAction {
    Clean,
    Messy,
    Choppy,
}

impl fmt::Display for PriceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Complete regime verdict for one candle window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeAnalysis {
    pub regime: MarketRegime,
    pub strength: f64, // 0..1
    pub is_tradeable: bool,
    pub reason: String,
    pub trend_duration: u32,
    pub momentum_aligned: bool,
    pub volatility_level: VolatilityLevel,
    pub price_action: PriceAction,
    pub swings_confirmed: bool,
}

impl RegimeAnalysis {
    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            regime: MarketRegime::Unknown,
            strength: 0.0,
            is_tradeable: false,
            reason: reason.into(),
            trend_duration: 0,
            momentum_aligned: false,
            volatility_level: VolatilityLevel::Medium,
            price_action: PriceAction::Messy,
            swings_confirmed: false,
        }
    }

    pub fn is_ranging(&self) -> bool {
        self.regime == MarketRegime::Ranging
    }

    pub fn is_trending(&self) -> bool {
        matches!(
            self.regime,
            MarketRegime::TrendingUp | MarketRegime::TrendingDown
        )
    }

    /// Direction veto: a CALL is forbidden against a strong downtrend and a
    /// PUT against a strong uptrend.
    pub fn allows_direction(&self, direction: SignalDirection) -> bool {
        match (direction, self.regime) {
            (SignalDirection::Call, MarketRegime::TrendingDown) => self.strength <= 0.5,
            (SignalDirection::Put, MarketRegime::TrendingUp) => self.strength <= 0.5,
            _ => true,
        }
    }

    /// Confidence multiplier in [0.4, 1.0] applied by the brain.
    pub fn confidence_penalty(&self) -> f64 {
        let base = match self.regime {
            MarketRegime::TrendingUp | MarketRegime::TrendingDown => {
                0.8 + 0.2 * self.strength
            }
            MarketRegime::Ranging => 0.7,
            MarketRegime::Choppy => 0.4,
            MarketRegime::Unknown => 0.6,
        };
        let action_scale = match self.price_action {
            PriceAction::Clean => 1.0,
            PriceAction::Messy => 0.9,
            PriceAction::Choppy => 0.75,
        };
        (base * action_scale).clamp(0.4, 1.0)
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Classify the market over the last 30 candles.
pub fn detect(candles: &[Candle], indicators: &IndicatorValues) -> RegimeAnalysis {
    if candles.len() < SWING_WINDOW {
        return RegimeAnalysis::unknown("insufficient history for regime analysis");
    }
    let window = &candles[candles.len() - SWING_WINDOW..];

    let swings = swing_structure(window);
    let price_action = classify_price_action(window);
    let volatility_level = classify_volatility(window, indicators);
    let adx = indicators.adx14.unwrap_or(0.0);
    let trend_duration = trend_duration(window);

    let (regime, strength, reason) = decide_regime(&swings, price_action, adx, window);

    let momentum_aligned = match regime {
        MarketRegime::TrendingUp => momentum_alignment(indicators, VoteDirection::Up) >= 0.6,
        MarketRegime::TrendingDown => momentum_alignment(indicators, VoteDirection::Down) >= 0.6,
        _ => false,
    };

    // Tradeability: choppy high-volatility markets are out; a trend needs a
    // minimum duration and at least partial confirmation.
    let choppy_and_hot =
        regime == MarketRegime::Choppy && volatility_level == VolatilityLevel::High;
    let confirmed_enough = swings.confirmed || strength > 0.4;
    let is_tradeable = !choppy_and_hot
        && regime != MarketRegime::Choppy
        && regime != MarketRegime::Unknown
        && trend_duration >= MIN_TREND_DURATION
        && confirmed_enough;

    RegimeAnalysis {
        regime,
        strength,
        is_tradeable,
        reason,
        trend_duration,
        momentum_aligned,
        volatility_level,
        price_action,
        swings_confirmed: swings.confirmed,
    }
}

struct SwingStructure {
    higher_highs: u32,
    higher_lows: u32,
    lower_highs: u32,
    lower_lows: u32,
    confirmed: bool,
    direction: VoteDirection,
}

/// Count swing relationships over consecutive 5-candle segments.
fn swing_structure(window: &[Candle]) -> SwingStructure {
    let segment = 5;
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    for chunk in window.chunks(segment) {
        if chunk.len() < segment {
            continue;
        }
        highs.push(chunk.iter().map(|c| c.high).fold(f64::MIN, f64::max));
        lows.push(chunk.iter().map(|c| c.low).fold(f64::MAX, f64::min));
    }

    let mut higher_highs = 0;
    let mut lower_highs = 0;
    for w in highs.windows(2) {
        if w[1] > w[0] {
            higher_highs += 1;
        } else if w[1] < w[0] {
            lower_highs += 1;
        }
    }
    let mut higher_lows = 0;
    let mut lower_lows = 0;
    for w in lows.windows(2) {
        if w[1] > w[0] {
            higher_lows += 1;
        } else if w[1] < w[0] {
            lower_lows += 1;
        }
    }

    let up_confirmed = higher_highs >= 3 && higher_lows >= 2;
    let down_confirmed = lower_lows >= 3 && lower_highs >= 2;
    let direction = if up_confirmed || higher_highs + higher_lows > lower_highs + lower_lows {
        VoteDirection::Up
    } else if down_confirmed || lower_highs + lower_lows > higher_highs + higher_lows {
        VoteDirection::Down
    } else {
        VoteDirection::Neutral
    };

    SwingStructure {
        higher_highs,
        higher_lows,
        lower_highs,
        lower_lows,
        confirmed: up_confirmed || down_confirmed,
        direction,
    }
}

/// Price action quality from direction-change frequency and wick dominance.
fn classify_price_action(window: &[Candle]) -> PriceAction {
    let mut changes = 0;
    let mut comparisons = 0;
    for w in window.windows(2) {
        let a = w[0].is_bullish();
        let b = w[1].is_bullish();
        comparisons += 1;
        if a != b {
            changes += 1;
        }
    }
    let change_ratio = if comparisons > 0 {
        changes as f64 / comparisons as f64
    } else {
        0.0
    };

    let total_range: f64 = window.iter().map(|c| c.range()).sum();
    let total_body: f64 = window.iter().map(|c| c.body()).sum();
    let wick_dominance = if total_range > 0.0 {
        1.0 - total_body / total_range
    } else {
        0.0
    };

    if change_ratio > 0.6 {
        PriceAction::Choppy
    } else if change_ratio > 0.4 || wick_dominance > 0.65 {
        PriceAction::Messy
    } else {
        PriceAction::Clean
    }
}

fn classify_volatility(window: &[Candle], indicators: &IndicatorValues) -> VolatilityLevel {
    let price = window.last().map(|c| c.close).unwrap_or(0.0);
    if price <= 0.0 {
        return VolatilityLevel::Medium;
    }

    let atr_ratio = indicators.atr14.map(|a| a / price).unwrap_or(0.0);
    let avg_range =
        window.iter().map(|c| c.range()).sum::<f64>() / window.len() as f64 / price;

    if atr_ratio > 0.004 || avg_range > 0.005 {
        VolatilityLevel::High
    } else if atr_ratio > 0.0015 || avg_range > 0.002 {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    }
}

/// Consecutive candles closing in the same direction as the last one.
fn trend_duration(window: &[Candle]) -> u32 {
    let last = match window.last() {
        Some(c) => c,
        None => return 0,
    };
    let rising = last.is_bullish();
    let mut duration = 0;
    for candle in window.iter().rev() {
        let matches = if rising {
            candle.is_bullish()
        } else {
            candle.is_bearish()
        };
        if matches {
            duration += 1;
        } else {
            break;
        }
    }
    duration
}

fn decide_regime(
    swings: &SwingStructure,
    price_action: PriceAction,
    adx: f64,
    window: &[Candle],
) -> (MarketRegime, f64, String) {
    if price_action == PriceAction::Choppy {
        return (
            MarketRegime::Choppy,
            0.2,
            "frequent direction flips".to_string(),
        );
    }

    // Strength blends the ADX tier with swing confirmation.
    let adx_component = ((adx - ADX_RANGING) / (ADX_STRONG - ADX_RANGING)).clamp(0.0, 1.0);
    let swing_total =
        swings.higher_highs + swings.higher_lows + swings.lower_highs + swings.lower_lows;
    let swing_component = if swing_total > 0 {
        let dominant = (swings.higher_highs + swings.higher_lows)
            .max(swings.lower_highs + swings.lower_lows);
        dominant as f64 / swing_total as f64
    } else {
        0.0
    };
    let strength = (0.6 * adx_component + 0.4 * swing_component).clamp(0.0, 1.0);

    if adx >= ADX_TRENDING {
        let direction = if swings.direction == VoteDirection::Neutral {
            // Tie-break with net price movement over the window.
            let first = window.first().map(|c| c.open).unwrap_or(0.0);
            let last = window.last().map(|c| c.close).unwrap_or(0.0);
            if last >= first {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            }
        } else {
            swings.direction
        };

        let regime = match direction {
            VoteDirection::Up => MarketRegime::TrendingUp,
            VoteDirection::Down => MarketRegime::TrendingDown,
            VoteDirection::Neutral => MarketRegime::Ranging,
        };
        let tier = if adx >= ADX_STRONG { "strong" } else { "confirmed" };
        return (
            regime,
            strength,
            format!("{} trend, ADX {:.1}", tier, adx),
        );
    }

    if adx < ADX_RANGING {
        return (
            MarketRegime::Ranging,
            strength.min(0.4),
            format!("ADX {:.1} below ranging floor", adx),
        );
    }

    (
        MarketRegime::Unknown,
        strength.min(0.5),
        format!("ADX {:.1} in transition zone", adx),
    )
}

/// Fraction of momentum gauges agreeing with the candidate direction:
/// RSI side of 50, MACD histogram sign, stochastic cross, SuperTrend side.
pub fn momentum_alignment(indicators: &IndicatorValues, direction: VoteDirection) -> f64 {
    let mut aligned = 0u32;
    let mut total = 0u32;

    if let Some(rsi) = indicators.rsi14 {
        total += 1;
        let up = rsi > 50.0;
        if (direction == VoteDirection::Up) == up {
            aligned += 1;
        }
    }
    if let Some(macd) = indicators.macd {
        total += 1;
        let up = macd.histogram > 0.0;
        if (direction == VoteDirection::Up) == up {
            aligned += 1;
        }
    }
    if let Some(stoch) = indicators.stochastic {
        total += 1;
        let up = stoch.k > stoch.d;
        if (direction == VoteDirection::Up) == up {
            aligned += 1;
        }
    }
    if let Some(st) = indicators.supertrend {
        total += 1;
        let up = st.direction == TrendSide::Up;
        if (direction == VoteDirection::Up) == up {
            aligned += 1;
        }
    }

    if total == 0 {
        0.0
    } else {
        aligned as f64 / total as f64
    }
}
