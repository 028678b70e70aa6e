// Feature Extractor - fixed-length normalized vector for the ML ensemble
// Raw readings are kept alongside the normalized values so outcomes can be
// audited after resolution.

use serde::{Deserialize, Serialize};

use crate::analytics::indicators::{self, IndicatorValues};
use crate::analytics::regime::RegimeAnalysis;
use crate::core::types::{Candle, PsychologyAnalysis, VoteDirection};

/// Dimension of the normalized vector consumed by every learner.
pub const FEATURE_COUNT: usize = 28;

// ============================================================================
// Feature Record
// ============================================================================

/// Raw (unnormalized) feature readings plus the normalized vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub price_change_pct: f64,
    pub volatility: f64,
    pub atr_ratio: f64,
    pub rsi: f64,
    pub rsi_slope: f64,
    pub macd_histogram: f64,
    pub macd_cross: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub trend_strength: f64,
    pub trend_direction: f64,
    pub ema9_slope: f64,
    pub ema21_slope: f64,
    pub ema_cross: f64,
    pub volume_ratio: f64,
    pub volume_trend: f64,
    pub body_ratio: f64,
    pub upper_wick_ratio: f64,
    pub lower_wick_ratio: f64,
    pub bullish_pattern_score: f64,
    pub bearish_pattern_score: f64,
    pub is_ranging: bool,
    pub is_trending: bool,
    pub regime_strength: f64,
    pub buy_pressure: f64,
    pub sell_pressure: f64,
    pub momentum: f64,
    pub vector: Vec<f64>,
}

impl FeatureRecord {
    pub fn confluence(&self) -> f64 {
        (self.buy_pressure - self.sell_pressure).abs()
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Build the feature record from the estimated candle array (closed candles
/// plus the forming tail) and the already-computed analysis stages.
pub fn extract(
    candles: &[Candle],
    values: &IndicatorValues,
    psychology: &PsychologyAnalysis,
    regime: &RegimeAnalysis,
) -> FeatureRecord {
    let price = candles.last().map(|c| c.close).unwrap_or(0.0);
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let price_change_pct = if candles.len() >= 2 && candles[candles.len() - 2].close > 0.0 {
        let prev = candles[candles.len() - 2].close;
        (price - prev) / prev * 100.0
    } else {
        0.0
    };

    let volatility = relative_std(&closes, 20);
    let atr_ratio = match (values.atr14, price > 0.0) {
        (Some(atr), true) => atr / price,
        _ => 0.0,
    };

    let rsi = values.rsi14.unwrap_or(50.0);
    let rsi_slope = if candles.len() > 1 {
        let prev_rsi = indicators::rsi(&closes[..closes.len() - 1], 14).unwrap_or(rsi);
        rsi - prev_rsi
    } else {
        0.0
    };

    let (macd_histogram, macd_cross) = match values.macd {
        Some(m) => (m.histogram, if m.macd > m.signal { 1.0 } else { -1.0 }),
        None => (0.0, 0.0),
    };

    let (stoch_k, stoch_d) = match values.stochastic {
        Some(s) => (s.k, s.d),
        None => (50.0, 50.0),
    };

    let trend_direction = match regime.regime {
        crate::analytics::regime::MarketRegime::TrendingUp => 1.0,
        crate::analytics::regime::MarketRegime::TrendingDown => -1.0,
        _ => 0.0,
    };

    let ema9_slope = series_slope(&closes, 9);
    let ema21_slope = series_slope(&closes, 21);
    let ema_cross = match (values.ema9, values.ema21) {
        (Some(fast), Some(slow)) => {
            if fast > slow {
                1.0
            } else {
                -1.0
            }
        }
        _ => 0.0,
    };

    let (volume_ratio, volume_trend) = volume_profile(candles);

    let (bullish_pattern_score, bearish_pattern_score) = pattern_scores(psychology);

    let (buy_pressure, sell_pressure) = pressure(candles);

    let momentum = values.momentum10.unwrap_or(0.0);

    let mut record = FeatureRecord {
        price_change_pct,
        volatility,
        atr_ratio,
        rsi,
        rsi_slope,
        macd_histogram,
        macd_cross,
        stoch_k,
        stoch_d,
        trend_strength: regime.strength,
        trend_direction,
        ema9_slope,
        ema21_slope,
        ema_cross,
        volume_ratio,
        volume_trend,
        body_ratio: psychology.body_ratio,
        upper_wick_ratio: psychology.upper_wick_ratio,
        lower_wick_ratio: psychology.lower_wick_ratio,
        bullish_pattern_score,
        bearish_pattern_score,
        is_ranging: regime.is_ranging(),
        is_trending: regime.is_trending(),
        regime_strength: regime.strength,
        buy_pressure,
        sell_pressure,
        momentum,
        vector: Vec::new(),
    };
    record.vector = normalize(&record, price);
    record
}

/// Normalize every reading into [-1, 1].
fn normalize(record: &FeatureRecord, price: f64) -> Vec<f64> {
    let safe_price = if price > 0.0 { price } else { 1.0 };

    let vector = vec![
        (record.price_change_pct / 2.0).tanh(),
        (record.volatility * 100.0).tanh(),
        (record.atr_ratio * 100.0).tanh(),
        record.rsi / 100.0,
        (record.rsi_slope / 10.0).clamp(-1.0, 1.0),
        (record.macd_histogram * 100.0).tanh(),
        record.macd_cross,
        record.stoch_k / 100.0,
        record.stoch_d / 100.0,
        record.trend_strength.clamp(0.0, 1.0),
        record.trend_direction,
        (record.ema9_slope / safe_price * 1000.0).tanh(),
        (record.ema21_slope / safe_price * 1000.0).tanh(),
        record.ema_cross,
        record.volume_ratio.min(3.0) / 3.0,
        record.volume_trend,
        record.body_ratio.clamp(0.0, 1.0),
        record.upper_wick_ratio.clamp(0.0, 1.0),
        record.lower_wick_ratio.clamp(0.0, 1.0),
        record.bullish_pattern_score.clamp(0.0, 1.0),
        record.bearish_pattern_score.clamp(0.0, 1.0),
        if record.is_ranging { 1.0 } else { 0.0 },
        if record.is_trending { 1.0 } else { 0.0 },
        record.regime_strength.clamp(0.0, 1.0),
        record.buy_pressure.clamp(0.0, 1.0),
        record.sell_pressure.clamp(0.0, 1.0),
        (record.momentum / safe_price * 100.0).tanh(),
        (record.buy_pressure - record.sell_pressure).abs().clamp(0.0, 1.0),
    ];
    debug_assert_eq!(vector.len(), FEATURE_COUNT);
    vector
}

// ----------------------------------------------------------------------
// Components
// ----------------------------------------------------------------------

/// Standard deviation of closes over `period`, relative to the last price.
fn relative_std(closes: &[f64], period: usize) -> f64 {
    let price = closes.last().copied().unwrap_or(0.0);
    if price <= 0.0 {
        return 0.0;
    }
    indicators::std_dev(closes, period)
        .map(|sd| sd / price)
        .unwrap_or(0.0)
}

/// One-step slope of the EMA series for the given period.
fn series_slope(closes: &[f64], period: usize) -> f64 {
    let series = indicators::ema_series(closes, period);
    if series.len() < 2 {
        return 0.0;
    }
    series[series.len() - 1] - series[series.len() - 2]
}

/// (last tick volume / 20-candle average, recent-vs-prior trend sign).
fn volume_profile(candles: &[Candle]) -> (f64, f64) {
    if candles.len() < 10 {
        return (1.0, 0.0);
    }
    let take = candles.len().min(20);
    let window = &candles[candles.len() - take..];
    let avg = window.iter().map(|c| c.tick_count as f64).sum::<f64>() / window.len() as f64;
    let last = window.last().unwrap().tick_count as f64;
    let ratio = if avg > 0.0 { last / avg } else { 1.0 };

    let split = window.len() / 2;
    let prior: f64 =
        window[..split].iter().map(|c| c.tick_count as f64).sum::<f64>() / split.max(1) as f64;
    let recent: f64 = window[split..].iter().map(|c| c.tick_count as f64).sum::<f64>()
        / (window.len() - split).max(1) as f64;
    let trend = if recent > prior * 1.05 {
        1.0
    } else if recent < prior * 0.95 {
        -1.0
    } else {
        0.0
    };

    (ratio, trend)
}

/// Sum detected pattern strengths per side, scaled into [0, 1].
fn pattern_scores(psychology: &PsychologyAnalysis) -> (f64, f64) {
    let mut bull = 0.0;
    let mut bear = 0.0;
    for hit in &psychology.patterns {
        match hit.direction {
            VoteDirection::Up => bull += hit.strength,
            VoteDirection::Down => bear += hit.strength,
            VoteDirection::Neutral => {}
        }
    }
    ((bull / 5.0).min(1.0), (bear / 5.0).min(1.0))
}

/// Body-weighted share of bullish vs bearish candles over the last ten.
fn pressure(candles: &[Candle]) -> (f64, f64) {
    let take = candles.len().min(10);
    if take == 0 {
        return (0.5, 0.5);
    }
    let window = &candles[candles.len() - take..];
    let total: f64 = window.iter().map(|c| c.body()).sum();
    if total <= 0.0 {
        return (0.5, 0.5);
    }
    let buy: f64 = window
        .iter()
        .filter(|c| c.is_bullish())
        .map(|c| c.body())
        .sum();
    let sell: f64 = window
        .iter()
        .filter(|c| c.is_bearish())
        .map(|c| c.body())
        .sum();
    (buy / total, sell / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{indicators, psychology, regime};

    fn candle(open: f64, high: f64, low: f64, close: f64, epoch: i64) -> Candle {
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

    fn uptrend(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                candle(base, base + 0.6, base - 0.2, base + 0.45, i as i64 * 60)
            })
            .collect()
    }

    fn full_record(candles: &[Candle]) -> FeatureRecord {
        let values = indicators::compute_all(candles);
        let psych = psychology::analyze(candles);
        let reg = regime::detect(candles, &values);
        extract(candles, &values, &psych, &reg)
    }

    #[test]
    fn test_vector_length() {
        let candles = uptrend(60);
        let record = full_record(&candles);
        assert_eq!(record.vector.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_vector_bounds() {
        let candles = uptrend(60);
        let record = full_record(&candles);
        for (i, v) in record.vector.iter().enumerate() {
            assert!(v.is_finite(), "feature {} not finite", i);
            assert!((-1.0..=1.0).contains(v), "feature {} = {} out of range", i, v);
        }
    }

    #[test]
    fn test_uptrend_feature_signs() {
        let candles = uptrend(60);
        let record = full_record(&candles);
        assert!(record.price_change_pct > 0.0);
        assert_eq!(record.ema_cross, 1.0);
        assert_eq!(record.trend_direction, 1.0);
        assert!(record.is_trending);
        assert!(!record.is_ranging);
        assert!(record.buy_pressure > record.sell_pressure);
        assert!(record.rsi > 50.0);
    }

    #[test]
    fn test_downtrend_feature_signs() {
        let candles: Vec<Candle> = (0..60)
            .map(|i| {
                let base = 200.0 - i as f64 * 0.5;
                candle(base, base + 0.2, base - 0.6, base - 0.45, i as i64 * 60)
            })
            .collect();
        let record = full_record(&candles);
        assert!(record.price_change_pct < 0.0);
        assert_eq!(record.ema_cross, -1.0);
        assert_eq!(record.trend_direction, -1.0);
        assert!(record.sell_pressure > record.buy_pressure);
    }

    #[test]
    fn test_extraction_deterministic() {
        let candles = uptrend(60);
        let a = full_record(&candles);
        let b = full_record(&candles);
        assert_eq!(a.vector, b.vector);
    }

    #[test]
    fn test_short_history_stays_bounded() {
        let candles = uptrend(5);
        let record = full_record(&candles);
        assert_eq!(record.vector.len(), FEATURE_COUNT);
        for v in &record.vector {
            assert!(v.is_finite());
            assert!((-1.0..=1.0).contains(v));
        }
    }

    #[test]
    fn test_confluence_matches_pressures() {
        let candles = uptrend(60);
        let record = full_record(&candles);
        let expected = (record.buy_pressure - record.sell_pressure).abs();
        assert!((record.confluence() - expected).abs() < 1e-12);
        assert!((record.vector[FEATURE_COUNT - 1] - expected.min(1.0)).abs() < 1e-12);
    }
}
