// Candle Psychology - wick/body anatomy, order blocks, fair value gaps
// Folds all three pattern detector families into one analysis record.

use crate::analytics::patterns;
use crate::core::types::{Bias, Candle, PsychologyAnalysis, VoteDirection};

/// Analyze the tail of the candle array. The final candle supplies the
/// anatomy ratios; the last five drive order-block probability; the
/// candlestick, chart, and harmonic detectors all contribute hits.
pub fn analyze(candles: &[Candle]) -> PsychologyAnalysis {
    let last = match candles.last() {
        Some(candle) => candle,
        None => return PsychologyAnalysis::default(),
    };

    let range = last.range();
    let (body_ratio, upper_wick_ratio, lower_wick_ratio) = if range > 0.0 {
        (
            last.body() / range,
            last.upper_wick() / range,
            last.lower_wick() / range,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    let patterns = patterns::detect_all(candles);

    let mut bull_weight = 0.0;
    let mut bear_weight = 0.0;
    for hit in &patterns {
        match hit.direction {
            VoteDirection::Up => bull_weight += hit.strength,
            VoteDirection::Down => bear_weight += hit.strength,
            VoteDirection::Neutral => {}
        }
    }
    // The candle body itself tips the balance when patterns disagree.
    if last.is_bullish() {
        bull_weight += body_ratio;
    } else if last.is_bearish() {
        bear_weight += body_ratio;
    }

    let bias = if bull_weight > bear_weight + 0.25 {
        Bias::Bullish
    } else if bear_weight > bull_weight + 0.25 {
        Bias::Bearish
    } else {
        Bias::Neutral
    };

    PsychologyAnalysis {
        body_ratio,
        upper_wick_ratio,
        lower_wick_ratio,
        is_doji: range > 0.0 && body_ratio < 0.1,
        patterns,
        bias,
        order_block_probability: order_block_probability(candles),
        fvg_detected: fair_value_gap(candles),
    }
}

/// Order block probability: the share of the last five candles agreeing in
/// direction, boosted when the final body dwarfs the five-candle mean body.
pub fn order_block_probability(candles: &[Candle]) -> f64 {
    if candles.len() < 5 {
        return 0.0;
    }
    let window = &candles[candles.len() - 5..];
    let last = window.last().unwrap();

    let bullish = window.iter().filter(|c| c.is_bullish()).count();
    let bearish = window.iter().filter(|c| c.is_bearish()).count();
    let dominance = bullish.max(bearish) as f64 / window.len() as f64;

    let mean_body = window.iter().map(|c| c.body()).sum::<f64>() / window.len() as f64;
    let big_last_body = mean_body > 0.0 && last.body() >= mean_body * 1.5;

    let probability = if big_last_body {
        dominance * 0.7 + 0.3
    } else {
        dominance * 0.5
    };
    probability.clamp(0.0, 1.0)
}

/// Three-candle fair value gap: the first candle's low sits above the third
/// candle's high (bearish gap) or its high below the third's low (bullish).
pub fn fair_value_gap(candles: &[Candle]) -> bool {
    if candles.len() < 3 {
        return false;
    }
    let n = candles.len();
    let first = &candles[n - 3];
    let third = &candles[n - 1];
    first.low > third.high || first.high < third.low
}
