// Pattern Engine - candlestick, chart, and harmonic detectors
// All detectors are pure and idempotent on the same input.

pub mod candlestick;
pub mod chart;
pub mod harmonic;

use crate::core::types::{Candle, PatternHit};

/// Run all three detector families and collect the hits. This is the
/// entry the psychology analysis feeds into the vote pool.
pub fn detect_all(candles: &[Candle]) -> Vec<PatternHit> {
    let mut hits = candlestick::detect(candles);
    hits.extend(chart::detect(candles));
    hits.extend(harmonic::detect(candles));
    hits
}
