// Chart Pattern Detection - multi-candle formations over a sliding window
// Operates on the last 20-50 closed candles; pure and idempotent.

use crate::core::types::{Candle, PatternHit, VoteDirection};

const MIN_WINDOW: usize = 20;
const MAX_WINDOW: usize = 50;
const DOUBLE_EXTREME_TOLERANCE: f64 = 0.01; // 1% matched extremes
const HS_SYMMETRY_TOLERANCE: f64 = 0.05; // 5% shoulder symmetry
const FLAG_POLE_MIN_MOVE: f64 = 0.02; // pole >= 2% move

/// Run every chart detector over the tail window of the candle array.
pub fn detect(candles: &[Candle]) -> Vec<PatternHit> {
    let mut hits = Vec::new();
    if candles.len() < MIN_WINDOW {
        return hits;
    }
    let window = &candles[candles.len().saturating_sub(MAX_WINDOW)..];

    let swings = find_swings(window, 2);

    if let Some(hit) = check_double_top(&swings) {
        hits.push(hit);
    }
    if let Some(hit) = check_double_bottom(&swings) {
        hits.push(hit);
    }
    if let Some(hit) = check_head_and_shoulders(&swings) {
        hits.push(hit);
    }
    if let Some(hit) = check_inverse_head_and_shoulders(&swings) {
        hits.push(hit);
    }
    if let Some(hit) = check_triangle(window) {
        hits.push(hit);
    }
    if let Some(hit) = check_flag(window) {
        hits.push(hit);
    }
    if let Some(hit) = check_wedge(window) {
        hits.push(hit);
    }
    hits
}

// ----------------------------------------------------------------------
// Swing detection
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy)]
pub struct Swing {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
}

/// Local extrema: a candle whose high (low) dominates `lookaround`
/// neighbours on both sides. Strict on the left, tolerant on the right,
/// so a flat plateau yields one swing instead of a run of duplicates.
pub fn find_swings(candles: &[Candle], lookaround: usize) -> Vec<Swing> {
    let mut swings = Vec::new();
    if candles.len() < 2 * lookaround + 1 {
        return swings;
    }

    for i in lookaround..candles.len() - lookaround {
        let high = candles[i].high;
        let low = candles[i].low;

        let is_high = (1..=lookaround)
            .all(|d| high > candles[i - d].high && high >= candles[i + d].high);
        let is_low = (1..=lookaround)
            .all(|d| low < candles[i - d].low && low <= candles[i + d].low);

        if is_high {
            swings.push(Swing {
                index: i,
                price: high,
                kind: SwingKind::High,
            });
        }
        if is_low {
            swings.push(Swing {
                index: i,
                price: low,
                kind: SwingKind::Low,
            });
        }
    }
    swings
}

fn swing_highs(swings: &[Swing]) -> Vec<Swing> {
    swings
        .iter()
        .copied()
        .filter(|s| s.kind == SwingKind::High)
        .collect()
}

fn swing_lows(swings: &[Swing]) -> Vec<Swing> {
    swings
        .iter()
        .copied()
        .filter(|s| s.kind == SwingKind::Low)
        .collect()
}

fn slope_of(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let sum_x = (0..values.len()).sum::<usize>() as f64;
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i * i) as f64).sum();
    let denom = n * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return None;
    }
    Some((n * sum_xy - sum_x * sum_y) / denom)
}

// ----------------------------------------------------------------------
// Reversal formations
// ----------------------------------------------------------------------

fn check_double_top(swings: &[Swing]) -> Option<PatternHit> {
    let highs = swing_highs(swings);
    if highs.len() < 2 {
        return None;
    }
    let second = highs[highs.len() - 1];
    let first = highs[highs.len() - 2];
    if first.price <= 0.0 {
        return None;
    }

    let gap = (second.price - first.price).abs() / first.price;
    if gap > DOUBLE_EXTREME_TOLERANCE {
        return None;
    }

    // A trough must sit between the two peaks.
    let lows = swing_lows(swings);
    let trough = lows
        .iter()
        .find(|l| l.index > first.index && l.index < second.index)?;
    if trough.price >= first.price.min(second.price) {
        return None;
    }

    let quality = 1.0 - gap / DOUBLE_EXTREME_TOLERANCE;
    Some(PatternHit::new(
        "Double Top",
        VoteDirection::Down,
        1.0 + quality,
        format!("matched peaks within {:.2}%", gap * 100.0),
    ))
}

fn check_double_bottom(swings: &[Swing]) -> Option<PatternHit> {
    let lows = swing_lows(swings);
    if lows.len() < 2 {
        return None;
    }
    let second = lows[lows.len() - 1];
    let first = lows[lows.len() - 2];
    if first.price <= 0.0 {
        return None;
    }

    let gap = (second.price - first.price).abs() / first.price;
    if gap > DOUBLE_EXTREME_TOLERANCE {
        return None;
    }

    let highs = swing_highs(swings);
    let crest = highs
        .iter()
        .find(|h| h.index > first.index && h.index < second.index)?;
    if crest.price <= first.price.max(second.price) {
        return None;
    }

    let quality = 1.0 - gap / DOUBLE_EXTREME_TOLERANCE;
    Some(PatternHit::new(
        "Double Bottom",
        VoteDirection::Up,
        1.0 + quality,
        format!("matched troughs within {:.2}%", gap * 100.0),
    ))
}

fn check_head_and_shoulders(swings: &[Swing]) -> Option<PatternHit> {
    let highs = swing_highs(swings);
    if highs.len() < 3 {
        return None;
    }
    let right = highs[highs.len() - 1];
    let head = highs[highs.len() - 2];
    let left = highs[highs.len() - 3];

    if head.price <= left.price || head.price <= right.price || left.price <= 0.0 {
        return None;
    }
    let symmetry = (left.price - right.price).abs() / left.price;
    if symmetry > HS_SYMMETRY_TOLERANCE {
        return None;
    }

    let quality = 1.0 - symmetry / HS_SYMMETRY_TOLERANCE;
    Some(PatternHit::new(
        "Head and Shoulders",
        VoteDirection::Down,
        1.2 + quality * 0.8,
        format!("shoulder symmetry within {:.2}%", symmetry * 100.0),
    ))
}

fn check_inverse_head_and_shoulders(swings: &[Swing]) -> Option<PatternHit> {
    let lows = swing_lows(swings);
    if lows.len() < 3 {
        return None;
    }
    let right = lows[lows.len() - 1];
    let head = lows[lows.len() - 2];
    let left = lows[lows.len() - 3];

    if head.price >= left.price || head.price >= right.price || left.price <= 0.0 {
        return None;
    }
    let symmetry = (left.price - right.price).abs() / left.price;
    if symmetry > HS_SYMMETRY_TOLERANCE {
        return None;
    }

    let quality = 1.0 - symmetry / HS_SYMMETRY_TOLERANCE;
    Some(PatternHit::new(
        "Inverse Head and Shoulders",
        VoteDirection::Up,
        1.2 + quality * 0.8,
        format!("shoulder symmetry within {:.2}%", symmetry * 100.0),
    ))
}

// ----------------------------------------------------------------------
// Continuation formations
// ----------------------------------------------------------------------

fn check_triangle(window: &[Candle]) -> Option<PatternHit> {
    let highs: Vec<f64> = window.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = window.iter().map(|c| c.low).collect();
    let high_slope = slope_of(&highs)?;
    let low_slope = slope_of(&lows)?;

    let price = window.last()?.close;
    if price <= 0.0 {
        return None;
    }
    // Normalize slopes to fractions of price per candle.
    let hs = high_slope / price;
    let ls = low_slope / price;
    let flat = 2e-4;

    if hs.abs() < flat && ls > flat {
        return Some(PatternHit::new(
            "Ascending Triangle",
            VoteDirection::Up,
            1.1,
            "flat resistance with rising lows",
        ));
    }
    if ls.abs() < flat && hs < -flat {
        return Some(PatternHit::new(
            "Descending Triangle",
            VoteDirection::Down,
            1.1,
            "flat support with falling highs",
        ));
    }
    if hs < -flat && ls > flat {
        // Symmetrical: lean on the short-term drift for direction.
        let tail = &window[window.len() - 5..];
        let direction = if tail.last()?.close > tail.first()?.open {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        return Some(PatternHit::new(
            "Symmetrical Triangle",
            direction,
            0.8,
            "converging highs and lows",
        ));
    }
    None
}

fn check_flag(window: &[Candle]) -> Option<PatternHit> {
    if window.len() < 12 {
        return None;
    }
    // Pole: first two-thirds; flag: final third.
    let split = window.len() * 2 / 3;
    let pole = &window[..split];
    let flag = &window[split..];

    let pole_start = pole.first()?.open;
    let pole_end = pole.last()?.close;
    if pole_start <= 0.0 {
        return None;
    }
    let pole_move = (pole_end - pole_start) / pole_start;
    if pole_move.abs() < FLAG_POLE_MIN_MOVE {
        return None;
    }

    let pole_range = pole.iter().map(|c| c.high).fold(f64::MIN, f64::max)
        - pole.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let flag_range = flag.iter().map(|c| c.high).fold(f64::MIN, f64::max)
        - flag.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if pole_range <= 0.0 || flag_range >= pole_range * 0.5 {
        return None;
    }

    let quality = (pole_move.abs() / FLAG_POLE_MIN_MOVE / 2.0).clamp(0.0, 1.0);
    if pole_move > 0.0 {
        Some(PatternHit::new(
            "Bull Flag",
            VoteDirection::Up,
            1.2 + quality * 0.8,
            format!("{:.1}% pole with tight consolidation", pole_move * 100.0),
        ))
    } else {
        Some(PatternHit::new(
            "Bear Flag",
            VoteDirection::Down,
            1.2 + quality * 0.8,
            format!("{:.1}% pole with tight consolidation", pole_move * 100.0),
        ))
    }
}

fn check_wedge(window: &[Candle]) -> Option<PatternHit> {
    let highs: Vec<f64> = window.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = window.iter().map(|c| c.low).collect();
    let high_slope = slope_of(&highs)?;
    let low_slope = slope_of(&lows)?;

    let price = window.last()?.close;
    if price <= 0.0 {
        return None;
    }
    let hs = high_slope / price;
    let ls = low_slope / price;
    let meaningful = 2e-4;

    // Rising wedge: both edges rising, support steeper than resistance.
    if hs > meaningful && ls > meaningful && ls > hs * 1.3 {
        return Some(PatternHit::new(
            "Rising Wedge",
            VoteDirection::Down,
            1.0,
            "converging rising edges",
        ));
    }
    // Falling wedge: both edges falling, resistance steeper than support.
    if hs < -meaningful && ls < -meaningful && hs < ls * 1.3 {
        return Some(PatternHit::new(
            "Falling Wedge",
            VoteDirection::Up,
            1.0,
            "converging falling edges",
        ));
    }
    None
}
