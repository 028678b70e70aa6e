// Candlestick Pattern Detection - single and multi-candle formations
// Pure and idempotent: same candles in, same hits out.

use crate::core::types::{Candle, PatternHit, VoteDirection};

const WICK_DOMINANCE: f64 = 0.6;
const SMALL_BODY: f64 = 0.4;
const DOJI_BODY: f64 = 0.1;
const ENGULFING_BODY_RATIO: f64 = 1.2;

/// Run every candlestick detector over the last 1-5 candles.
pub fn detect(candles: &[Candle]) -> Vec<PatternHit> {
    let mut hits = Vec::new();
    if candles.is_empty() {
        return hits;
    }

    let checks: [fn(&[Candle]) -> Option<PatternHit>; 16] = [
        check_engulfing,
        check_hammer_family,
        check_doji,
        check_star,
        check_three_soldiers_crows,
        check_inside_bar,
        check_outside_bar,
        check_tweezer,
        check_piercing_line,
        check_dark_cloud_cover,
        check_three_methods,
        check_harami,
        check_wick_rejection_upper,
        check_wick_rejection_lower,
        check_marubozu,
        check_spinning_top,
    ];

    for check in checks {
        if let Some(hit) = check(candles) {
            hits.push(hit);
        }
    }
    hits
}

fn last_two(candles: &[Candle]) -> Option<(&Candle, &Candle)> {
    if candles.len() < 2 {
        return None;
    }
    Some((&candles[candles.len() - 2], &candles[candles.len() - 1]))
}

fn last_three(candles: &[Candle]) -> Option<(&Candle, &Candle, &Candle)> {
    if candles.len() < 3 {
        return None;
    }
    let n = candles.len();
    Some((&candles[n - 3], &candles[n - 2], &candles[n - 1]))
}

/// Direction of the few candles before the current one, used to separate
/// hammer from hanging man and star from inverted hammer.
fn prior_drift(candles: &[Candle], skip_last: usize) -> VoteDirection {
    let usable = candles.len().saturating_sub(skip_last);
    if usable < 3 {
        return VoteDirection::Neutral;
    }
    let window = &candles[usable.saturating_sub(3)..usable];
    let first = window.first().unwrap().open;
    let last = window.last().unwrap().close;
    if last > first {
        VoteDirection::Up
    } else if last < first {
        VoteDirection::Down
    } else {
        VoteDirection::Neutral
    }
}

// ----------------------------------------------------------------------
// Two-candle reversals
// ----------------------------------------------------------------------

fn check_engulfing(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    if prev.body() == 0.0 {
        return None;
    }
    let body_ratio = curr.body() / prev.body();
    if body_ratio <= ENGULFING_BODY_RATIO {
        return None;
    }

    let bullish = curr.is_bullish()
        && prev.is_bearish()
        && curr.open <= prev.close
        && curr.close >= prev.open;
    let bearish = curr.is_bearish()
        && prev.is_bullish()
        && curr.open >= prev.close
        && curr.close <= prev.open;

    if !bullish && !bearish {
        return None;
    }

    let quality = ((body_ratio - ENGULFING_BODY_RATIO) / 1.5).clamp(0.0, 1.0);
    let (name, direction) = if bullish {
        ("Bullish Engulfing", VoteDirection::Up)
    } else {
        ("Bearish Engulfing", VoteDirection::Down)
    };
    Some(PatternHit::new(
        name,
        direction,
        1.0 + quality * 1.5,
        format!("body engulfs prior by {:.2}x", body_ratio),
    ))
}

fn check_harami(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    let inside_body = curr.open.max(curr.close) < prev.open.max(prev.close)
        && curr.open.min(curr.close) > prev.open.min(prev.close);
    if !inside_body || prev.body() == 0.0 {
        return None;
    }

    if prev.is_bearish() && curr.is_bullish() {
        Some(PatternHit::new(
            "Bullish Harami",
            VoteDirection::Up,
            0.9,
            "small bullish body inside prior bearish body",
        ))
    } else if prev.is_bullish() && curr.is_bearish() {
        Some(PatternHit::new(
            "Bearish Harami",
            VoteDirection::Down,
            0.9,
            "small bearish body inside prior bullish body",
        ))
    } else {
        None
    }
}

fn check_piercing_line(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    if !(prev.is_bearish() && curr.is_bullish()) || prev.body() == 0.0 {
        return None;
    }
    let midpoint = (prev.open + prev.close) / 2.0;
    // Opens below the prior low, closes above the prior body midpoint.
    if curr.open < prev.close && curr.close > midpoint && curr.close < prev.open {
        let penetration = (curr.close - midpoint) / prev.body();
        Some(PatternHit::new(
            "Piercing Line",
            VoteDirection::Up,
            1.0 + penetration.clamp(0.0, 1.0),
            "bullish close above prior body midpoint",
        ))
    } else {
        None
    }
}

fn check_dark_cloud_cover(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    if !(prev.is_bullish() && curr.is_bearish()) || prev.body() == 0.0 {
        return None;
    }
    let midpoint = (prev.open + prev.close) / 2.0;
    if curr.open > prev.close && curr.close < midpoint && curr.close > prev.open {
        let penetration = (midpoint - curr.close) / prev.body();
        Some(PatternHit::new(
            "Dark Cloud Cover",
            VoteDirection::Down,
            1.0 + penetration.clamp(0.0, 1.0),
            "bearish close below prior body midpoint",
        ))
    } else {
        None
    }
}

fn check_tweezer(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    let tolerance = prev.range().max(curr.range()) * 0.1;
    if tolerance == 0.0 {
        return None;
    }

    if (prev.high - curr.high).abs() <= tolerance && prev.is_bullish() && curr.is_bearish() {
        return Some(PatternHit::new(
            "Tweezer Top",
            VoteDirection::Down,
            1.0,
            "matched highs with bearish follow-through",
        ));
    }
    if (prev.low - curr.low).abs() <= tolerance && prev.is_bearish() && curr.is_bullish() {
        return Some(PatternHit::new(
            "Tweezer Bottom",
            VoteDirection::Up,
            1.0,
            "matched lows with bullish follow-through",
        ));
    }
    None
}

fn check_inside_bar(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    if curr.high < prev.high && curr.low > prev.low {
        let direction = if curr.is_bullish() {
            VoteDirection::Up
        } else if curr.is_bearish() {
            VoteDirection::Down
        } else {
            VoteDirection::Neutral
        };
        Some(PatternHit::new(
            "Inside Bar",
            direction,
            0.6,
            "range contained within prior candle",
        ))
    } else {
        None
    }
}

fn check_outside_bar(candles: &[Candle]) -> Option<PatternHit> {
    let (prev, curr) = last_two(candles)?;
    if curr.high > prev.high && curr.low < prev.low {
        let direction = if curr.is_bullish() {
            VoteDirection::Up
        } else if curr.is_bearish() {
            VoteDirection::Down
        } else {
            VoteDirection::Neutral
        };
        Some(PatternHit::new(
            "Outside Bar",
            direction,
            0.9,
            "range engulfs prior candle",
        ))
    } else {
        None
    }
}

// ----------------------------------------------------------------------
// Single-candle shapes
// ----------------------------------------------------------------------

fn check_hammer_family(candles: &[Candle]) -> Option<PatternHit> {
    let curr = candles.last()?;
    let range = curr.range();
    if range == 0.0 {
        return None;
    }

    let body = curr.body();
    let lower = curr.lower_wick();
    let upper = curr.upper_wick();
    let drift = prior_drift(candles, 1);

    let lower_dominant =
        lower / range >= WICK_DOMINANCE && body / range < SMALL_BODY && lower >= 2.0 * body;
    let upper_dominant =
        upper / range >= WICK_DOMINANCE && body / range < SMALL_BODY && upper >= 2.0 * body;

    if lower_dominant {
        let quality = (lower / range).clamp(0.0, 1.0);
        return Some(match drift {
            VoteDirection::Down => PatternHit::new(
                "Hammer",
                VoteDirection::Up,
                1.0 + quality,
                "long lower wick after decline",
            ),
            _ => PatternHit::new(
                "Hanging Man",
                VoteDirection::Down,
                0.8 + quality * 0.5,
                "long lower wick after advance",
            ),
        });
    }
    if upper_dominant {
        let quality = (upper / range).clamp(0.0, 1.0);
        return Some(match drift {
            VoteDirection::Down => PatternHit::new(
                "Inverted Hammer",
                VoteDirection::Up,
                0.8 + quality * 0.5,
                "long upper wick after decline",
            ),
            _ => PatternHit::new(
                "Shooting Star",
                VoteDirection::Down,
                1.0 + quality,
                "long upper wick after advance",
            ),
        });
    }
    None
}

fn check_doji(candles: &[Candle]) -> Option<PatternHit> {
    let curr = candles.last()?;
    let range = curr.range();
    if range == 0.0 || curr.body_pct() >= DOJI_BODY {
        return None;
    }

    let upper = curr.upper_wick() / range;
    let lower = curr.lower_wick() / range;

    let (name, direction) = if upper > 0.6 && lower < 0.2 {
        ("Gravestone Doji", VoteDirection::Down)
    } else if lower > 0.6 && upper < 0.2 {
        ("Dragonfly Doji", VoteDirection::Up)
    } else if upper > 0.3 && lower > 0.3 {
        ("Long-Legged Doji", VoteDirection::Neutral)
    } else {
        ("Doji", VoteDirection::Neutral)
    };

    Some(PatternHit::new(
        name,
        direction,
        0.6,
        "indecision candle with negligible body",
    ))
}

fn check_marubozu(candles: &[Candle]) -> Option<PatternHit> {
    let curr = candles.last()?;
    let range = curr.range();
    if range == 0.0 || curr.body_pct() < 0.92 {
        return None;
    }
    let direction = if curr.is_bullish() {
        VoteDirection::Up
    } else {
        VoteDirection::Down
    };
    Some(PatternHit::new(
        "Marubozu",
        direction,
        1.2,
        "full-body candle with no meaningful wicks",
    ))
}

fn check_spinning_top(candles: &[Candle]) -> Option<PatternHit> {
    let curr = candles.last()?;
    let range = curr.range();
    if range == 0.0 {
        return None;
    }
    let body = curr.body_pct();
    let upper = curr.upper_wick() / range;
    let lower = curr.lower_wick() / range;
    if body >= DOJI_BODY && body < 0.3 && upper > 0.25 && lower > 0.25 {
        Some(PatternHit::new(
            "Spinning Top",
            VoteDirection::Neutral,
            0.5,
            "small body with wicks on both sides",
        ))
    } else {
        None
    }
}

fn check_wick_rejection_upper(candles: &[Candle]) -> Option<PatternHit> {
    let curr = candles.last()?;
    let range = curr.range();
    if range == 0.0 {
        return None;
    }
    // Strong rejection: upper wick over half the range, close in lower third.
    if curr.upper_wick() / range > 0.5 && (curr.close - curr.low) / range < 0.33 {
        Some(PatternHit::new(
            "Upper Wick Rejection",
            VoteDirection::Down,
            1.1,
            "buyers rejected at the high",
        ))
    } else {
        None
    }
}

fn check_wick_rejection_lower(candles: &[Candle]) -> Option<PatternHit> {
    let curr = candles.last()?;
    let range = curr.range();
    if range == 0.0 {
        return None;
    }
    if curr.lower_wick() / range > 0.5 && (curr.high - curr.close) / range < 0.33 {
        Some(PatternHit::new(
            "Lower Wick Rejection",
            VoteDirection::Up,
            1.1,
            "sellers rejected at the low",
        ))
    } else {
        None
    }
}

// ----------------------------------------------------------------------
// Three-candle and five-candle formations
// ----------------------------------------------------------------------

fn check_star(candles: &[Candle]) -> Option<PatternHit> {
    let (first, middle, last) = last_three(candles)?;
    if first.body() == 0.0 {
        return None;
    }
    let small_middle = middle.body() < first.body() * 0.5;

    // Morning star: decline, pause, strong recovery past the first midpoint.
    if first.is_bearish()
        && small_middle
        && last.is_bullish()
        && last.close > (first.open + first.close) / 2.0
    {
        let quality = (last.body() / first.body()).clamp(0.0, 1.0);
        return Some(PatternHit::new(
            "Morning Star",
            VoteDirection::Up,
            1.2 + quality * 0.8,
            "three-candle reversal from decline",
        ));
    }
    if first.is_bullish()
        && small_middle
        && last.is_bearish()
        && last.close < (first.open + first.close) / 2.0
    {
        let quality = (last.body() / first.body()).clamp(0.0, 1.0);
        return Some(PatternHit::new(
            "Evening Star",
            VoteDirection::Down,
            1.2 + quality * 0.8,
            "three-candle reversal from advance",
        ));
    }
    None
}

fn check_three_soldiers_crows(candles: &[Candle]) -> Option<PatternHit> {
    let (first, middle, last) = last_three(candles)?;

    let all_bullish = first.is_bullish() && middle.is_bullish() && last.is_bullish();
    let all_bearish = first.is_bearish() && middle.is_bearish() && last.is_bearish();
    let decent_bodies = [first, middle, last].iter().all(|c| c.body_pct() > 0.5);

    if all_bullish && decent_bodies && middle.close > first.close && last.close > middle.close {
        return Some(PatternHit::new(
            "Three White Soldiers",
            VoteDirection::Up,
            1.5,
            "three consecutive strong bullish closes",
        ));
    }
    if all_bearish && decent_bodies && middle.close < first.close && last.close < middle.close {
        return Some(PatternHit::new(
            "Three Black Crows",
            VoteDirection::Down,
            1.5,
            "three consecutive strong bearish closes",
        ));
    }
    None
}

fn check_three_methods(candles: &[Candle]) -> Option<PatternHit> {
    if candles.len() < 5 {
        return None;
    }
    let n = candles.len();
    let first = &candles[n - 5];
    let rest = &candles[n - 4..n - 1];
    let last = &candles[n - 1];

    // Rising: strong bullish candle, three small pullback candles held
    // inside its range, then a bullish close above the first close.
    let small_inside = rest
        .iter()
        .all(|c| c.high <= first.high && c.low >= first.low && c.body() < first.body());

    if first.is_bullish()
        && small_inside
        && rest.iter().all(|c| !c.is_bullish() || c.body() < first.body() * 0.5)
        && last.is_bullish()
        && last.close > first.close
    {
        return Some(PatternHit::new(
            "Rising Three Methods",
            VoteDirection::Up,
            1.3,
            "consolidation held inside bullish thrust",
        ));
    }
    if first.is_bearish()
        && small_inside
        && last.is_bearish()
        && last.close < first.close
    {
        return Some(PatternHit::new(
            "Falling Three Methods",
            VoteDirection::Down,
            1.3,
            "consolidation held inside bearish thrust",
        ));
    }
    None
}
