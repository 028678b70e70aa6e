// Harmonic Pattern Detection - XABCD ratio formations on candle midpoints
// Works on the last 30-45 midpoints; ratio tolerance sits between 3% and 8%.

use crate::core::types::{Candle, PatternHit, VoteDirection};

const WINDOW: usize = 40;
const MIN_WINDOW: usize = 30;
const RATIO_TOLERANCE: f64 = 0.05;

// ----------------------------------------------------------------------
// Pivots
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum PivotKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy)]
struct Pivot {
    price: f64,
    kind: PivotKind,
}

/// Alternating local extrema of the midpoint series. Strict on the left so
/// flat stretches yield a single pivot; same-kind runs keep the extreme one.
fn find_pivots(mids: &[f64], lookaround: usize) -> Vec<Pivot> {
    let mut raw = Vec::new();
    if mids.len() < 2 * lookaround + 1 {
        return raw;
    }

    for i in lookaround..mids.len() - lookaround {
        let v = mids[i];
        let is_high =
            (1..=lookaround).all(|d| v > mids[i - d] && v >= mids[i + d]);
        let is_low =
            (1..=lookaround).all(|d| v < mids[i - d] && v <= mids[i + d]);
        if is_high {
            raw.push(Pivot {
                price: v,
                kind: PivotKind::High,
            });
        } else if is_low {
            raw.push(Pivot {
                price: v,
                kind: PivotKind::Low,
            });
        }
    }

    // Enforce alternation: collapse same-kind runs to their extreme.
    let mut pivots: Vec<Pivot> = Vec::new();
    for p in raw {
        match pivots.last_mut() {
            Some(last) if last.kind == p.kind => {
                let keep_new = match p.kind {
                    PivotKind::High => p.price > last.price,
                    PivotKind::Low => p.price < last.price,
                };
                if keep_new {
                    *last = p;
                }
            }
            _ => pivots.push(p),
        }
    }
    pivots
}

// ----------------------------------------------------------------------
// Ratio matching
// ----------------------------------------------------------------------

fn ratio_matches(actual: f64, target: f64) -> Option<f64> {
    let err = (actual - target).abs() / target;
    if err <= RATIO_TOLERANCE {
        Some(1.0 - err / RATIO_TOLERANCE)
    } else {
        None
    }
}

struct XABCD {
    x: f64,
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    bullish: bool, // D completes at a low pivot
}

impl XABCD {
    fn xa(&self) -> f64 {
        (self.a - self.x).abs()
    }

    fn ab_retracement(&self) -> Option<f64> {
        if self.xa() == 0.0 {
            return None;
        }
        Some((self.b - self.a).abs() / self.xa())
    }

    /// Distance of D from A measured against the XA leg; > 1 means the
    /// pattern extends past X.
    fn ad_extension(&self) -> Option<f64> {
        if self.xa() == 0.0 {
            return None;
        }
        Some((self.d - self.a).abs() / self.xa())
    }

    fn cd_of_xc(&self) -> Option<f64> {
        let xc = (self.c - self.x).abs();
        if xc == 0.0 {
            return None;
        }
        Some((self.d - self.c).abs() / xc)
    }
}

fn direction_of(structure: &XABCD) -> VoteDirection {
    if structure.bullish {
        VoteDirection::Up
    } else {
        VoteDirection::Down
    }
}

fn classify(structure: &XABCD) -> Option<PatternHit> {
    let ab = structure.ab_retracement()?;
    let ad = structure.ad_extension()?;
    let direction = direction_of(structure);
    let side = if structure.bullish { "Bullish" } else { "Bearish" };

    // Gartley: B at 61.8% of XA, D at 78.6% of XA.
    if let (Some(q1), Some(q2)) = (ratio_matches(ab, 0.618), ratio_matches(ad, 0.786)) {
        let quality = (q1 + q2) / 2.0;
        return Some(PatternHit::new(
            format!("{} Gartley", side),
            direction,
            1.0 + quality,
            "61.8%/78.6% XABCD retracement",
        ));
    }

    // Butterfly: B at 78.6% of XA, D extending to 127.2% or 161.8%.
    if let Some(q1) = ratio_matches(ab, 0.786) {
        for target in [1.272, 1.618] {
            if let Some(q2) = ratio_matches(ad, target) {
                let quality = (q1 + q2) / 2.0;
                return Some(PatternHit::new(
                    format!("{} Butterfly", side),
                    direction,
                    1.0 + quality,
                    "78.6% retracement with extension completion",
                ));
            }
        }
    }

    // Bat: shallow B (under 50% of XA), D at 88.6% of XA.
    if ab < 0.55 {
        if let Some(q) = ratio_matches(ad, 0.886) {
            return Some(PatternHit::new(
                format!("{} Bat", side),
                direction,
                1.0 + q,
                "88.6% completion after shallow retracement",
            ));
        }
    }

    // Crab: deep 161.8% extension completion.
    if let Some(q) = ratio_matches(ad, 1.618) {
        return Some(PatternHit::new(
            format!("{} Crab", side),
            direction,
            1.0 + q,
            "161.8% extension completion",
        ));
    }

    // Cypher: D at 78.6% of the XC leg.
    if let Some(cd) = structure.cd_of_xc() {
        if let Some(q) = ratio_matches(cd, 0.786) {
            return Some(PatternHit::new(
                format!("{} Cypher", side),
                direction,
                1.0 + q,
                "78.6% of XC completion",
            ));
        }
    }

    None
}

/// Detect harmonic formations in the last pivots of the midpoint series.
pub fn detect(candles: &[Candle]) -> Vec<PatternHit> {
    let mut hits = Vec::new();
    if candles.len() < MIN_WINDOW {
        return hits;
    }

    let window = &candles[candles.len().saturating_sub(WINDOW)..];
    let mids: Vec<f64> = window.iter().map(|c| c.midpoint()).collect();
    let pivots = find_pivots(&mids, 2);
    if pivots.len() < 5 {
        return hits;
    }

    let tail = &pivots[pivots.len() - 5..];
    let structure = XABCD {
        x: tail[0].price,
        a: tail[1].price,
        b: tail[2].price,
        c: tail[3].price,
        d: tail[4].price,
        bullish: tail[4].kind == PivotKind::Low,
    };

    if let Some(hit) = classify(&structure) {
        hits.push(hit);
    }
    hits
}
