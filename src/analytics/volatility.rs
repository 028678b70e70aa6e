// Volatility Service - market-stability scoring and the no-trade veto
// Pure scorer over the last 15 candles plus a singleton per-symbol cache.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;

use crate::analytics::indicators;
use crate::core::types::Candle;

const SCORE_WINDOW: usize = 15;
const WICK_WINDOW: usize = 10;
const SPIKE_WINDOW: usize = 5;
pub const VOLATILE_SCORE: f64 = 0.4;

// ATR-to-price tiers
const ATR_MODERATE: f64 = 0.002;
const ATR_HIGH: f64 = 0.004;
const ATR_EXTREME: f64 = 0.008;

// Wick-ratio tiers
const WICK_MODERATE: f64 = 0.5;
const WICK_HIGH: f64 = 0.65;
const WICK_EXTREME: f64 = 0.8;

// Mean-range tiers
const RANGE_MODERATE: f64 = 0.003;
const RANGE_HIGH: f64 = 0.006;

// ============================================================================
// Analysis
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityAnalysis {
    pub wick_ratio: f64,
    pub atr_ratio: f64,
    pub range_ratio: f64,
    pub large_wick_count: u32,
    pub spike_count: u32,
    pub price_stability: f64, // 1.0 = perfectly stable
    pub volatility_score: f64, // 0..1
    pub is_volatile: bool,
}

impl VolatilityAnalysis {
    pub fn calm() -> Self {
        Self {
            wick_ratio: 0.0,
            atr_ratio: 0.0,
            range_ratio: 0.0,
            large_wick_count: 0,
            spike_count: 0,
            price_stability: 1.0,
            volatility_score: 0.0,
            is_volatile: false,
        }
    }

    pub fn is_stable(&self) -> bool {
        !self.is_volatile
    }

    /// Coarse label for the status boundary.
    pub fn severity(&self) -> &'static str {
        if self.volatility_score >= 0.7 {
            "extreme"
        } else if self.volatility_score >= VOLATILE_SCORE {
            "high"
        } else if self.volatility_score >= 0.2 {
            "medium"
        } else {
            "low"
        }
    }
}

impl fmt::Display for VolatilityAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VolatilityAnalysis(score={:.3}, atr={:.5}, wick={:.2}, spikes={}, stability={:.2})",
            self.volatility_score,
            self.atr_ratio,
            self.wick_ratio,
            self.spike_count,
            self.price_stability
        )
    }
}

/// Verdict of the stricter veto check.
#[derive(Debug, Clone)]
pub struct NoTradeVerdict {
    pub no_trade: bool,
    pub reason: Option<String>,
}

impl NoTradeVerdict {
    fn trade() -> Self {
        Self {
            no_trade: false,
            reason: None,
        }
    }

    fn veto(reason: impl Into<String>) -> Self {
        Self {
            no_trade: true,
            reason: Some(reason.into()),
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Score market volatility from the last 15 candles.
pub fn analyze(candles: &[Candle]) -> VolatilityAnalysis {
    if candles.len() < SCORE_WINDOW {
        return VolatilityAnalysis::calm();
    }
    let window = &candles[candles.len() - SCORE_WINDOW..];
    let price = window.last().map(|c| c.close).unwrap_or(0.0);
    if price <= 0.0 {
        return VolatilityAnalysis::calm();
    }

    // Wick dominance across the window.
    let total_wicks: f64 = window
        .iter()
        .map(|c| c.upper_wick() + c.lower_wick())
        .sum();
    let total_bodies: f64 = window.iter().map(|c| c.body()).sum();
    let wick_ratio = if total_wicks + total_bodies > 0.0 {
        total_wicks / (total_wicks + total_bodies)
    } else {
        0.0
    };

    let atr_ratio = indicators::atr(candles, 14).map(|a| a / price).unwrap_or(0.0);

    let range_ratio = window
        .iter()
        .filter(|c| c.low > 0.0)
        .map(|c| (c.high - c.low) / c.low)
        .sum::<f64>()
        / window.len() as f64;

    let large_wick_count = large_wick_count(window);
    let spike_count = spike_count(window);
    let price_stability = price_stability(window);

    // Weighted component sum.
    let mut score = 0.0;
    score += if atr_ratio > ATR_EXTREME {
        0.50
    } else if atr_ratio > ATR_HIGH {
        0.35
    } else if atr_ratio > ATR_MODERATE {
        0.15
    } else {
        0.0
    };
    score += if wick_ratio > WICK_EXTREME {
        0.40
    } else if wick_ratio > WICK_HIGH {
        0.25
    } else if wick_ratio > WICK_MODERATE {
        0.10
    } else {
        0.0
    };
    score += if range_ratio > RANGE_HIGH {
        0.35
    } else if range_ratio > RANGE_MODERATE {
        0.20
    } else {
        0.0
    };
    score += (spike_count as f64 * 0.08).min(0.25);
    score += (large_wick_count as f64 * 0.03).min(0.15);
    if price_stability < 0.4 {
        score += 0.15;
    }
    let volatility_score = score.min(1.0);

    VolatilityAnalysis {
        wick_ratio,
        atr_ratio,
        range_ratio,
        large_wick_count,
        spike_count,
        price_stability,
        volatility_score,
        is_volatile: volatility_score >= VOLATILE_SCORE,
    }
}

/// Last 10 candles whose wicks overwhelm the body or whose range dwarfs
/// the window average.
fn large_wick_count(window: &[Candle]) -> u32 {
    let avg_range = window.iter().map(|c| c.range()).sum::<f64>() / window.len() as f64;
    let tail = &window[window.len() - WICK_WINDOW..];
    tail.iter()
        .filter(|c| {
            let wick = c.upper_wick() + c.lower_wick();
            (c.body() > 0.0 && wick > 1.5 * c.body()) || c.range() > 2.5 * avg_range
        })
        .count() as u32
}

/// Last 5 candle ranges exceeding three times the prior-10 mean range.
fn spike_count(window: &[Candle]) -> u32 {
    let split = window.len() - SPIKE_WINDOW;
    let prior = &window[..split];
    let recent = &window[split..];
    let prior_mean = prior.iter().map(|c| c.range()).sum::<f64>() / prior.len() as f64;
    if prior_mean <= 0.0 {
        return 0;
    }
    recent
        .iter()
        .filter(|c| c.range() > 3.0 * prior_mean)
        .count() as u32
}

/// Stability from close-to-close direction changes and the longest run of
/// same-direction moves.
fn price_stability(window: &[Candle]) -> f64 {
    if window.len() < 3 {
        return 1.0;
    }

    let mut changes = 0u32;
    let mut longest_run = 1u32;
    let mut current_run = 1u32;
    let mut prev_up: Option<bool> = None;

    for w in window.windows(2) {
        let up = w[1].close >= w[0].close;
        match prev_up {
            Some(p) if p == up => {
                current_run += 1;
                longest_run = longest_run.max(current_run);
            }
            Some(_) => {
                changes += 1;
                current_run = 1;
            }
            None => {}
        }
        prev_up = Some(up);
    }

    let comparisons = (window.len() - 2) as f64;
    let change_ratio = if comparisons > 0.0 {
        changes as f64 / comparisons
    } else {
        0.0
    };
    let run_component = (longest_run as f64 / window.len() as f64).min(1.0);

    ((1.0 - change_ratio) * 0.7 + run_component * 0.3).clamp(0.0, 1.0)
}

// ============================================================================
// Veto
// ============================================================================

/// The stricter veto consulted before any directional emission.
pub fn should_no_trade(candles: &[Candle]) -> NoTradeVerdict {
    if candles.len() < SCORE_WINDOW {
        return NoTradeVerdict::trade();
    }
    let analysis = analyze(candles);

    if analysis.atr_ratio > ATR_EXTREME {
        return NoTradeVerdict::veto(format!(
            "Extreme volatility: ATR ratio {:.4} beyond limit",
            analysis.atr_ratio
        ));
    }
    if analysis.atr_ratio > ATR_HIGH && analysis.spike_count >= 3 {
        return NoTradeVerdict::veto(format!(
            "Extreme volatility: high ATR with {} price spikes",
            analysis.spike_count
        ));
    }
    if analysis.wick_ratio > WICK_EXTREME && analysis.large_wick_count >= 4 {
        return NoTradeVerdict::veto(format!(
            "Extreme wick ratio {:.2} with {} oversized wicks",
            analysis.wick_ratio, analysis.large_wick_count
        ));
    }
    if analysis.spike_count >= 4 && analysis.price_stability < 0.25 {
        return NoTradeVerdict::veto(format!(
            "Price spikes in unstable market: {} spikes, stability {:.2}",
            analysis.spike_count, analysis.price_stability
        ));
    }
    if analysis.price_stability < 0.2
        && analysis.large_wick_count >= 5
        && analysis.atr_ratio > ATR_HIGH
    {
        return NoTradeVerdict::veto(
            "Unstable market with oversized wicks and high ATR".to_string(),
        );
    }

    NoTradeVerdict::trade()
}

// ============================================================================
// Cache
// ============================================================================

/// Latest analysis per symbol. Single writer (the candle-close handler);
/// the tracker's re-check loop and the status boundary read snapshots.
pub struct VolatilityCache {
    entries: RwLock<HashMap<String, (VolatilityAnalysis, i64)>>,
    last_update: RwLock<Option<i64>>,
}

impl VolatilityCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            last_update: RwLock::new(None),
        }
    }

    pub fn update(&self, symbol: &str, analysis: VolatilityAnalysis, epoch: i64) {
        self.entries
            .write()
            .insert(symbol.to_string(), (analysis, epoch));
        *self.last_update.write() = Some(epoch);
    }

    pub fn latest(&self, symbol: &str) -> Option<VolatilityAnalysis> {
        self.entries.read().get(symbol).map(|(a, _)| a.clone())
    }

    pub fn all(&self) -> Vec<(String, VolatilityAnalysis)> {
        self.entries
            .read()
            .iter()
            .map(|(s, (a, _))| (s.clone(), a.clone()))
            .collect()
    }

    pub fn last_update_epoch(&self) -> Option<i64> {
        *self.last_update.read()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
        *self.last_update.write() = None;
    }
}

impl Default for VolatilityCache {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_VOLATILITY_CACHE: OnceLock<Arc<VolatilityCache>> = OnceLock::new();

/// Get global volatility cache instance (singleton).
pub fn get_volatility_cache() -> Arc<VolatilityCache> {
    Arc::clone(GLOBAL_VOLATILITY_CACHE.get_or_init(|| Arc::new(VolatilityCache::new())))
}
