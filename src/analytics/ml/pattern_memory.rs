// Discrete Pattern Memory - win statistics per market-state signature
// Features collapse into a 6-symbol signature; each entry decays per update
// so stale regimes fade only as new evidence arrives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const DECAY: f64 = 0.995;
const EVICTION_FLOOR: f64 = 0.1;
const MIN_TOTAL_FOR_SIGNAL: f64 = 1.0;

// Feature-vector indices used for discretization.
const IDX_RSI: usize = 3;
const IDX_MACD_CROSS: usize = 6;
const IDX_TREND_DIRECTION: usize = 10;
const IDX_VOLUME_RATIO: usize = 14;
const IDX_BULL_PATTERNS: usize = 19;
const IDX_BEAR_PATTERNS: usize = 20;
const IDX_IS_RANGING: usize = 21;
const IDX_IS_TRENDING: usize = 22;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SignatureStats {
    wins: f64,
    total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMemory {
    signatures: HashMap<String, SignatureStats>,
}

impl PatternMemory {
    pub fn new() -> Self {
        Self {
            signatures: HashMap::new(),
        }
    }

    /// Collapse the normalized vector into the 6-symbol signature:
    /// RSI zone, MACD cross sign, trend sign, dominant pattern class,
    /// regime class, volume level.
    pub fn signature(features: &[f64]) -> String {
        let rsi = features.get(IDX_RSI).copied().unwrap_or(0.5) * 100.0;
        let rsi_zone = if rsi < 30.0 {
            "os"
        } else if rsi > 70.0 {
            "ob"
        } else {
            "nt"
        };

        let macd = match features.get(IDX_MACD_CROSS).copied().unwrap_or(0.0) {
            x if x > 0.0 => "m+",
            x if x < 0.0 => "m-",
            _ => "m0",
        };

        let trend = match features.get(IDX_TREND_DIRECTION).copied().unwrap_or(0.0) {
            x if x > 0.0 => "t+",
            x if x < 0.0 => "t-",
            _ => "t0",
        };

        let bull = features.get(IDX_BULL_PATTERNS).copied().unwrap_or(0.0);
        let bear = features.get(IDX_BEAR_PATTERNS).copied().unwrap_or(0.0);
        let pattern = if bull > bear + 0.1 {
            "pb"
        } else if bear > bull + 0.1 {
            "ps"
        } else {
            "p0"
        };

        let regime = if features.get(IDX_IS_TRENDING).copied().unwrap_or(0.0) > 0.5 {
            "rt"
        } else if features.get(IDX_IS_RANGING).copied().unwrap_or(0.0) > 0.5 {
            "rr"
        } else {
            "rc"
        };

        let volume = features.get(IDX_VOLUME_RATIO).copied().unwrap_or(0.33) * 3.0;
        let volume_level = if volume > 1.5 {
            "vh"
        } else if volume < 0.6 {
            "vl"
        } else {
            "vn"
        };

        format!(
            "{}|{}|{}|{}|{}|{}",
            rsi_zone, macd, trend, pattern, regime, volume_level
        )
    }

    /// P(up) for the signature; 0.5 until the entry has enough weight.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let key = Self::signature(features);
        match self.signatures.get(&key) {
            Some(stats) if stats.total >= MIN_TOTAL_FOR_SIGNAL => stats.wins / stats.total,
            _ => 0.5,
        }
    }

    pub fn update(&mut self, features: &[f64], label_up: bool) {
        // Multiplicative decay on every entry, then evict faded ones.
        for stats in self.signatures.values_mut() {
            stats.wins *= DECAY;
            stats.total *= DECAY;
        }
        self.signatures.retain(|_, stats| stats.total >= EVICTION_FLOOR);

        let key = Self::signature(features);
        let entry = self
            .signatures
            .entry(key)
            .or_insert(SignatureStats { wins: 0.0, total: 0.0 });
        if label_up {
            entry.wins += 1.0;
        }
        entry.total += 1.0;
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

impl Default for PatternMemory {
    fn default() -> Self {
        Self::new()
    }
}
