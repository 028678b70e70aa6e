// Adaptive Thresholds - win/loss-driven tightening of the signal gates
// Process-wide state consulted by the brain before any ML vote is admitted.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;
use tracing::{debug, info};

const WINDOW_CAPACITY: usize = 30;
const ENTRY_MAX_AGE_SECS: i64 = 2 * 60 * 60;
const ADJUST_COOLDOWN_SECS: i64 = 5 * 60;
const MIN_SAMPLES_FOR_ADJUST: usize = 10;

// ============================================================================
// Threshold Set
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub min_confidence: f64,
    pub max_conflict_ratio: f64,
    pub min_trend_strength: f64,
    pub min_aligned_indicators: u32,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            min_confidence: 72.0,
            max_conflict_ratio: 0.32,
            min_trend_strength: 0.42,
            min_aligned_indicators: 4,
        }
    }
}

impl fmt::Display for ThresholdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ThresholdSet(conf={:.0}, conflict={:.2}, trend={:.2}, aligned={})",
            self.min_confidence,
            self.max_conflict_ratio,
            self.min_trend_strength,
            self.min_aligned_indicators
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct OutcomeEntry {
    won: bool,
    confidence: f64,
    epoch: i64,
}

// ============================================================================
// Adaptive Thresholds
// ============================================================================

/// Sliding-window gate state. All mutation goes through `record_outcome`;
/// `is_allowed` is the admission check used at signal time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveThresholds {
    base: ThresholdSet,
    current: ThresholdSet,
    window: VecDeque<OutcomeEntry>,
    loss_streak: u32,
    last_adjustment_epoch: Option<i64>,
    outcomes_recorded: u64,
}

impl AdaptiveThresholds {
    pub fn new(base: ThresholdSet) -> Self {
        Self {
            base,
            current: base,
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
            loss_streak: 0,
            last_adjustment_epoch: None,
            outcomes_recorded: 0,
        }
    }

    pub fn current(&self) -> ThresholdSet {
        self.current
    }

    pub fn base(&self) -> ThresholdSet {
        self.base
    }

    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Record one resolved outcome and run the adjustment rules.
    pub fn record_outcome(&mut self, won: bool, confidence: f64, epoch: i64) {
        self.outcomes_recorded += 1;
        if won {
            self.loss_streak = 0;
        } else {
            self.loss_streak += 1;
        }

        if self.window.len() >= WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(OutcomeEntry {
            won,
            confidence,
            epoch,
        });
        self.prune(epoch);

        let cooldown_elapsed = self
            .last_adjustment_epoch
            .map(|last| epoch - last >= ADJUST_COOLDOWN_SECS)
            .unwrap_or(true);
        if !cooldown_elapsed {
            return;
        }

        // Emergency tightening fires on a loss streak regardless of the
        // sample minimum.
        if self.loss_streak >= 3 {
            self.current.min_confidence = (self.current.min_confidence + 3.0).min(88.0);
            self.current.min_aligned_indicators =
                (self.current.min_aligned_indicators + 1).min(7);
            self.last_adjustment_epoch = Some(epoch);
            info!(
                loss_streak = self.loss_streak,
                thresholds = %self.current,
                "Emergency threshold tightening"
            );
            return;
        }

        if self.window.len() < MIN_SAMPLES_FOR_ADJUST {
            return;
        }

        let recent15 = self.recent_win_rate(15);
        if recent15 < 0.65 {
            self.current.min_confidence = (self.current.min_confidence + 2.0).min(85.0);
            self.current.max_conflict_ratio =
                (self.current.max_conflict_ratio - 0.02).max(0.20);
            self.current.min_trend_strength =
                (self.current.min_trend_strength + 0.03).min(0.55);
            self.current.min_aligned_indicators =
                (self.current.min_aligned_indicators + 1).min(6);
            self.last_adjustment_epoch = Some(epoch);
            debug!(win_rate = recent15, thresholds = %self.current, "Thresholds tightened");
        } else if recent15 > 0.80 && self.window.len() >= 15 {
            self.current.min_confidence =
                (self.current.min_confidence - 1.0).max(self.base.min_confidence);
            self.current.max_conflict_ratio =
                (self.current.max_conflict_ratio + 0.01).min(self.base.max_conflict_ratio);
            self.current.min_trend_strength =
                (self.current.min_trend_strength - 0.01).max(self.base.min_trend_strength);
            self.current.min_aligned_indicators = self
                .current
                .min_aligned_indicators
                .saturating_sub(1)
                .max(self.base.min_aligned_indicators);
            self.last_adjustment_epoch = Some(epoch);
            debug!(win_rate = recent15, thresholds = %self.current, "Thresholds relaxed");
        }
    }

    /// Admission check consulted at signal time.
    pub fn is_allowed(&self, confidence: f64) -> bool {
        if self.loss_streak >= 4 {
            let floor = (self.current.min_confidence + 5.0).min(90.0);
            if confidence < floor {
                return false;
            }
        }
        if self.window.len() >= MIN_SAMPLES_FOR_ADJUST && self.recent_win_rate(10) < 0.50 {
            return false;
        }
        confidence >= self.current.min_confidence
    }

    fn prune(&mut self, now_epoch: i64) {
        let cutoff = now_epoch - ENTRY_MAX_AGE_SECS;
        while let Some(front) = self.window.front() {
            if front.epoch < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn recent_win_rate(&self, n: usize) -> f64 {
        let take = self.window.len().min(n);
        if take == 0 {
            return 0.0;
        }
        let wins = self
            .window
            .iter()
            .rev()
            .take(take)
            .filter(|e| e.won)
            .count();
        wins as f64 / take as f64
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.window.clear();
        self.loss_streak = 0;
        self.last_adjustment_epoch = None;
    }
}

impl Default for AdaptiveThresholds {
    fn default() -> Self {
        Self::new(ThresholdSet::default())
    }
}

static GLOBAL_THRESHOLDS: OnceLock<Arc<RwLock<AdaptiveThresholds>>> = OnceLock::new();

/// Get global adaptive thresholds instance (singleton).
pub fn get_adaptive_thresholds() -> Arc<RwLock<AdaptiveThresholds>> {
    Arc::clone(GLOBAL_THRESHOLDS.get_or_init(|| {
        Arc::new(RwLock::new(AdaptiveThresholds::default()))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let thresholds = AdaptiveThresholds::default();
        let current = thresholds.current();
        assert_eq!(current.min_confidence, 72.0);
        assert_eq!(current.max_conflict_ratio, 0.32);
        assert_eq!(current.min_trend_strength, 0.42);
        assert_eq!(current.min_aligned_indicators, 4);
    }

    #[test]
    fn test_confidence_gate() {
        let thresholds = AdaptiveThresholds::default();
        assert!(thresholds.is_allowed(72.0));
        assert!(thresholds.is_allowed(90.0));
        assert!(!thresholds.is_allowed(71.9));
    }

    #[test]
    fn test_tighten_on_poor_win_rate() {
        let mut thresholds = AdaptiveThresholds::default();
        // Alternate W/L: win rate 0.5 < 0.65 once samples reach 10.
        let mut epoch = 0;
        for i in 0..10 {
            thresholds.record_outcome(i % 2 == 0, 75.0, epoch);
            epoch += 10;
        }
        let current = thresholds.current();
        assert!(current.min_confidence > 72.0);
        assert!(current.max_conflict_ratio < 0.32);
        assert!(current.min_aligned_indicators >= 5);
    }

    #[test]
    fn test_adjustment_cooldown() {
        let mut thresholds = AdaptiveThresholds::default();
        let mut epoch = 0;
        for i in 0..10 {
            thresholds.record_outcome(i % 2 == 0, 75.0, epoch);
            epoch += 10;
        }
        let after_first = thresholds.current();

        // Within the cooldown window nothing further moves.
        thresholds.record_outcome(false, 75.0, epoch);
        assert_eq!(thresholds.current(), after_first);

        // After the cooldown the rules fire again.
        thresholds.record_outcome(false, 75.0, epoch + ADJUST_COOLDOWN_SECS + 1);
        assert_ne!(thresholds.current(), after_first);
    }

    #[test]
    fn test_emergency_tightening_on_loss_streak() {
        let mut thresholds = AdaptiveThresholds::default();
        thresholds.record_outcome(false, 75.0, 0);
        thresholds.record_outcome(false, 75.0, 10);
        thresholds.record_outcome(false, 75.0, 20);
        assert_eq!(thresholds.loss_streak(), 3);
        assert_eq!(thresholds.current().min_confidence, 75.0);
        assert_eq!(thresholds.current().min_aligned_indicators, 5);
    }

    #[test]
    fn test_loss_streak_denial() {
        let mut thresholds = AdaptiveThresholds::default();
        for i in 0..4 {
            thresholds.record_outcome(false, 75.0, i * 10);
        }
        assert_eq!(thresholds.loss_streak(), 4);
        // After the emergency bump min_confidence is 75; the streak floor
        // is min(90, 75 + 5) = 80.
        assert!(!thresholds.is_allowed(79.0));
        assert!(thresholds.is_allowed(81.0));
    }

    #[test]
    fn test_relax_toward_base() {
        let mut thresholds = AdaptiveThresholds::default();
        let mut epoch = 0;

        // First tighten with a poor stretch.
        for i in 0..10 {
            thresholds.record_outcome(i % 2 == 0, 75.0, epoch);
            epoch += 10;
        }
        let tightened = thresholds.current();
        assert!(tightened.min_confidence > 72.0);

        // Then a long winning stretch relaxes toward base, never past it.
        for _ in 0..40 {
            epoch += ADJUST_COOLDOWN_SECS + 1;
            thresholds.record_outcome(true, 80.0, epoch);
        }
        let relaxed = thresholds.current();
        assert!(relaxed.min_confidence <= tightened.min_confidence);
        assert!(relaxed.min_confidence >= thresholds.base().min_confidence);
        assert!(relaxed.min_aligned_indicators >= thresholds.base().min_aligned_indicators);
    }

    #[test]
    fn test_window_prunes_stale_entries() {
        let mut thresholds = AdaptiveThresholds::default();
        thresholds.record_outcome(true, 80.0, 0);
        thresholds.record_outcome(true, 80.0, 10);
        assert_eq!(thresholds.sample_count(), 2);

        // Two hours later the old entries fall out.
        thresholds.record_outcome(true, 80.0, ENTRY_MAX_AGE_SECS + 20);
        assert_eq!(thresholds.sample_count(), 1);
    }

    #[test]
    fn test_poor_recent_win_rate_denies() {
        let mut thresholds = AdaptiveThresholds::default();
        let mut epoch = 0;
        // 3 wins then 7 losses: recent-10 win rate 0.3 < 0.5.
        for i in 0..10 {
            thresholds.record_outcome(i < 3, 75.0, epoch);
            epoch += 10;
        }
        assert!(!thresholds.is_allowed(95.0) || thresholds.loss_streak() < 4);
        // The win-rate denial applies regardless of confidence.
        assert!(!thresholds.is_allowed(95.0));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let mut thresholds = AdaptiveThresholds::default();
        let outcomes = [true, false, false, true, false, true, true, false];
        let mut epoch = 0;
        for &won in &outcomes {
            thresholds.record_outcome(won, 76.0, epoch);
            epoch += 30;
        }

        // Re-feeding the same sequence from a fresh default reproduces
        // the identical final state.
        let mut replay = AdaptiveThresholds::default();
        let mut epoch = 0;
        for &won in &outcomes {
            replay.record_outcome(won, 76.0, epoch);
            epoch += 30;
        }
        assert_eq!(
            serde_json::to_string(&thresholds).unwrap(),
            serde_json::to_string(&replay).unwrap()
        );
    }
}
