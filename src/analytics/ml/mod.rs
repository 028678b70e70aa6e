// ML Ensemble - online logistic + boosted stumps + kNN + pattern memory
// Blended P(up) is calibrated, turned into a direction/tier verdict, and
// updated from resolved outcomes. Process-wide singleton, serialized state.

pub mod boosting;
pub mod calibration;
pub mod knn;
pub mod logistic;
pub mod pattern_memory;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock};
use parking_lot::RwLock;
use tracing::debug;

use crate::core::types::{ConfidenceTier, SignalDirection};
use boosting::BoostedStumps;
use calibration::Calibrator;
use knn::KnnMemory;
use logistic::OnlineLogistic;
use pattern_memory::PatternMemory;

const ROLLING_WINDOW: usize = 50;
const TRADE_GATE: f64 = 0.15;
const PATTERN_SHIFT_MAGNITUDE: f64 = 0.2;

// Base blend weights and the pattern-shifted variant.
const BASE_WEIGHTS: [f64; 4] = [0.30, 0.30, 0.20, 0.20];
const PATTERN_WEIGHTS: [f64; 4] = [0.25, 0.25, 0.15, 0.35];

// ============================================================================
// Prediction
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ComponentProbabilities {
    pub logistic: f64,
    pub boosting: f64,
    pub knn: f64,
    pub pattern: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlPrediction {
    pub probability: f64,     // calibrated P(up)
    pub raw_probability: f64, // pre-calibration blend
    pub direction: SignalDirection,
    pub direction_strength: f64, // 2 * |p - 0.5|
    pub confidence: f64,         // 50..92
    pub tier: ConfidenceTier,
    pub components: ComponentProbabilities,
}

impl fmt::Display for MlPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MlPrediction(p={:.3}, dir={}, conf={:.0}, tier={})",
            self.probability, self.direction, self.confidence, self.tier
        )
    }
}

// ============================================================================
// Ensemble
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlEnsemble {
    logistic: OnlineLogistic,
    boosting: BoostedStumps,
    knn: KnnMemory,
    patterns: PatternMemory,
    calibrator: Calibrator,
    recent_correct: VecDeque<bool>,
    updates: u64,
}

impl MlEnsemble {
    pub fn new() -> Self {
        Self {
            logistic: OnlineLogistic::new(),
            boosting: BoostedStumps::new(),
            knn: KnnMemory::new(),
            patterns: PatternMemory::new(),
            calibrator: Calibrator::new(),
            recent_correct: VecDeque::with_capacity(ROLLING_WINDOW),
            updates: 0,
        }
    }

    /// Blend the four learners and derive the trade verdict.
    pub fn predict(&self, features: &[f64]) -> MlPrediction {
        let components = ComponentProbabilities {
            logistic: self.logistic.predict(features),
            boosting: self.boosting.predict(features),
            knn: self.knn.predict(features),
            pattern: self.patterns.predict(features),
        };

        let raw = self.blend(&components);
        let probability = self.calibrator.calibrate(raw).clamp(0.0, 1.0);

        let direction_strength = 2.0 * (probability - 0.5).abs();
        let direction = if direction_strength > TRADE_GATE {
            if probability > 0.5 {
                SignalDirection::Call
            } else {
                SignalDirection::Put
            }
        } else {
            SignalDirection::NoTrade
        };

        let confidence = (50.0 + direction_strength * 42.0).round().clamp(50.0, 92.0);
        let tier = if confidence >= 82.0 {
            ConfidenceTier::Premium
        } else if confidence >= 72.0 {
            ConfidenceTier::Standard
        } else {
            ConfidenceTier::Low
        };

        MlPrediction {
            probability,
            raw_probability: raw,
            direction,
            direction_strength,
            confidence,
            tier,
            components,
        }
    }

    /// Weighted blend; the pattern memory takes a larger share when its
    /// signal is decisive.
    fn blend(&self, components: &ComponentProbabilities) -> f64 {
        let weights = if (components.pattern - 0.5).abs() > PATTERN_SHIFT_MAGNITUDE {
            PATTERN_WEIGHTS
        } else {
            BASE_WEIGHTS
        };
        weights[0] * components.logistic
            + weights[1] * components.boosting
            + weights[2] * components.knn
            + weights[3] * components.pattern
    }

    /// Feed one resolved outcome back into every learner.
    /// `went_up` is the realized direction, independent of signal side.
    pub fn update(&mut self, features: &[f64], went_up: bool) {
        // Score the pre-update prediction for the rolling accuracy first.
        let prediction = self.predict(features);
        let correct = (prediction.probability >= 0.5) == went_up;
        if self.recent_correct.len() >= ROLLING_WINDOW {
            self.recent_correct.pop_front();
        }
        self.recent_correct.push_back(correct);

        let label = if went_up { 1.0 } else { 0.0 };
        self.logistic.update(features, label);
        self.boosting.update(features, label);
        self.knn.update(features, went_up);
        self.patterns.update(features, went_up);
        self.calibrator.record(prediction.raw_probability, went_up);
        self.updates += 1;

        debug!(
            updates = self.updates,
            rolling_accuracy = self.rolling_accuracy(),
            "ML ensemble updated"
        );
    }

    /// Accuracy over the last 50 scored predictions.
    pub fn rolling_accuracy(&self) -> f64 {
        if self.recent_correct.is_empty() {
            return 0.0;
        }
        let correct = self.recent_correct.iter().filter(|&&c| c).count();
        correct as f64 / self.recent_correct.len() as f64
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn logistic_weight_norm(&self) -> f64 {
        self.logistic.weight_norm()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for MlEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_ENSEMBLE: OnceLock<Arc<RwLock<MlEnsemble>>> = OnceLock::new();

/// Get global ML ensemble instance (singleton).
pub fn get_ml_ensemble() -> Arc<RwLock<MlEnsemble>> {
    Arc::clone(GLOBAL_ENSEMBLE.get_or_init(|| Arc::new(RwLock::new(MlEnsemble::new()))))
}
