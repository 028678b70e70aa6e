// Analytics - indicator computation through signal generation
// Pure stages (indicators, patterns, features) feed stateful ones
// (ML ensemble, adaptive thresholds) under the signal engine.

pub mod indicators;
pub mod patterns;
pub mod psychology;
pub mod features;
pub mod ml;
pub mod thresholds;
pub mod volatility;
pub mod regime;
pub mod brain;
pub mod engine;

pub use engine::SignalEngine;
pub use features::{FeatureRecord, FEATURE_COUNT};
pub use indicators::IndicatorValues;
pub use ml::{get_ml_ensemble, MlEnsemble, MlPrediction};
pub use regime::{MarketRegime, RegimeAnalysis};
pub use thresholds::{get_adaptive_thresholds, AdaptiveThresholds, ThresholdSet};
pub use volatility::{get_volatility_cache, VolatilityAnalysis, VolatilityCache};
