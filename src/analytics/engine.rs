// Signal Engine - single entry orchestrating the analytics pipeline
// indicators -> psychology -> regime -> votes -> strategy heads -> ML fusion
// -> validation -> confidence -> emission. Every failure path degrades to
// NO_TRADE; nothing in here panics on market data.

use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::analytics::brain::{self, ConfidenceVariation, MlAgreement};
use crate::analytics::features;
use crate::analytics::indicators;
use crate::analytics::ml::{get_ml_ensemble, MlEnsemble};
use crate::analytics::psychology;
use crate::analytics::regime::{self, MarketRegime, PriceAction, VolatilityLevel};
use crate::analytics::thresholds::{get_adaptive_thresholds, AdaptiveThresholds};
use crate::analytics::volatility::{self, get_volatility_cache, VolatilityCache};
use crate::core::config::{EngineConfig, SessionOptions};
use crate::core::types::{
    Candle, ConfidenceTier, SignalDirection, SignalResult, Vote, VoteDirection,
};

const ML_VOTE_NAME: &str = "ML_ENSEMBLE";

pub struct SignalEngine {
    config: EngineConfig,
    variation: Mutex<ConfidenceVariation>,
    ensemble: Arc<RwLock<MlEnsemble>>,
    thresholds: Arc<RwLock<AdaptiveThresholds>>,
    volatility_cache: Arc<VolatilityCache>,
}

impl SignalEngine {
    /// Engine wired to the process-wide ML/threshold/volatility singletons.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_state(
            config,
            get_ml_ensemble(),
            get_adaptive_thresholds(),
            get_volatility_cache(),
        )
    }

    /// Engine with explicit state, used by tests and embedded setups.
    pub fn with_state(
        config: EngineConfig,
        ensemble: Arc<RwLock<MlEnsemble>>,
        thresholds: Arc<RwLock<AdaptiveThresholds>>,
        volatility_cache: Arc<VolatilityCache>,
    ) -> Self {
        Self {
            config,
            variation: Mutex::new(ConfidenceVariation::new()),
            ensemble,
            thresholds,
            volatility_cache,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn volatility_cache(&self) -> &Arc<VolatilityCache> {
        &self.volatility_cache
    }

    /// Generate one signal for a closed candle. Pure with respect to market
    /// data; ML and threshold state are read but never mutated here.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        &self,
        session_id: &str,
        symbol: &str,
        timeframe_secs: i64,
        closed: &[Candle],
        forming: Option<&Candle>,
        candle_close_time: i64,
        options: &SessionOptions,
    ) -> SignalResult {
        let mut result = SignalResult::no_trade(
            session_id,
            symbol,
            timeframe_secs,
            candle_close_time,
            candle_close_time,
            closed.len(),
        );

        // Step 0: history precondition.
        if closed.len() < self.config.min_closed_candles {
            debug!(
                symbol = symbol,
                closed = closed.len(),
                "Insufficient history for signal generation"
            );
            return result;
        }

        // Step 1: regime gate on closed candles only.
        let closed_values = indicators::compute_all(closed);
        let closed_regime = regime::detect(closed, &closed_values);
        if closed_regime.regime == MarketRegime::Choppy {
            return result.with_veto(format!("Choppy market: {}", closed_regime.reason));
        }
        if closed_regime.volatility_level == VolatilityLevel::High
            && closed_regime.price_action != PriceAction::Clean
        {
            return result.with_veto("High volatility with unclean price action");
        }

        // Step 2: prediction snapshot including the forming candle.
        let mut estimated: Vec<Candle> = closed.to_vec();
        if let Some(forming) = forming {
            estimated.push(forming.clone());
        }

        let values = indicators::compute_all(&estimated);
        let psych = psychology::analyze(&estimated);
        let reg = regime::detect(&estimated, &values);

        let vol = volatility::analyze(&estimated);
        self.volatility_cache
            .update(symbol, vol.clone(), candle_close_time);

        result.indicators = values.clone();
        result.psychology = psych.clone();
        result.forming_candle = forming.cloned();
        result.entry_price = forming.map(|c| c.close);

        let verdict = volatility::should_no_trade(&estimated);
        if verdict.no_trade {
            return result
                .with_veto(verdict.reason.unwrap_or_else(|| "volatility veto".to_string()));
        }

        // Steps 3-5: indicator votes plus strategy heads.
        let mut votes = brain::indicator_votes(&estimated, &values, &psych, options, &self.config);
        votes.extend(brain::strategy_votes(&estimated, &values, &psych, &reg));

        // Step 6: ML fusion gated by the adaptive thresholds.
        let feature_record = features::extract(&estimated, &values, &psych, &reg);
        let prediction = self.ensemble.read().predict(&feature_record.vector);
        let gate = self.thresholds.read().current();

        let ml_direction = prediction.direction;
        let mut ml_agreement = MlAgreement::Absent;
        if ml_direction.is_directional() {
            let allowed = self.thresholds.read().is_allowed(prediction.confidence);
            if !allowed {
                result.votes = votes;
                result.p_up = prediction.probability;
                result.p_down = 1.0 - prediction.probability;
                return result.with_veto(format!(
                    "ML verdict blocked by adaptive thresholds at confidence {:.0}",
                    prediction.confidence
                ));
            }
            let weight = match prediction.tier {
                ConfidenceTier::Premium => 2.0,
                ConfidenceTier::Standard => 1.5,
                ConfidenceTier::Low => 1.0,
            };
            let direction = match ml_direction {
                SignalDirection::Call => VoteDirection::Up,
                SignalDirection::Put => VoteDirection::Down,
                SignalDirection::NoTrade => VoteDirection::Neutral,
            };
            votes.push(Vote::new(
                ML_VOTE_NAME,
                direction,
                weight,
                format!("ensemble p_up {:.3} ({})", prediction.probability, prediction.tier),
            ));
        }

        // Step 6b: re-derive the pool aggregates with the ML vote included.
        let tally = brain::tally(&votes);
        let quality = brain::quality_score(&tally, &reg);
        let direction_strength = 2.0 * (tally.p_up - 0.5).abs();

        result.votes = votes.clone();
        result.p_up = tally.p_up;
        result.p_down = 1.0 - tally.p_up;
        result.feature_vector = feature_record.vector.clone();

        let candidate = tally.majority;
        let candidate_signal = candidate.as_signal();
        if candidate == VoteDirection::Neutral {
            result.is_low_confidence = true;
            return result;
        }

        if ml_direction.is_directional() {
            ml_agreement = if ml_direction == candidate_signal {
                if prediction.tier == ConfidenceTier::Premium {
                    MlAgreement::Strong
                } else {
                    MlAgreement::Partial
                }
            } else {
                MlAgreement::Disagrees
            };
        }

        // Step 7: validation.
        let validation = brain::validate(
            candidate,
            &tally,
            quality,
            &values,
            &reg,
            &self.config,
            gate.max_conflict_ratio,
            gate.min_aligned_indicators,
        );

        // Regime direction veto rides on top of validation.
        let regime_allows = reg.allows_direction(candidate_signal);

        if !validation.valid || !regime_allows {
            result.is_low_confidence = true;
            result.suggested_direction = Some(candidate_signal);
            if !regime_allows {
                result.volatility_override = true;
                result.volatility_reason =
                    Some(format!("{} forbidden against {} regime", candidate_signal, reg.regime));
            } else if let Some(reason) = validation.reasons.first() {
                result.volatility_reason = Some(reason.clone());
            }
            return result;
        }

        // Step 8: confidence with per-symbol variation (cosmetic only: the
        // admission decision below uses the pre-variation value).
        let pre_jitter =
            brain::final_confidence(&tally, quality, &validation, &reg, ml_agreement);

        // Step 9: emission.
        if pre_jitter < gate.min_confidence || direction_strength < self.config.min_direction_strength {
            let varied = self
                .variation
                .lock()
                .apply(symbol, pre_jitter, candle_close_time);
            result.confidence = varied.min(gate.min_confidence - 0.1).max(0.0);
            result.is_low_confidence = true;
            result.suggested_direction = Some(candidate_signal);
            return result;
        }

        let varied = self
            .variation
            .lock()
            .apply(symbol, pre_jitter, candle_close_time);
        result.direction = candidate_signal;
        result.confidence = varied.clamp(gate.min_confidence, 95.0);
        debug!(
            symbol = symbol,
            direction = %result.direction,
            confidence = result.confidence,
            quality = quality,
            "Signal generated"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::thresholds::ThresholdSet;
    use crate::core::types::Tick;

    fn candle(open: f64, high: f64, low: f64, close: f64, epoch: i64) -> Candle {
        Candle {
            symbol: "EURUSD".to_string(),
            timeframe_secs: 60,
            open,
            high,
            low,
            close,
            start_epoch: epoch,
            tick_count: 10,
            is_forming: false,
        }
    }

    fn uptrend(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.05;
                candle(base, base + 0.06, base - 0.02, base + 0.045, i as i64 * 60)
            })
            .collect()
    }

    fn forming_from(closed: &[Candle]) -> Candle {
        let last = closed.last().unwrap();
        let mut forming = Candle::from_tick(
            &Tick::new("EURUSD", last.close + 0.03, last.end_epoch()),
            60,
        );
        forming.apply_tick(last.close + 0.05);
        forming
    }

    fn test_engine() -> SignalEngine {
        SignalEngine::with_state(
            EngineConfig::default(),
            Arc::new(RwLock::new(MlEnsemble::new())),
            Arc::new(RwLock::new(AdaptiveThresholds::new(ThresholdSet::default()))),
            Arc::new(VolatilityCache::new()),
        )
    }

    #[test]
    fn test_insufficient_history() {
        let engine = test_engine();
        let closed = uptrend(49);
        let forming = forming_from(&closed);
        let result = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            Some(&forming),
            3000,
            &SessionOptions::default(),
        );
        assert_eq!(result.direction, SignalDirection::NoTrade);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.closed_candles_count, 49);
        assert!(result.votes.is_empty());
        assert!(!result.volatility_override);
    }

    #[test]
    fn test_choppy_market_vetoed() {
        let engine = test_engine();
        let closed: Vec<Candle> = (0..60)
            .map(|i| {
                if i % 2 == 0 {
                    candle(100.0, 101.5, 98.5, 100.4, i as i64 * 60)
                } else {
                    candle(100.4, 101.8, 98.7, 100.0, i as i64 * 60)
                }
            })
            .collect();
        let forming = forming_from(&closed);
        let result = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            Some(&forming),
            3600,
            &SessionOptions::default(),
        );
        assert_eq!(result.direction, SignalDirection::NoTrade);
        assert!(result.volatility_override);
        assert!(result.volatility_reason.is_some());
    }

    #[test]
    fn test_generate_populates_analysis_fields() {
        let engine = test_engine();
        let closed = uptrend(80);
        let forming = forming_from(&closed);
        let result = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            Some(&forming),
            forming.start_epoch,
            &SessionOptions::default(),
        );
        assert_eq!(result.closed_candles_count, 80);
        assert!(result.indicators.rsi14.is_some());
        assert!(!result.votes.is_empty());
        assert!(result.entry_price.is_some());
        assert!(result.forming_candle.is_some());
        assert!(result.p_up > 0.0 && result.p_up < 1.0);
        assert!((result.p_up + result.p_down - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_generate_idempotent_with_fixed_state() {
        let engine = test_engine();
        let closed = uptrend(80);
        let forming = forming_from(&closed);
        let options = SessionOptions::default();

        let a = engine.generate("s", "EURUSD", 60, &closed, Some(&forming), 4800, &options);
        let b = engine.generate("s", "EURUSD", 60, &closed, Some(&forming), 4800, &options);
        assert_eq!(a.direction, b.direction);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.p_up, b.p_up);
        assert_eq!(a.votes.len(), b.votes.len());
    }

    #[test]
    fn test_directional_confidence_respects_gate() {
        let engine = test_engine();
        let closed = uptrend(80);
        let forming = forming_from(&closed);
        let result = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            Some(&forming),
            4800,
            &SessionOptions::default(),
        );
        let gate = engine.thresholds.read().current().min_confidence;
        if result.direction.is_directional() {
            assert!(result.confidence >= gate);
            assert!(result.confidence <= 95.0);
        } else {
            assert!(result.is_low_confidence || result.volatility_override);
        }
    }

    #[test]
    fn test_low_confidence_carries_suggestion() {
        // Tighten the gate so far no setup can pass it.
        let thresholds = Arc::new(RwLock::new(AdaptiveThresholds::new(ThresholdSet {
            min_confidence: 93.0,
            ..ThresholdSet::default()
        })));
        let engine = SignalEngine::with_state(
            EngineConfig::default(),
            Arc::new(RwLock::new(MlEnsemble::new())),
            thresholds,
            Arc::new(VolatilityCache::new()),
        );
        let closed = uptrend(80);
        let forming = forming_from(&closed);
        let result = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            Some(&forming),
            4800,
            &SessionOptions::default(),
        );
        assert_eq!(result.direction, SignalDirection::NoTrade);
        if result.is_low_confidence {
            assert!(result.suggested_direction.is_some());
        }
    }

    #[test]
    fn test_volatility_cache_updated() {
        let cache = Arc::new(VolatilityCache::new());
        let engine = SignalEngine::with_state(
            EngineConfig::default(),
            Arc::new(RwLock::new(MlEnsemble::new())),
            Arc::new(RwLock::new(AdaptiveThresholds::new(ThresholdSet::default()))),
            Arc::clone(&cache),
        );
        let closed = uptrend(80);
        let forming = forming_from(&closed);
        let _ = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            Some(&forming),
            4800,
            &SessionOptions::default(),
        );
        assert!(cache.latest("EURUSD").is_some());
        assert_eq!(cache.last_update_epoch(), Some(4800));
    }

    #[test]
    fn test_generate_without_forming_candle() {
        let engine = test_engine();
        let closed = uptrend(80);
        let result = engine.generate(
            "session-1",
            "EURUSD",
            60,
            &closed,
            None,
            4800,
            &SessionOptions::default(),
        );
        assert!(result.entry_price.is_none());
        assert!(result.forming_candle.is_none());
        // The pipeline still runs to completion on closed candles alone.
        assert!(!result.votes.is_empty());
    }
}
