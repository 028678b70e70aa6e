// Advanced Brain - weighted voting, strategy heads, validation, confidence
// Converts indicator values, psychology, and regime into a directional
// verdict. The signal engine orchestrates; this module decides.

use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

use crate::analytics::indicators::{IndicatorValues, TrendSide};
use crate::analytics::regime::RegimeAnalysis;
use crate::core::config::{EngineConfig, SessionOptions};
use crate::core::types::{Candle, PsychologyAnalysis, Vote, VoteDirection};

const EPSILON: f64 = 1e-9;
const STRONG_VOTE_WEIGHT: f64 = 1.0;
const MAX_RULE_WEIGHT: f64 = 2.5;

// ============================================================================
// Vote tally
// ============================================================================

/// Aggregate of the weighted vote pool.
#[derive(Debug, Clone, Serialize)]
pub struct VoteTally {
    pub up_weight: f64,
    pub down_weight: f64,
    pub p_up: f64,
    pub alignment_ratio: f64,
    pub conflict_ratio: f64,
    pub strong_votes: u32,
    pub aligned_indicators: u32,
    pub majority: VoteDirection,
}

/// Weighted totals over the pool; neutral votes carry no weight.
pub fn tally(votes: &[Vote]) -> VoteTally {
    let mut up_weight = 0.0;
    let mut down_weight = 0.0;
    let mut up_count = 0u32;
    let mut down_count = 0u32;
    let mut strong_votes = 0u32;

    for vote in votes {
        match vote.direction {
            VoteDirection::Up => {
                up_weight += vote.weight;
                up_count += 1;
            }
            VoteDirection::Down => {
                down_weight += vote.weight;
                down_count += 1;
            }
            VoteDirection::Neutral => continue,
        }
        if vote.weight >= STRONG_VOTE_WEIGHT {
            strong_votes += 1;
        }
    }

    let total = up_weight + down_weight;
    let p_up = up_weight / (total + EPSILON);
    let (alignment_ratio, conflict_ratio) = if total > 0.0 {
        (
            up_weight.max(down_weight) / total,
            up_weight.min(down_weight) / total,
        )
    } else {
        (0.0, 0.0)
    };

    let majority = if up_weight > down_weight {
        VoteDirection::Up
    } else if down_weight > up_weight {
        VoteDirection::Down
    } else {
        VoteDirection::Neutral
    };
    let aligned_indicators = match majority {
        VoteDirection::Up => up_count,
        VoteDirection::Down => down_count,
        VoteDirection::Neutral => 0,
    };

    VoteTally {
        up_weight,
        down_weight,
        p_up,
        alignment_ratio,
        conflict_ratio,
        strong_votes,
        aligned_indicators,
        majority,
    }
}

/// Quality score in [0, 100]: alignment, strong-vote adequacy, inverse
/// conflict, and the regime penalty.
pub fn quality_score(tally: &VoteTally, regime: &RegimeAnalysis) -> f64 {
    let alignment = tally.alignment_ratio * 40.0;
    let strong = (tally.strong_votes as f64 / 6.0).min(1.0) * 25.0;
    let inverse_conflict = (1.0 - tally.conflict_ratio.min(1.0)) * 20.0;
    let regime_component = regime.confidence_penalty() * 15.0;
    (alignment + strong + inverse_conflict + regime_component).clamp(0.0, 100.0)
}

// ============================================================================
// Indicator votes
// ============================================================================

struct VoteBuilder<'a> {
    votes: Vec<Vote>,
    options: &'a SessionOptions,
    engine: &'a EngineConfig,
}

impl<'a> VoteBuilder<'a> {
    fn push(
        &mut self,
        name: &str,
        direction: VoteDirection,
        rule_weight: f64,
        reason: impl Into<String>,
    ) {
        if !self.options.indicator_enabled(name) {
            return;
        }
        let multiplier = self.options.weight_for(name, self.engine);
        let weight = (rule_weight.clamp(0.0, MAX_RULE_WEIGHT)) * multiplier;
        self.votes.push(Vote::new(name, direction, weight, reason));
    }
}

/// Run every indicator rule over the estimated candle array and produce the
/// initial vote pool. Rule weights scale with signal magnitude before the
/// per-indicator config multiplier is applied.
pub fn indicator_votes(
    candles: &[Candle],
    values: &IndicatorValues,
    psychology: &PsychologyAnalysis,
    options: &SessionOptions,
    engine: &EngineConfig,
) -> Vec<Vote> {
    let price = match candles.last() {
        Some(c) => c.close,
        None => return Vec::new(),
    };
    let mut builder = VoteBuilder {
        votes: Vec::new(),
        options,
        engine,
    };

    // EMA cross: weight grows with separation.
    if let (Some(fast), Some(slow)) = (values.ema9, values.ema21) {
        let cross_strength = (fast - slow).abs() / price;
        let weight = (1.0 + cross_strength * 10.0).min(MAX_RULE_WEIGHT);
        if fast > slow {
            builder.push("ema_cross", VoteDirection::Up, weight, "EMA9 above EMA21");
        } else if fast < slow {
            builder.push("ema_cross", VoteDirection::Down, weight, "EMA9 below EMA21");
        }
    }

    if let Some(ribbon) = values.ema_ribbon {
        let direction = if price > ribbon {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        builder.push("ema_ribbon", direction, 0.9, "price vs EMA ribbon");
    }

    if let Some(hull) = values.hull9 {
        let direction = if price > hull {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        builder.push("hull", direction, 0.8, "price vs Hull MA");
    }

    if let Some(macd) = values.macd {
        let weight = (1.0 + macd.histogram.abs() / price * 500.0).min(MAX_RULE_WEIGHT);
        if macd.histogram > 0.0 {
            builder.push("macd", VoteDirection::Up, weight, "MACD histogram positive");
        } else if macd.histogram < 0.0 {
            builder.push("macd", VoteDirection::Down, weight, "MACD histogram negative");
        }
    }

    if let Some(rsi) = values.rsi14 {
        if rsi >= 70.0 {
            let weight = (1.0 + (rsi - 70.0) / 15.0).min(MAX_RULE_WEIGHT);
            builder.push("rsi", VoteDirection::Down, weight, format!("RSI overbought at {:.0}", rsi));
        } else if rsi <= 30.0 {
            let weight = (1.0 + (30.0 - rsi) / 15.0).min(MAX_RULE_WEIGHT);
            builder.push("rsi", VoteDirection::Up, weight, format!("RSI oversold at {:.0}", rsi));
        } else if rsi > 55.0 {
            builder.push("rsi", VoteDirection::Up, 0.6, "RSI in bullish half");
        } else if rsi < 45.0 {
            builder.push("rsi", VoteDirection::Down, 0.6, "RSI in bearish half");
        }
    }

    if let Some(stoch) = values.stochastic {
        if stoch.k >= 80.0 {
            builder.push("stochastic", VoteDirection::Down, 1.1, "stochastic overbought");
        } else if stoch.k <= 20.0 {
            builder.push("stochastic", VoteDirection::Up, 1.1, "stochastic oversold");
        } else if stoch.k > stoch.d {
            builder.push("stochastic", VoteDirection::Up, 0.7, "%K above %D");
        } else if stoch.k < stoch.d {
            builder.push("stochastic", VoteDirection::Down, 0.7, "%K below %D");
        }
    }

    if let Some(st) = values.supertrend {
        let direction = match st.direction {
            TrendSide::Up => VoteDirection::Up,
            TrendSide::Down => VoteDirection::Down,
        };
        builder.push("supertrend", direction, 1.4, "SuperTrend direction");
    }

    if let Some(bands) = values.bollinger {
        if price > bands.upper {
            builder.push("bollinger", VoteDirection::Down, 1.2, "close above upper band");
        } else if price < bands.lower {
            builder.push("bollinger", VoteDirection::Up, 1.2, "close below lower band");
        } else if price > bands.middle {
            builder.push("bollinger", VoteDirection::Up, 0.5, "close above middle band");
        } else if price < bands.middle {
            builder.push("bollinger", VoteDirection::Down, 0.5, "close below middle band");
        }
    }

    if let Some(bands) = values.keltner {
        if price > bands.upper {
            builder.push("keltner", VoteDirection::Down, 1.0, "close above Keltner upper");
        } else if price < bands.lower {
            builder.push("keltner", VoteDirection::Up, 1.0, "close below Keltner lower");
        }
    }

    // ADX confirms the EMA trend once the market is actually trending.
    if let (Some(adx), Some(fast), Some(slow)) = (values.adx14, values.ema9, values.ema21) {
        if adx >= 25.0 && fast != slow {
            let direction = if fast > slow {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            let weight = (1.0 + (adx - 25.0) / 25.0).min(2.0);
            builder.push("adx", direction, weight, format!("trend confirmed, ADX {:.0}", adx));
        }
    }

    if let Some(cci) = values.cci20 {
        if cci > 100.0 {
            let weight = (1.0 + (cci - 100.0) / 200.0).min(2.0);
            builder.push("cci", VoteDirection::Up, weight, "CCI momentum breakout");
        } else if cci < -100.0 {
            let weight = (1.0 + (-cci - 100.0) / 200.0).min(2.0);
            builder.push("cci", VoteDirection::Down, weight, "CCI momentum breakdown");
        }
    }

    if let Some(wr) = values.williams_r14 {
        if wr > -20.0 {
            builder.push("williams_r", VoteDirection::Down, 0.9, "Williams %R overbought");
        } else if wr < -80.0 {
            builder.push("williams_r", VoteDirection::Up, 0.9, "Williams %R oversold");
        }
    }

    if let Some(sar) = values.psar {
        let direction = if price > sar {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        builder.push("psar", direction, 0.9, "price vs parabolic SAR");
    }

    if let Some(roc) = values.roc12 {
        if roc.abs() > 0.05 {
            let direction = if roc > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            let weight = (0.7 + roc.abs() / 2.0).min(2.0);
            builder.push("roc", direction, weight, format!("ROC {:+.2}%", roc));
        }
    }

    if let Some(momentum) = values.momentum10 {
        if momentum != 0.0 {
            let direction = if momentum > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            let weight = (0.8 + momentum.abs() / price * 100.0).min(2.0);
            builder.push("momentum", direction, weight, "10-period momentum");
        }
    }

    if let Some(channel) = values.donchian20 {
        let span = channel.upper - channel.lower;
        if span > 0.0 {
            let position = (price - channel.lower) / span;
            if position >= 0.98 {
                builder.push("donchian", VoteDirection::Up, 1.3, "Donchian breakout high");
            } else if position <= 0.02 {
                builder.push("donchian", VoteDirection::Down, 1.3, "Donchian breakdown low");
            }
        }
    }

    if let Some(obv) = values.obv {
        if obv > 0.0 {
            builder.push("obv", VoteDirection::Up, 0.7, "cumulative volume positive");
        } else if obv < 0.0 {
            builder.push("obv", VoteDirection::Down, 0.7, "cumulative volume negative");
        }
    }

    if let Some(uo) = values.ultimate {
        if uo > 70.0 {
            builder.push("ultimate", VoteDirection::Down, 1.0, "Ultimate Oscillator overbought");
        } else if uo < 30.0 {
            builder.push("ultimate", VoteDirection::Up, 1.0, "Ultimate Oscillator oversold");
        } else if uo > 55.0 {
            builder.push("ultimate", VoteDirection::Up, 0.5, "Ultimate Oscillator bullish");
        } else if uo < 45.0 {
            builder.push("ultimate", VoteDirection::Down, 0.5, "Ultimate Oscillator bearish");
        }
    }

    if let Some(z) = values.zscore20 {
        if z >= 2.0 {
            let weight = (1.0 + (z - 2.0) / 2.0).min(2.0);
            builder.push("zscore", VoteDirection::Down, weight, format!("z-score stretched at {:+.2}", z));
        } else if z <= -2.0 {
            let weight = (1.0 + (-z - 2.0) / 2.0).min(2.0);
            builder.push("zscore", VoteDirection::Up, weight, format!("z-score stretched at {:+.2}", z));
        }
    }

    if let Some(slope) = values.linreg_slope14 {
        if slope != 0.0 {
            let direction = if slope > 0.0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            let weight = (0.8 + slope.abs() / price * 1000.0).min(2.0);
            builder.push("linreg", direction, weight, "regression slope");
        }
    }

    if let Some(fisher) = values.fisher {
        if fisher > 1.5 {
            builder.push("fisher", VoteDirection::Down, 1.1, "Fisher transform extreme high");
        } else if fisher < -1.5 {
            builder.push("fisher", VoteDirection::Up, 1.1, "Fisher transform extreme low");
        } else if fisher > 0.25 {
            builder.push("fisher", VoteDirection::Up, 0.5, "Fisher transform positive");
        } else if fisher < -0.25 {
            builder.push("fisher", VoteDirection::Down, 0.5, "Fisher transform negative");
        }
    }

    if let Some(pct) = values.range_percentile20 {
        if pct >= 85.0 {
            builder.push("range_percentile", VoteDirection::Down, 0.7, "top of 20-bar range");
        } else if pct <= 15.0 {
            builder.push("range_percentile", VoteDirection::Up, 0.7, "bottom of 20-bar range");
        }
    }

    // Psychology: pattern hits vote directly, order blocks and gaps add bias.
    for hit in &psychology.patterns {
        if hit.direction != VoteDirection::Neutral {
            builder.votes.push(hit.as_vote());
        }
    }
    if psychology.order_block_probability > 0.6 {
        let direction = match psychology.bias {
            crate::core::types::Bias::Bullish => Some(VoteDirection::Up),
            crate::core::types::Bias::Bearish => Some(VoteDirection::Down),
            crate::core::types::Bias::Neutral => None,
        };
        if let Some(direction) = direction {
            builder.votes.push(Vote::new(
                "order_block",
                direction,
                0.8 + psychology.order_block_probability,
                "order block formation",
            ));
        }
    }

    builder.votes
}

// ============================================================================
// Strategy heads
// ============================================================================

/// Eleven extra strategy heads appended to the vote pool.
pub fn strategy_votes(
    candles: &[Candle],
    values: &IndicatorValues,
    psychology: &PsychologyAnalysis,
    regime: &RegimeAnalysis,
) -> Vec<Vote> {
    let mut votes = Vec::new();
    let price = match candles.last() {
        Some(c) => c.close,
        None => return votes,
    };

    // 1. Multi-timeframe trend alignment: fast, medium, and slow MAs agree.
    if let (Some(e9), Some(e21), Some(s20), Some(s50)) =
        (values.ema9, values.ema21, values.sma20, values.sma50)
    {
        let short_up = e9 > e21;
        let medium_up = s20 > s50;
        let long_up = values.sma200.map(|s200| s50 > s200);
        if short_up == medium_up && long_up.map(|l| l == short_up).unwrap_or(true) {
            let direction = if short_up {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            votes.push(Vote::new(
                "mtf_trend",
                direction,
                1.8,
                "trend aligned across timeframe proxies",
            ));
        }
    }

    // 2. Divergence reversal: new price extreme without an RSI extreme.
    if candles.len() >= 11 {
        if let Some(rsi_now) = values.rsi14 {
            let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
            let prev_rsi =
                crate::analytics::indicators::rsi(&closes[..closes.len() - 10], 14);
            let window = &candles[candles.len() - 10..];
            let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
            let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
            let last = window.last().unwrap();

            if let Some(prev_rsi) = prev_rsi {
                if last.low <= lowest && rsi_now > prev_rsi + 2.0 {
                    votes.push(Vote::new(
                        "divergence",
                        VoteDirection::Up,
                        1.5,
                        "bullish RSI divergence at the low",
                    ));
                } else if last.high >= highest && rsi_now < prev_rsi - 2.0 {
                    votes.push(Vote::new(
                        "divergence",
                        VoteDirection::Down,
                        1.5,
                        "bearish RSI divergence at the high",
                    ));
                }
            }
        }
    }

    // 3. Squeeze breakout: Bollinger inside Keltner, then a band break.
    if let (Some(bb), Some(kc)) = (values.bollinger, values.keltner) {
        let squeezed = bb.upper < kc.upper && bb.lower > kc.lower;
        if squeezed {
            if price > bb.upper {
                votes.push(Vote::new(
                    "squeeze",
                    VoteDirection::Up,
                    1.6,
                    "squeeze release upward",
                ));
            } else if price < bb.lower {
                votes.push(Vote::new(
                    "squeeze",
                    VoteDirection::Down,
                    1.6,
                    "squeeze release downward",
                ));
            }
        }
    }

    // 4. Mean reversion at statistical extremes.
    if let (Some(z), Some(rsi)) = (values.zscore20, values.rsi14) {
        if z <= -2.0 && rsi < 30.0 {
            votes.push(Vote::new(
                "mean_reversion",
                VoteDirection::Up,
                1.4,
                "stretched below mean with oversold RSI",
            ));
        } else if z >= 2.0 && rsi > 70.0 {
            votes.push(Vote::new(
                "mean_reversion",
                VoteDirection::Down,
                1.4,
                "stretched above mean with overbought RSI",
            ));
        }
    }

    // 5. Momentum continuation: ROC, MACD, and price vs EMA9 agree.
    if let (Some(roc), Some(macd), Some(e9)) = (values.roc12, values.macd, values.ema9) {
        if roc > 0.0 && macd.histogram > 0.0 && price > e9 {
            votes.push(Vote::new(
                "momentum_continuation",
                VoteDirection::Up,
                1.3,
                "momentum stack bullish",
            ));
        } else if roc < 0.0 && macd.histogram < 0.0 && price < e9 {
            votes.push(Vote::new(
                "momentum_continuation",
                VoteDirection::Down,
                1.3,
                "momentum stack bearish",
            ));
        }
    }

    // 6. Volatility expansion in the direction of the expanding candle.
    if candles.len() >= 11 {
        let last = candles.last().unwrap();
        let prior = &candles[candles.len() - 11..candles.len() - 1];
        let avg_range = prior.iter().map(|c| c.range()).sum::<f64>() / prior.len() as f64;
        if avg_range > 0.0 && last.range() > avg_range * 1.8 && last.body_pct() > 0.5 {
            let direction = if last.is_bullish() {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            votes.push(Vote::new(
                "volatility_expansion",
                direction,
                1.1,
                "range expansion with committed body",
            ));
        }
    }

    // 7. Candlestick pattern confirmed by the short trend.
    if let (Some(e9), Some(e21)) = (values.ema9, values.ema21) {
        let trend = if e9 > e21 {
            VoteDirection::Up
        } else {
            VoteDirection::Down
        };
        if let Some(best) = psychology
            .patterns
            .iter()
            .filter(|h| h.direction == trend)
            .max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap_or(std::cmp::Ordering::Equal))
        {
            votes.push(Vote::new(
                "candlestick_trend",
                trend,
                (best.strength + 0.5).min(MAX_RULE_WEIGHT),
                format!("{} with the trend", best.name),
            ));
        }
    }

    // 8. Go with the flow: 3-5 same-direction candles aligned with trend.
    if candles.len() >= 5 {
        let tail = &candles[candles.len() - 5..];
        let streak_up = tail.iter().rev().take_while(|c| c.is_bullish()).count();
        let streak_down = tail.iter().rev().take_while(|c| c.is_bearish()).count();
        if let (Some(e9), Some(e21)) = (values.ema9, values.ema21) {
            if (3..=5).contains(&streak_up) && e9 > e21 {
                votes.push(Vote::new(
                    "go_with_flow",
                    VoteDirection::Up,
                    1.2,
                    format!("{} consecutive bullish candles", streak_up),
                ));
            } else if (3..=5).contains(&streak_down) && e9 < e21 {
                votes.push(Vote::new(
                    "go_with_flow",
                    VoteDirection::Down,
                    1.2,
                    format!("{} consecutive bearish candles", streak_down),
                ));
            }
        }
    }

    // 9. Exhaustion: oversized body into an RSI extreme fades the move.
    if candles.len() >= 11 {
        let last = candles.last().unwrap();
        let prior = &candles[candles.len() - 11..candles.len() - 1];
        let avg_body = prior.iter().map(|c| c.body()).sum::<f64>() / prior.len() as f64;
        if let Some(rsi) = values.rsi14 {
            if avg_body > 0.0 && last.body() > avg_body * 2.0 {
                if last.is_bullish() && rsi > 75.0 {
                    votes.push(Vote::new(
                        "exhaustion",
                        VoteDirection::Down,
                        1.3,
                        "climactic bullish candle at RSI extreme",
                    ));
                } else if last.is_bearish() && rsi < 25.0 {
                    votes.push(Vote::new(
                        "exhaustion",
                        VoteDirection::Up,
                        1.3,
                        "climactic bearish candle at RSI extreme",
                    ));
                }
            }
        }
    }

    // 10. Multi-factor confluence counter.
    {
        let mut bullish = 0u32;
        let mut bearish = 0u32;
        let mut count = |up: Option<bool>| {
            match up {
                Some(true) => bullish += 1,
                Some(false) => bearish += 1,
                None => {}
            }
        };
        count(values.rsi14.map(|r| r > 50.0));
        count(values.macd.map(|m| m.histogram > 0.0));
        count(values.ema9.zip(values.ema21).map(|(a, b)| a > b));
        count(values.sma20.map(|s| price > s));
        count(values.supertrend.map(|s| s.direction == TrendSide::Up));
        count(values.stochastic.map(|s| s.k > s.d));
        count(values.psar.map(|s| price > s));
        count(values.roc12.map(|r| r > 0.0));
        count(values.obv.map(|o| o > 0.0));
        count(values.ema_ribbon.map(|r| price > r));

        if bullish >= 5 && bullish >= bearish + 5 {
            votes.push(Vote::new(
                "confluence",
                VoteDirection::Up,
                2.0,
                format!("{} bullish factors vs {}", bullish, bearish),
            ));
        } else if bearish >= 5 && bearish >= bullish + 5 {
            votes.push(Vote::new(
                "confluence",
                VoteDirection::Down,
                2.0,
                format!("{} bearish factors vs {}", bearish, bullish),
            ));
        }
    }

    // 11. Three-bar price-action reversal, close gaps, and PSAR flips.
    if candles.len() >= 3 {
        let n = candles.len();
        let (a, b, c) = (&candles[n - 3], &candles[n - 2], &candles[n - 1]);
        if a.is_bearish() && b.low < a.low && c.is_bullish() && c.close > b.high {
            votes.push(Vote::new(
                "three_bar_reversal",
                VoteDirection::Up,
                1.3,
                "three-bar bullish reversal",
            ));
        } else if a.is_bullish() && b.high > a.high && c.is_bearish() && c.close < b.low {
            votes.push(Vote::new(
                "three_bar_reversal",
                VoteDirection::Down,
                1.3,
                "three-bar bearish reversal",
            ));
        }

        // Open gap against the prior close tends to fill.
        let gap = c.open - b.close;
        if b.close > 0.0 && (gap / b.close).abs() > 0.002 {
            let direction = if gap > 0.0 {
                VoteDirection::Down
            } else {
                VoteDirection::Up
            };
            votes.push(Vote::new("gap_fill", direction, 0.8, "open gap against prior close"));
        }
    }
    let _ = regime; // regime feeds the quality score; heads stay price-based

    votes
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reasons: Vec<String>,
    pub trend_support: bool,
    pub momentum_support: bool,
    pub confirmation_factors: f64,
}

/// Step-7 validation of a candidate direction against the vote pool.
#[allow(clippy::too_many_arguments)]
pub fn validate(
    direction: VoteDirection,
    tally: &VoteTally,
    quality: f64,
    values: &IndicatorValues,
    regime: &RegimeAnalysis,
    engine: &EngineConfig,
    max_conflict_ratio: f64,
    min_aligned_indicators: u32,
) -> ValidationResult {
    let mut reasons = Vec::new();

    let trend_support = match (values.ema9, values.ema21) {
        (Some(fast), Some(slow)) => match direction {
            VoteDirection::Up => fast > slow,
            VoteDirection::Down => fast < slow,
            VoteDirection::Neutral => false,
        },
        _ => false,
    };
    let momentum_support =
        crate::analytics::regime::momentum_alignment(values, direction) >= 0.6;
    let strong_consensus = tally.strong_votes >= 3;
    let weight_ratio = tally.alignment_ratio > 0.58;

    let confirmation_factors = [trend_support, momentum_support, strong_consensus, weight_ratio]
        .iter()
        .filter(|&&f| f)
        .count() as f64
        + if regime.momentum_aligned { 0.5 } else { 0.0 };

    if quality < engine.quality_rejection_floor {
        reasons.push(format!("quality {:.0} below rejection floor", quality));
    }
    let support_count = [trend_support, momentum_support, strong_consensus, weight_ratio]
        .iter()
        .filter(|&&f| f)
        .count();
    if support_count < 2 {
        reasons.push(format!("only {} of 4 support checks passed", support_count));
    }
    if tally.conflict_ratio > max_conflict_ratio {
        reasons.push(format!("conflict ratio {:.2} too high", tally.conflict_ratio));
    }
    if tally.aligned_indicators < min_aligned_indicators {
        reasons.push(format!(
            "only {} aligned indicators (need {})",
            tally.aligned_indicators, min_aligned_indicators
        ));
    }
    if !trend_support && confirmation_factors < engine.confirmation_factor_floor {
        reasons.push("counter-trend without sufficient confirmation".to_string());
    }
    // Momentum divergence contradiction only blocks marginal setups.
    if !momentum_support && quality < 60.0 {
        reasons.push("momentum divergence at low quality".to_string());
    }

    ValidationResult {
        valid: reasons.is_empty(),
        reasons,
        trend_support,
        momentum_support,
        confirmation_factors,
    }
}

// ============================================================================
// Confidence
// ============================================================================

/// Step-8 confidence before per-symbol variation; clamped to [55, 92].
pub fn final_confidence(
    tally: &VoteTally,
    quality: f64,
    validation: &ValidationResult,
    regime: &RegimeAnalysis,
    ml_agreement: MlAgreement,
) -> f64 {
    let direction_strength = 2.0 * (tally.p_up - 0.5).abs();
    let mut confidence = 55.0 + direction_strength * 30.0;
    confidence += 0.30 * quality;

    if regime.is_trending() && validation.trend_support {
        confidence += 3.0;
    }
    if validation.momentum_support {
        confidence += 2.0;
    }
    if regime.momentum_aligned {
        confidence += 2.0;
    }
    confidence += match ml_agreement {
        MlAgreement::Strong => 5.0,
        MlAgreement::Partial => 3.0,
        MlAgreement::Disagrees => -8.0,
        MlAgreement::Absent => 0.0,
    };

    // The regime penalty already entered through the quality score.
    confidence.clamp(55.0, 92.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlAgreement {
    Strong,
    Partial,
    Disagrees,
    Absent,
}

// ============================================================================
// Confidence variation
// ============================================================================

/// Per-symbol confidence variation: successive candles never repeat a
/// near-identical value. Keyed by candle close so repeated generation for
/// the same candle is idempotent.
#[derive(Debug, Default)]
pub struct ConfidenceVariation {
    last: HashMap<String, (f64, i64)>,
}

impl ConfidenceVariation {
    pub fn new() -> Self {
        Self {
            last: HashMap::new(),
        }
    }

    /// Apply cosmetic jitter to the emitted confidence. The same
    /// (symbol, close_time) pair always returns the stored value.
    pub fn apply(&mut self, symbol: &str, confidence: f64, close_time: i64) -> f64 {
        if let Some(&(stored, stored_close)) = self.last.get(symbol) {
            if stored_close == close_time {
                return stored;
            }
        }

        let mut rng = rand::thread_rng();
        let mut varied = confidence + rng.gen_range(-2.5..2.5);

        if let Some(&(previous, previous_close)) = self.last.get(symbol) {
            let recent = close_time - previous_close <= 300;
            if recent && (varied - previous).abs() < 2.0 {
                let separation = rng.gen_range(2.0..4.0);
                varied = if varied >= previous {
                    previous + separation
                } else {
                    previous - separation
                };
            }
        }

        let varied = varied.clamp(0.0, 95.0);
        self.last.insert(symbol.to_string(), (varied, close_time));
        varied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{indicators, psychology, regime};

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
                let base = 100.0 + i as f64 * 0.5;
                candle(base, base + 0.6, base - 0.2, base + 0.45, i as i64 * 60)
            })
            .collect()
    }

    fn vote(direction: VoteDirection, weight: f64) -> Vote {
        Vote::new("test", direction, weight, "test")
    }

    #[test]
    fn test_tally_basic() {
        let votes = vec![
            vote(VoteDirection::Up, 2.0),
            vote(VoteDirection::Up, 1.0),
            vote(VoteDirection::Down, 1.0),
            vote(VoteDirection::Neutral, 5.0),
        ];
        let tally = tally(&votes);
        assert_eq!(tally.up_weight, 3.0);
        assert_eq!(tally.down_weight, 1.0);
        assert!((tally.p_up - 0.75).abs() < 1e-6);
        assert!((tally.alignment_ratio - 0.75).abs() < 1e-6);
        assert!((tally.conflict_ratio - 0.25).abs() < 1e-6);
        assert_eq!(tally.strong_votes, 3);
        assert_eq!(tally.aligned_indicators, 2);
        assert_eq!(tally.majority, VoteDirection::Up);
    }

    #[test]
    fn test_tally_empty() {
        let tally = tally(&[]);
        assert_eq!(tally.p_up, 0.0);
        assert_eq!(tally.majority, VoteDirection::Neutral);
    }

    #[test]
    fn test_indicator_votes_uptrend_lean_up() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let psych = psychology::analyze(&candles);
        let options = SessionOptions::default();
        let engine = EngineConfig::default();

        let votes = indicator_votes(&candles, &values, &psych, &options, &engine);
        assert!(!votes.is_empty());
        let tally = tally(&votes);
        assert!(tally.p_up > 0.5, "p_up = {}", tally.p_up);
    }

    #[test]
    fn test_enable_list_filters_votes() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let psych = PsychologyAnalysis::default();
        let engine = EngineConfig::default();

        let mut options = SessionOptions::default();
        options.enabled_indicators = Some(
            ["supertrend".to_string()].into_iter().collect(),
        );

        let votes = indicator_votes(&candles, &values, &psych, &options, &engine);
        assert!(votes.iter().all(|v| v.indicator == "supertrend"));
        assert_eq!(votes.len(), 1);
    }

    #[test]
    fn test_custom_weight_scales_vote() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let psych = PsychologyAnalysis::default();
        let engine = EngineConfig::default();

        let mut options = SessionOptions::default();
        options.enabled_indicators =
            Some(["supertrend".to_string()].into_iter().collect());

        let base_votes = indicator_votes(&candles, &values, &psych, &options, &engine);

        options.custom_weights.insert("supertrend".to_string(), 0.5);
        let scaled_votes = indicator_votes(&candles, &values, &psych, &options, &engine);

        let base_weight = base_votes[0].weight;
        let scaled_weight = scaled_votes[0].weight;
        let default_multiplier = engine.indicator_weights["supertrend"];
        assert!((scaled_weight - base_weight / default_multiplier * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_strategy_votes_uptrend() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let psych = psychology::analyze(&candles);
        let reg = regime::detect(&candles, &values);

        let votes = strategy_votes(&candles, &values, &psych, &reg);
        assert!(votes.iter().any(|v| v.indicator == "mtf_trend"));
        assert!(votes.iter().any(|v| v.indicator == "confluence"));
        let up_weight: f64 = votes
            .iter()
            .filter(|v| v.direction == VoteDirection::Up)
            .map(|v| v.weight)
            .sum();
        let down_weight: f64 = votes
            .iter()
            .filter(|v| v.direction == VoteDirection::Down)
            .map(|v| v.weight)
            .sum();
        assert!(up_weight > down_weight);
    }

    #[test]
    fn test_quality_score_bounds() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let reg = regime::detect(&candles, &values);
        let votes = vec![
            vote(VoteDirection::Up, 2.0),
            vote(VoteDirection::Up, 1.5),
            vote(VoteDirection::Up, 1.2),
            vote(VoteDirection::Up, 1.0),
        ];
        let quality = quality_score(&tally(&votes), &reg);
        assert!((0.0..=100.0).contains(&quality));
        assert!(quality > 60.0);
    }

    #[test]
    fn test_validation_passes_clean_uptrend() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let psych = psychology::analyze(&candles);
        let reg = regime::detect(&candles, &values);
        let options = SessionOptions::default();
        let engine = EngineConfig::default();

        let mut votes = indicator_votes(&candles, &values, &psych, &options, &engine);
        votes.extend(strategy_votes(&candles, &values, &psych, &reg));
        let tally = tally(&votes);
        let quality = quality_score(&tally, &reg);

        let result = validate(
            VoteDirection::Up,
            &tally,
            quality,
            &values,
            &reg,
            &engine,
            engine.max_conflict_ratio,
            engine.min_aligned_indicators,
        );
        assert!(result.valid, "reasons: {:?}", result.reasons);
        assert!(result.trend_support);
    }

    #[test]
    fn test_validation_rejects_conflict() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let reg = regime::detect(&candles, &values);
        let engine = EngineConfig::default();

        let votes = vec![
            vote(VoteDirection::Up, 1.0),
            vote(VoteDirection::Down, 0.9),
        ];
        let tally = tally(&votes);
        let result = validate(
            VoteDirection::Up,
            &tally,
            80.0,
            &values,
            &reg,
            &engine,
            engine.max_conflict_ratio,
            engine.min_aligned_indicators,
        );
        assert!(!result.valid);
        assert!(result
            .reasons
            .iter()
            .any(|r| r.contains("conflict") || r.contains("aligned")));
    }

    #[test]
    fn test_final_confidence_bounds() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let reg = regime::detect(&candles, &values);
        let votes = vec![
            vote(VoteDirection::Up, 2.0),
            vote(VoteDirection::Up, 1.5),
            vote(VoteDirection::Up, 1.2),
            vote(VoteDirection::Up, 1.0),
        ];
        let tally = tally(&votes);
        let quality = quality_score(&tally, &reg);
        let validation = validate(
            VoteDirection::Up,
            &tally,
            quality,
            &values,
            &reg,
            &EngineConfig::default(),
            0.32,
            4,
        );

        for agreement in [
            MlAgreement::Strong,
            MlAgreement::Partial,
            MlAgreement::Disagrees,
            MlAgreement::Absent,
        ] {
            let confidence = final_confidence(&tally, quality, &validation, &reg, agreement);
            assert!((55.0..=92.0).contains(&confidence));
        }
    }

    #[test]
    fn test_ml_agreement_ordering() {
        let candles = uptrend(80);
        let values = indicators::compute_all(&candles);
        let reg = regime::detect(&candles, &values);
        // Mixed pool keeps the pre-clamp confidence inside the band so the
        // agreement adjustments stay visible.
        let votes = vec![vote(VoteDirection::Up, 2.0), vote(VoteDirection::Down, 1.2)];
        let tally = tally(&votes);
        let validation = validate(
            VoteDirection::Up,
            &tally,
            40.0,
            &values,
            &reg,
            &EngineConfig::default(),
            0.5,
            1,
        );

        let strong = final_confidence(&tally, 40.0, &validation, &reg, MlAgreement::Strong);
        let partial = final_confidence(&tally, 40.0, &validation, &reg, MlAgreement::Partial);
        let disagrees = final_confidence(&tally, 40.0, &validation, &reg, MlAgreement::Disagrees);
        assert!(strong >= partial);
        assert!(partial > disagrees);
    }

    #[test]
    fn test_confidence_variation_idempotent_per_candle() {
        let mut variation = ConfidenceVariation::new();
        let first = variation.apply("EURUSD", 80.0, 1000);
        let second = variation.apply("EURUSD", 80.0, 1000);
        assert_eq!(first, second);
    }

    #[test]
    fn test_confidence_variation_separates_successive_values() {
        let mut variation = ConfidenceVariation::new();
        let first = variation.apply("EURUSD", 80.0, 1000);
        let second = variation.apply("EURUSD", 80.0, 1060);
        assert!((first - second).abs() >= 1.9, "{} vs {}", first, second);
    }

    #[test]
    fn test_confidence_variation_bounds() {
        let mut variation = ConfidenceVariation::new();
        for i in 0..50 {
            let value = variation.apply("EURUSD", 93.0, 1000 + i * 60);
            assert!((0.0..=95.0).contains(&value));
        }
    }
}
