// Indicator Engine - pure candle-array -> indicator values
// Every indicator yields None when its minimum history is unmet; divisions
// by zero become None and NaN never leaves this module.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::Candle;

// ============================================================================
// Value Types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendSide {
    Up,
    Down,
}

impl fmt::Display for TrendSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SuperTrend {
    pub value: f64,
    pub direction: TrendSide,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DonchianChannel {
    pub upper: f64,
    pub lower: f64,
}

/// Snapshot of every indicator for one candle array. Fields are None
/// whenever the history requirement is unmet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorValues {
    pub ema5: Option<f64>,
    pub ema9: Option<f64>,
    pub ema12: Option<f64>,
    pub ema21: Option<f64>,
    pub ema50: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub hull9: Option<f64>,
    pub macd: Option<Macd>,
    pub rsi14: Option<f64>,
    pub stochastic: Option<Stochastic>,
    pub atr14: Option<f64>,
    pub adx14: Option<f64>,
    pub cci20: Option<f64>,
    pub williams_r14: Option<f64>,
    pub bollinger: Option<Bands>,
    pub keltner: Option<Bands>,
    pub supertrend: Option<SuperTrend>,
    pub roc12: Option<f64>,
    pub momentum10: Option<f64>,
    pub donchian20: Option<DonchianChannel>,
    pub psar: Option<f64>,
    pub obv: Option<f64>,
    pub ultimate: Option<f64>,
    pub zscore20: Option<f64>,
    pub linreg_slope14: Option<f64>,
    pub fisher: Option<f64>,
    pub atr_bands: Option<Bands>,
    pub range_percentile20: Option<f64>,
    pub ema_ribbon: Option<f64>,
}

// ============================================================================
// Series helpers
// ============================================================================

fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// EMA series seeded with the SMA of the first `period` values.
/// `result[i]` corresponds to `values[period - 1 + i]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;

    let mut result = Vec::with_capacity(values.len() - period + 1);
    result.push(seed);
    for &value in &values[period..] {
        let prev = *result.last().unwrap();
        result.push(value * k + prev * (1.0 - k));
    }
    result
}

pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied().and_then(finite)
}

pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    finite(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

fn wma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let denom = (period * (period + 1)) as f64 / 2.0;
    let weighted: f64 = window
        .iter()
        .enumerate()
        .map(|(i, &v)| v * (i + 1) as f64)
        .sum();
    finite(weighted / denom)
}

fn wma_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    (period..=values.len())
        .filter_map(|end| wma(&values[..end], period))
        .collect()
}

/// Hull moving average: WMA(2*WMA(n/2) - WMA(n), sqrt(n)).
pub fn hull_ma(values: &[f64], period: usize) -> Option<f64> {
    let half = (period / 2).max(1);
    let sqrt_p = (period as f64).sqrt().round() as usize;
    if values.len() < period + sqrt_p {
        return None;
    }

    let wma_half = wma_series(values, half);
    let wma_full = wma_series(values, period);
    if wma_full.is_empty() {
        return None;
    }

    // Align the two series on their tails.
    let len = wma_full.len().min(wma_half.len());
    let half_tail = &wma_half[wma_half.len() - len..];
    let full_tail = &wma_full[wma_full.len() - len..];
    let raw: Vec<f64> = half_tail
        .iter()
        .zip(full_tail.iter())
        .map(|(&h, &f)| 2.0 * h - f)
        .collect();

    wma(&raw, sqrt_p.max(1))
}

pub fn std_dev(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    finite(variance.sqrt())
}

// ============================================================================
// Momentum oscillators
// ============================================================================

/// RSI with Wilder's smoothing (factor 1/period).
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period]
        .iter()
        .map(|&c| if c > 0.0 { c } else { 0.0 })
        .sum::<f64>()
        / period as f64;
    let mut avg_loss = changes[..period]
        .iter()
        .map(|&c| if c < 0.0 { -c } else { 0.0 })
        .sum::<f64>()
        / period as f64;

    for &c in &changes[period..] {
        if c > 0.0 {
            avg_gain = (avg_gain * (period as f64 - 1.0) + c) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0)) / period as f64;
        } else {
            avg_gain = (avg_gain * (period as f64 - 1.0)) / period as f64;
            avg_loss = (avg_loss * (period as f64 - 1.0) - c) / period as f64;
        }
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    finite(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(fast, slow, signal) on closes; requires slow + signal values.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if values.len() < slow + signal {
        return None;
    }

    let fast_series = ema_series(values, fast);
    let slow_series = ema_series(values, slow);
    let len = fast_series.len().min(slow_series.len());
    if len == 0 {
        return None;
    }

    let macd_line: Vec<f64> = fast_series[fast_series.len() - len..]
        .iter()
        .zip(slow_series[slow_series.len() - len..].iter())
        .map(|(&f, &s)| f - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal);
    let signal_value = *signal_series.last()?;
    let macd_value = *macd_line.last()?;

    if !macd_value.is_finite() || !signal_value.is_finite() {
        return None;
    }
    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// Stochastic oscillator: raw %K over `k_period`, %D as SMA of %K.
pub fn stochastic(candles: &[Candle], k_period: usize, d_period: usize) -> Option<Stochastic> {
    if candles.len() < k_period + d_period - 1 {
        return None;
    }

    let k_at = |end: usize| -> Option<f64> {
        let window = &candles[end - k_period..end];
        let hh = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let ll = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if hh - ll == 0.0 {
            return None;
        }
        finite((candles[end - 1].close - ll) / (hh - ll) * 100.0)
    };

    let mut k_values = Vec::with_capacity(d_period);
    for end in (candles.len() - d_period + 1)..=candles.len() {
        k_values.push(k_at(end)?);
    }

    Some(Stochastic {
        k: *k_values.last()?,
        d: k_values.iter().sum::<f64>() / k_values.len() as f64,
    })
}

pub fn williams_r(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let hh = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let ll = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if hh - ll == 0.0 {
        return None;
    }
    finite(-100.0 * (hh - window.last().unwrap().close) / (hh - ll))
}

pub fn roc(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period + 1 {
        return None;
    }
    let past = values[values.len() - 1 - period];
    if past == 0.0 {
        return None;
    }
    finite((values[values.len() - 1] - past) / past * 100.0)
}

pub fn momentum(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period + 1 {
        return None;
    }
    finite(values[values.len() - 1] - values[values.len() - 1 - period])
}

/// Ultimate Oscillator over (short, mid, long) buying-pressure windows.
pub fn ultimate_oscillator(
    candles: &[Candle],
    short: usize,
    mid: usize,
    long: usize,
) -> Option<f64> {
    if candles.len() < long + 1 {
        return None;
    }

    let mut bp = Vec::with_capacity(candles.len() - 1);
    let mut tr = Vec::with_capacity(candles.len() - 1);
    for w in candles.windows(2) {
        let prev_close = w[0].close;
        let c = &w[1];
        bp.push(c.close - c.low.min(prev_close));
        tr.push(c.high.max(prev_close) - c.low.min(prev_close));
    }

    let avg = |n: usize| -> Option<f64> {
        let bp_sum: f64 = bp[bp.len() - n..].iter().sum();
        let tr_sum: f64 = tr[tr.len() - n..].iter().sum();
        if tr_sum == 0.0 {
            None
        } else {
            Some(bp_sum / tr_sum)
        }
    };

    let a_short = avg(short)?;
    let a_mid = avg(mid)?;
    let a_long = avg(long)?;
    finite(100.0 * (4.0 * a_short + 2.0 * a_mid + a_long) / 7.0)
}

// ============================================================================
// Volatility & channels
// ============================================================================

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    let mut out = Vec::with_capacity(candles.len());
    for (i, c) in candles.iter().enumerate() {
        if i == 0 {
            out.push(c.high - c.low);
        } else {
            let prev_close = candles[i - 1].close;
            out.push(
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs()),
            );
        }
    }
    out
}

/// ATR with Wilder's smoothing.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let tr = true_ranges(candles);
    let mut value = tr[1..=period].iter().sum::<f64>() / period as f64;
    for &t in &tr[period + 1..] {
        value = (value * (period as f64 - 1.0) + t) / period as f64;
    }
    finite(value)
}

/// ADX with Wilder smoothing of +DM / -DM / TR, then of DX.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < 2 * period + 1 {
        return None;
    }

    let mut plus_dm = Vec::new();
    let mut minus_dm = Vec::new();
    let mut tr = Vec::new();
    for w in candles.windows(2) {
        let up = w[1].high - w[0].high;
        let down = w[0].low - w[1].low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(
            (w[1].high - w[1].low)
                .max((w[1].high - w[0].close).abs())
                .max((w[1].low - w[0].close).abs()),
        );
    }

    let smooth = |series: &[f64]| -> Vec<f64> {
        let mut out = Vec::new();
        let mut value: f64 = series[..period].iter().sum();
        out.push(value);
        for &s in &series[period..] {
            value = value - value / period as f64 + s;
            out.push(value);
        }
        out
    };

    let tr_s = smooth(&tr);
    let plus_s = smooth(&plus_dm);
    let minus_s = smooth(&minus_dm);

    let mut dx = Vec::new();
    for i in 0..tr_s.len() {
        if tr_s[i] == 0.0 {
            continue;
        }
        let plus_di = 100.0 * plus_s[i] / tr_s[i];
        let minus_di = 100.0 * minus_s[i] / tr_s[i];
        let sum = plus_di + minus_di;
        if sum == 0.0 {
            continue;
        }
        dx.push(100.0 * (plus_di - minus_di).abs() / sum);
    }
    if dx.len() < period {
        return None;
    }

    let mut adx_value = dx[..period].iter().sum::<f64>() / period as f64;
    for &d in &dx[period..] {
        adx_value = (adx_value * (period as f64 - 1.0) + d) / period as f64;
    }
    finite(adx_value)
}

pub fn cci(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period {
        return None;
    }
    let typical: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(|c| (c.high + c.low + c.close) / 3.0)
        .collect();
    let mean = typical.iter().sum::<f64>() / period as f64;
    let mean_dev = typical.iter().map(|t| (t - mean).abs()).sum::<f64>() / period as f64;
    if mean_dev == 0.0 {
        return None;
    }
    finite((typical[typical.len() - 1] - mean) / (0.015 * mean_dev))
}

pub fn bollinger(values: &[f64], period: usize, num_std: f64) -> Option<Bands> {
    let middle = sma(values, period)?;
    let sd = std_dev(values, period)?;
    Some(Bands {
        upper: middle + num_std * sd,
        middle,
        lower: middle - num_std * sd,
    })
}

/// Keltner channel: EMA20 center, 2 * ATR20 half-width.
pub fn keltner(candles: &[Candle], period: usize, atr_mult: f64) -> Option<Bands> {
    let close_values = closes(candles);
    let middle = ema(&close_values, period)?;
    let atr_value = atr(candles, period)?;
    Some(Bands {
        upper: middle + atr_mult * atr_value,
        middle,
        lower: middle - atr_mult * atr_value,
    })
}

/// SuperTrend: final bands carried forward from basic bands
/// mid +/- multiplier * ATR; direction flips when close crosses a band.
pub fn supertrend(candles: &[Candle], period: usize, multiplier: f64) -> Option<SuperTrend> {
    if candles.len() < period + 2 {
        return None;
    }

    let tr = true_ranges(candles);
    // ATR series with Wilder smoothing, starting at index `period`.
    let mut atr_values = Vec::with_capacity(candles.len());
    let mut atr_value = tr[1..=period].iter().sum::<f64>() / period as f64;
    atr_values.push(atr_value);
    for &t in &tr[period + 1..] {
        atr_value = (atr_value * (period as f64 - 1.0) + t) / period as f64;
        atr_values.push(atr_value);
    }

    let start = period; // candle index of atr_values[0]
    let mut upper = 0.0_f64;
    let mut lower = 0.0_f64;
    let mut direction = TrendSide::Up;
    let mut value = 0.0_f64;

    for (offset, &atr_now) in atr_values.iter().enumerate() {
        let i = start + offset;
        let c = &candles[i];
        let mid = (c.high + c.low) / 2.0;
        let basic_upper = mid + multiplier * atr_now;
        let basic_lower = mid - multiplier * atr_now;

        if offset == 0 {
            upper = basic_upper;
            lower = basic_lower;
            direction = if c.close > mid { TrendSide::Up } else { TrendSide::Down };
            value = if direction == TrendSide::Up { lower } else { upper };
            continue;
        }

        let prev_close = candles[i - 1].close;
        upper = if basic_upper < upper || prev_close > upper {
            basic_upper
        } else {
            upper
        };
        lower = if basic_lower > lower || prev_close < lower {
            basic_lower
        } else {
            lower
        };

        direction = match direction {
            TrendSide::Up if c.close < lower => TrendSide::Down,
            TrendSide::Down if c.close > upper => TrendSide::Up,
            d => d,
        };
        value = if direction == TrendSide::Up { lower } else { upper };
    }

    if !value.is_finite() {
        return None;
    }
    Some(SuperTrend { value, direction })
}

pub fn donchian(candles: &[Candle], period: usize) -> Option<DonchianChannel> {
    if candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let upper = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lower = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if !upper.is_finite() || !lower.is_finite() {
        return None;
    }
    Some(DonchianChannel { upper, lower })
}

/// Parabolic SAR with acceleration `step` capped at `max_step`.
pub fn parabolic_sar(candles: &[Candle], step: f64, max_step: f64) -> Option<f64> {
    if candles.len() < 3 {
        return None;
    }

    let mut rising = candles[1].close > candles[0].close;
    let mut sar = if rising { candles[0].low } else { candles[0].high };
    let mut extreme = if rising { candles[0].high } else { candles[0].low };
    let mut af = step;

    for i in 1..candles.len() {
        let c = &candles[i];
        sar += af * (extreme - sar);

        if rising {
            // SAR must stay below the prior two lows.
            sar = sar.min(candles[i - 1].low);
            if i >= 2 {
                sar = sar.min(candles[i - 2].low);
            }
            if c.low < sar {
                rising = false;
                sar = extreme;
                extreme = c.low;
                af = step;
            } else if c.high > extreme {
                extreme = c.high;
                af = (af + step).min(max_step);
            }
        } else {
            sar = sar.max(candles[i - 1].high);
            if i >= 2 {
                sar = sar.max(candles[i - 2].high);
            }
            if c.high > sar {
                rising = true;
                sar = extreme;
                extreme = c.high;
                af = step;
            } else if c.low < extreme {
                extreme = c.low;
                af = (af + step).min(max_step);
            }
        }
    }
    finite(sar)
}

// ============================================================================
// Statistical
// ============================================================================

/// On-balance volume using tick_count as the volume proxy.
pub fn obv(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 2 {
        return None;
    }
    let mut value = 0.0;
    for w in candles.windows(2) {
        if w[1].close > w[0].close {
            value += w[1].tick_count as f64;
        } else if w[1].close < w[0].close {
            value -= w[1].tick_count as f64;
        }
    }
    finite(value)
}

/// Mean-reversion z-score: (last - mean) / stddev over `period`.
pub fn zscore(values: &[f64], period: usize) -> Option<f64> {
    let mean = sma(values, period)?;
    let sd = std_dev(values, period)?;
    if sd == 0.0 {
        return None;
    }
    finite((values[values.len() - 1] - mean) / sd)
}

/// Least-squares slope of close against candle index over `period`.
pub fn linreg_slope(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let n = period as f64;
    let sum_x = (0..period).sum::<usize>() as f64;
    let sum_y: f64 = window.iter().sum();
    let sum_xy: f64 = window.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..period).map(|i| (i * i) as f64).sum();

    let denom = n * sum_x2 - sum_x * sum_x;
    if denom == 0.0 {
        return None;
    }
    finite((n * sum_xy - sum_x * sum_y) / denom)
}

/// Fisher transform over candle midpoints, clipped inside (-0.999, 0.999).
pub fn fisher_transform(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period + 1 {
        return None;
    }

    let mids: Vec<f64> = candles.iter().map(|c| c.midpoint()).collect();
    let mut value = 0.0_f64;
    let mut fish = 0.0_f64;

    for end in period..=mids.len() {
        let window = &mids[end - period..end];
        let max = window.iter().fold(f64::MIN, |a, &b| a.max(b));
        let min = window.iter().fold(f64::MAX, |a, &b| a.min(b));
        let raw = if max - min == 0.0 {
            0.0
        } else {
            (mids[end - 1] - min) / (max - min) - 0.5
        };

        value = (0.66 * raw + 0.67 * value).clamp(-0.999, 0.999);
        fish = 0.5 * ((1.0 + value) / (1.0 - value)).ln() + 0.5 * fish;
    }
    finite(fish)
}

/// Position of the last close inside the 20-bar high/low envelope, 0..100.
pub fn range_percentile(candles: &[Candle], period: usize) -> Option<f64> {
    if candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if high - low == 0.0 {
        return None;
    }
    finite((window.last().unwrap().close - low) / (high - low) * 100.0)
}

// ============================================================================
// Full computation
// ============================================================================

/// Compute every indicator for one candle array (the tail may be a forming
/// candle). Deterministic: identical input always yields identical output.
pub fn compute_all(candles: &[Candle]) -> IndicatorValues {
    let close_values = closes(candles);

    let ema5 = ema(&close_values, 5);
    let ema9 = ema(&close_values, 9);
    let ema12 = ema(&close_values, 12);
    let ema21 = ema(&close_values, 21);
    let ema50 = ema(&close_values, 50);

    let ema_ribbon = match (ema5, ema9, ema12, ema21, ema50) {
        (Some(a), Some(b), Some(c), Some(d), Some(e)) => Some((a + b + c + d + e) / 5.0),
        _ => None,
    };

    let atr14 = atr(candles, 14);
    let atr_bands = match (sma(&close_values, 20), atr14) {
        (Some(middle), Some(a)) => Some(Bands {
            upper: middle + 2.0 * a,
            middle,
            lower: middle - 2.0 * a,
        }),
        _ => None,
    };

    IndicatorValues {
        ema5,
        ema9,
        ema12,
        ema21,
        ema50,
        sma20: sma(&close_values, 20),
        sma50: sma(&close_values, 50),
        sma200: sma(&close_values, 200),
        hull9: hull_ma(&close_values, 9),
        macd: macd(&close_values, 12, 26, 9),
        rsi14: rsi(&close_values, 14),
        stochastic: stochastic(candles, 14, 3),
        atr14,
        adx14: adx(candles, 14),
        cci20: cci(candles, 20),
        williams_r14: williams_r(candles, 14),
        bollinger: bollinger(&close_values, 20, 2.0),
        keltner: keltner(candles, 20, 2.0),
        supertrend: supertrend(candles, 10, 3.0),
        roc12: roc(&close_values, 12),
        momentum10: momentum(&close_values, 10),
        donchian20: donchian(candles, 20),
        psar: parabolic_sar(candles, 0.02, 0.2),
        obv: obv(candles),
        ultimate: ultimate_oscillator(candles, 7, 14, 28),
        zscore20: zscore(&close_values, 20),
        linreg_slope14: linreg_slope(&close_values, 14),
        fisher: fisher_transform(candles, 10),
        atr_bands,
        range_percentile20: range_percentile(candles, 20),
        ema_ribbon,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn trending_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                candle(base, base + 0.4, base - 0.3, base + 0.25, i as i64 * 60)
            })
            .collect()
    }

    fn flat_candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(100.0, 100.0, 100.0, 100.0, i as i64 * 60))
            .collect()
    }

    #[test]
    fn test_ema_insufficient_history() {
        assert!(ema(&[1.0, 2.0], 5).is_none());
        assert!(ema_series(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn test_ema_constant_series() {
        let values = vec![5.0; 30];
        let result = ema(&values, 9).unwrap();
        assert!((result - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 5).unwrap(), 3.0);
        assert_eq!(sma(&values, 2).unwrap(), 4.5);
        assert!(sma(&values, 6).is_none());
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&values, 14).unwrap(), 100.0);
    }

    #[test]
    fn test_rsi_bounds() {
        let values: Vec<f64> = (0..40)
            .map(|i| 100.0 + ((i * 17) % 7) as f64 - 3.0)
            .collect();
        let value = rsi(&values, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_macd_requires_slow_plus_signal() {
        let values: Vec<f64> = (0..34).map(|i| i as f64).collect();
        assert!(macd(&values, 12, 26, 9).is_none());
        let values: Vec<f64> = (0..35).map(|i| i as f64).collect();
        assert!(macd(&values, 12, 26, 9).is_some());
    }

    #[test]
    fn test_macd_uptrend_positive() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).powf(1.2)).collect();
        let result = macd(&values, 12, 26, 9).unwrap();
        assert!(result.macd > 0.0);
        assert!((result.histogram - (result.macd - result.signal)).abs() < 1e-9);
    }

    #[test]
    fn test_stochastic_flat_market_absent() {
        let candles = flat_candles(30);
        assert!(stochastic(&candles, 14, 3).is_none());
    }

    #[test]
    fn test_stochastic_uptrend_high_k() {
        let candles = trending_candles(40);
        let result = stochastic(&candles, 14, 3).unwrap();
        assert!(result.k > 50.0);
        assert!((0.0..=100.0).contains(&result.k));
        assert!((0.0..=100.0).contains(&result.d));
    }

    #[test]
    fn test_atr_positive() {
        let candles = trending_candles(30);
        let value = atr(&candles, 14).unwrap();
        assert!(value > 0.0);
    }

    #[test]
    fn test_adx_needs_double_period() {
        let candles = trending_candles(28);
        assert!(adx(&candles, 14).is_none());
        let candles = trending_candles(40);
        let value = adx(&candles, 14).unwrap();
        assert!((0.0..=100.0).contains(&value));
        // Steady uptrend should register as trending.
        assert!(value > 18.0);
    }

    #[test]
    fn test_bollinger_envelope() {
        let candles = trending_candles(30);
        let close_values: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let bands = bollinger(&close_values, 20, 2.0).unwrap();
        assert!(bands.lower < bands.middle);
        assert!(bands.middle < bands.upper);
    }

    #[test]
    fn test_supertrend_direction_in_uptrend() {
        let candles = trending_candles(50);
        let st = supertrend(&candles, 10, 3.0).unwrap();
        assert_eq!(st.direction, TrendSide::Up);
        assert!(st.value < candles.last().unwrap().close);
    }

    #[test]
    fn test_supertrend_direction_in_downtrend() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| {
                let base = 200.0 - i as f64 * 0.5;
                candle(base, base + 0.3, base - 0.4, base - 0.25, i as i64 * 60)
            })
            .collect();
        let st = supertrend(&candles, 10, 3.0).unwrap();
        assert_eq!(st.direction, TrendSide::Down);
    }

    #[test]
    fn test_donchian() {
        let candles = trending_candles(25);
        let channel = donchian(&candles, 20).unwrap();
        assert!(channel.upper > channel.lower);
        assert_eq!(channel.upper, candles.last().unwrap().high);
    }

    #[test]
    fn test_psar_below_price_in_uptrend() {
        let candles = trending_candles(40);
        let sar = parabolic_sar(&candles, 0.02, 0.2).unwrap();
        assert!(sar < candles.last().unwrap().close);
    }

    #[test]
    fn test_obv_uptrend_positive() {
        let candles = trending_candles(20);
        assert!(obv(&candles).unwrap() > 0.0);
    }

    #[test]
    fn test_zscore_flat_absent() {
        let values = vec![3.0; 25];
        assert!(zscore(&values, 20).is_none());
    }

    #[test]
    fn test_zscore_sign() {
        let mut values = vec![100.0; 24];
        values.push(105.0);
        assert!(zscore(&values, 20).unwrap() > 0.0);
    }

    #[test]
    fn test_linreg_slope() {
        let values: Vec<f64> = (0..20).map(|i| 2.0 * i as f64 + 1.0).collect();
        let slope = linreg_slope(&values, 14).unwrap();
        assert!((slope - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ultimate_bounds() {
        let candles = trending_candles(40);
        let value = ultimate_oscillator(&candles, 7, 14, 28).unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_williams_r_bounds() {
        let candles = trending_candles(20);
        let value = williams_r(&candles, 14).unwrap();
        assert!((-100.0..=0.0).contains(&value));
    }

    #[test]
    fn test_range_percentile_uptrend_high() {
        let candles = trending_candles(25);
        let value = range_percentile(&candles, 20).unwrap();
        assert!(value > 60.0);
    }

    #[test]
    fn test_compute_all_insufficient_history() {
        let candles = trending_candles(5);
        let values = compute_all(&candles);
        assert!(values.ema50.is_none());
        assert!(values.macd.is_none());
        assert!(values.rsi14.is_none());
        assert!(values.adx14.is_none());
        assert!(values.sma200.is_none());
        // Short-window indicators are available early.
        assert!(values.ema5.is_some());
    }

    #[test]
    fn test_compute_all_deterministic() {
        let candles = trending_candles(80);
        let a = compute_all(&candles);
        let b = compute_all(&candles);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_compute_all_full_history() {
        let candles = trending_candles(80);
        let values = compute_all(&candles);
        assert!(values.ema5.is_some());
        assert!(values.ema50.is_some());
        assert!(values.hull9.is_some());
        assert!(values.macd.is_some());
        assert!(values.rsi14.is_some());
        assert!(values.stochastic.is_some());
        assert!(values.atr14.is_some());
        assert!(values.adx14.is_some());
        assert!(values.cci20.is_some());
        assert!(values.williams_r14.is_some());
        assert!(values.bollinger.is_some());
        assert!(values.keltner.is_some());
        assert!(values.supertrend.is_some());
        assert!(values.roc12.is_some());
        assert!(values.momentum10.is_some());
        assert!(values.donchian20.is_some());
        assert!(values.psar.is_some());
        assert!(values.obv.is_some());
        assert!(values.ultimate.is_some());
        assert!(values.linreg_slope14.is_some());
        assert!(values.fisher.is_some());
        assert!(values.atr_bands.is_some());
        assert!(values.range_percentile20.is_some());
        assert!(values.ema_ribbon.is_some());
    }
}
