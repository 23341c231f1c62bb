//! Technical indicator primitives over OHLCV bar series.
//!
//! All functions are pure and operate on full series so callers can inspect
//! the most recent values as well as short trailing windows (histogram
//! acceleration, squeeze history). Insufficient history yields neutral
//! values, never panics.

use crate::types::{Bar, Direction};

/// Exponential moving average with span-based smoothing (k = 2 / (span + 1)),
/// seeded at the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let k = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for v in &values[1..] {
        current += k * (v - current);
        out.push(current);
    }
    out
}

/// Exponential moving average with explicit alpha (Wilder-style when
/// alpha = 1/period), seeded at the first value.
pub fn ema_alpha(values: &[f64], alpha: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for v in &values[1..] {
        current += alpha * (v - current);
        out.push(current);
    }
    out
}

/// Rolling mean; windows shorter than `period` use the available prefix.
pub fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        let window = (i + 1).min(period) as f64;
        out.push(sum / window);
    }
    out
}

/// Rolling sample standard deviation (ddof = 1); zero while the window has
/// fewer than two values.
pub fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let means = rolling_mean(values, period);
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(period);
        let window = &values[start..=i];
        if window.len() < 2 {
            out.push(0.0);
            continue;
        }
        let mean = means[i];
        let var: f64 =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window.len() - 1) as f64;
        out.push(var.sqrt());
    }
    out
}

/// Momentum oscillator (RSI-style), exponentially smoothed gains/losses with
/// alpha = 1/period. The first sample is neutral (50).
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    if n < 2 {
        return vec![50.0; n];
    }
    let alpha = 1.0 / period as f64;
    let mut out = Vec::with_capacity(n);
    out.push(50.0);
    let mut avg_gain = (close[1] - close[0]).max(0.0);
    let mut avg_loss = (close[0] - close[1]).max(0.0);
    out.push(rsi_value(avg_gain, avg_loss));
    for i in 2..n {
        let delta = close[i] - close[i - 1];
        avg_gain += alpha * (delta.max(0.0) - avg_gain);
        avg_loss += alpha * ((-delta).max(0.0) - avg_loss);
        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= f64::EPSILON {
        if avg_gain <= f64::EPSILON {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Trend-momentum histogram series (MACD-style)
#[derive(Debug, Clone)]
pub struct MacdSeries {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD with 12/26 EMA difference and a 9-period signal line.
pub fn macd(close: &[f64]) -> MacdSeries {
    let fast = ema(close, 12);
    let slow = ema(close, 26);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema(&line, 9);
    let histogram: Vec<f64> = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    MacdSeries {
        line,
        signal,
        histogram,
    }
}

/// Bollinger bands: (upper, mid, lower) at 20 periods, +/- 2 sigma unless
/// overridden.
pub fn bollinger(close: &[f64], period: usize, k: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let mid = rolling_mean(close, period);
    let dev = rolling_std(close, period);
    let upper: Vec<f64> = mid.iter().zip(&dev).map(|(m, d)| m + k * d).collect();
    let lower: Vec<f64> = mid.iter().zip(&dev).map(|(m, d)| m - k * d).collect();
    (upper, mid, lower)
}

/// True range series: max(h-l, |h-prev_close|, |l-prev_close|).
pub fn true_range(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        let hl = bar.high - bar.low;
        let tr = if i == 0 {
            hl
        } else {
            let prev_close = bars[i - 1].close;
            hl.max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        out.push(tr);
    }
    out
}

/// Average true range, exponentially smoothed with alpha = 1/period.
pub fn atr(bars: &[Bar], period: usize) -> Vec<f64> {
    ema_alpha(&true_range(bars), 1.0 / period as f64)
}

/// On-balance volume: cumulative signed volume.
pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut cum = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        if i > 0 {
            let delta = bar.close - bars[i - 1].close;
            if delta > 0.0 {
                cum += bar.volume;
            } else if delta < 0.0 {
                cum -= bar.volume;
            }
        }
        out.push(cum);
    }
    out
}

/// Session VWAP: cumulative typical-price x volume over cumulative volume.
pub fn vwap(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut sum_pv = 0.0;
    let mut sum_vol = 0.0;
    for bar in bars {
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        sum_pv += typical * bar.volume;
        sum_vol += bar.volume;
        if sum_vol > 0.0 {
            out.push(sum_pv / sum_vol);
        } else {
            out.push(typical);
        }
    }
    out
}

/// Volatility-compression read for the most recent bar
#[derive(Debug, Clone, Copy)]
pub struct SqueezeRead {
    /// Bollinger bands currently strictly inside the Keltner channels
    pub in_squeeze: bool,
    /// Squeeze present in any of the prior 1-3 bars and gone now
    pub breakout: bool,
    /// Sign of the price divergence from its 14-bar mean
    pub direction: Direction,
    /// Divergence magnitude as a percentage of price
    pub strength_pct: f64,
}

/// Bollinger-vs-Keltner squeeze detection on the latest bar.
/// Returns None when the series is too short to form the bands.
pub fn detect_squeeze(bars: &[Bar]) -> Option<SqueezeRead> {
    if bars.len() < 20 {
        return None;
    }
    let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let (bb_upper, bb_mid, bb_lower) = bollinger(&close, 20, 2.0);
    let atr14 = atr(bars, 14);

    let n = bars.len();
    let in_squeeze: Vec<bool> = (0..n)
        .map(|i| {
            let kc_upper = bb_mid[i] + 1.5 * atr14[i];
            let kc_lower = bb_mid[i] - 1.5 * atr14[i];
            bb_upper[i] < kc_upper && bb_lower[i] > kc_lower
        })
        .collect();

    let was_squeezing = in_squeeze[n.saturating_sub(4)..n - 1].iter().any(|s| *s);
    let breakout = was_squeezing && !in_squeeze[n - 1];

    let mean14 = rolling_mean(&close, 14);
    let divergence = close[n - 1] - mean14[n - 1];
    let direction = if divergence > 0.0 {
        Direction::Call
    } else {
        Direction::Put
    };
    let strength_pct = if close[n - 1] > 0.0 {
        divergence.abs() / close[n - 1] * 100.0
    } else {
        0.0
    };

    Some(SqueezeRead {
        in_squeeze: in_squeeze[n - 1],
        breakout,
        direction,
        strength_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_bar(ts: i64, price: f64, volume: f64) -> Bar {
        Bar {
            ts,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    #[test]
    fn test_ema_seeds_and_converges() {
        let values = vec![10.0; 50];
        let out = ema(&values, 12);
        assert_eq!(out.len(), 50);
        assert!((out[49] - 10.0).abs() < 1e-9);

        // Rising series keeps the EMA below the latest value
        let rising: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let out = ema(&rising, 12);
        assert!(out[49] < rising[49]);
        assert!(out[49] > rising[0]);
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&rising, 14);
        assert!(out[59] > 95.0, "all-gain series should read ~100, got {}", out[59]);

        let falling: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let out = rsi(&falling, 14);
        assert!(out[59] < 5.0, "all-loss series should read ~0, got {}", out[59]);

        let flat = vec![100.0; 60];
        let out = rsi(&flat, 14);
        assert!((out[59] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_histogram_sign_on_trend() {
        // Accelerating uptrend: MACD line above signal, histogram positive
        let close: Vec<f64> = (0..80).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let m = macd(&close);
        assert!(m.line[79] > 0.0);
        assert!(m.histogram[79] > 0.0);
    }

    #[test]
    fn test_obv_accumulates_signed_volume() {
        let bars = vec![
            flat_bar(0, 100.0, 1000.0),
            flat_bar(1, 101.0, 500.0),
            flat_bar(2, 100.5, 200.0),
            flat_bar(3, 100.5, 900.0),
        ];
        let out = obv(&bars);
        assert_eq!(out, vec![0.0, 500.0, 300.0, 300.0]);
    }

    #[test]
    fn test_vwap_weights_by_volume() {
        let bars = vec![flat_bar(0, 100.0, 100.0), flat_bar(1, 200.0, 300.0)];
        let out = vwap(&bars);
        // (100*100 + 200*300) / 400 = 175
        assert!((out[1] - 175.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_on_constant_range() {
        let bars: Vec<Bar> = (0..40)
            .map(|i| Bar {
                ts: i,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect();
        let out = atr(&bars, 14);
        assert!((out[39] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_squeeze_breakout_after_compression() {
        // 30 quiet bars coiling in a tight range, then a hard expansion
        let mut bars: Vec<Bar> = (0..30)
            .map(|i| Bar {
                ts: i,
                open: 100.0,
                high: 100.1,
                low: 99.9,
                close: 100.0 + if i % 2 == 0 { 0.02 } else { -0.02 },
                volume: 1000.0,
            })
            .collect();
        let read = detect_squeeze(&bars).unwrap();
        assert!(read.in_squeeze, "tight range inside wide ATR channel should squeeze");

        bars.push(Bar {
            ts: 30,
            open: 100.0,
            high: 106.0,
            low: 100.0,
            close: 106.0,
            volume: 5000.0,
        });
        let read = detect_squeeze(&bars).unwrap();
        assert!(read.breakout, "expansion out of a prior squeeze is a breakout");
        assert_eq!(read.direction, Direction::Call);
        assert!(read.strength_pct > 0.5);
    }

    #[test]
    fn test_squeeze_requires_history() {
        let bars: Vec<Bar> = (0..10).map(|i| flat_bar(i, 100.0, 1.0)).collect();
        assert!(detect_squeeze(&bars).is_none());
    }
}
