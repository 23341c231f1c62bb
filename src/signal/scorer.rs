//! Per-timeframe conviction scoring.
//!
//! Converts one bar series into a bounded score, a direction vote and the
//! human-readable reasons behind both. Five components contribute: momentum
//! oscillator, trend-momentum histogram, volatility squeeze, volume
//! confirmation and VWAP deviation. The score feeds the composite ranking;
//! the reasons feed the audit trail only.

use crate::indicators;
use crate::types::{Bar, Direction, TimeframeScore};

/// Minimum bars required before any component is evaluated.
pub const MIN_BARS: usize = 30;

#[derive(Debug, Default)]
pub struct TimeframeScorer;

impl TimeframeScorer {
    /// Score one series. Fewer than [`MIN_BARS`] bars is a neutral result
    /// (score 0, no direction), not an error.
    pub fn score_timeframe(&self, bars: &[Bar], label: &str) -> TimeframeScore {
        if bars.len() < MIN_BARS {
            return TimeframeScore::neutral();
        }

        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let n = bars.len();

        let mut score = 0.0;
        let mut votes: Vec<Direction> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();

        // 1. Momentum oscillator
        let rsi = indicators::rsi(&close, 14);
        let rsi_now = rsi[n - 1];
        let rsi_prev = rsi[n - 2];
        if rsi_now > 70.0 && rsi_now > rsi_prev {
            score += 3.0;
            votes.push(Direction::Call);
            reasons.push(format!("[{label}] RSI momentum strong ({rsi_now:.0}, rising)"));
        } else if rsi_now > 60.0 {
            score += 2.0;
            votes.push(Direction::Call);
            reasons.push(format!("[{label}] RSI bullish ({rsi_now:.0})"));
        } else if rsi_now < 30.0 && rsi_now < rsi_prev {
            score += 3.0;
            votes.push(Direction::Put);
            reasons.push(format!("[{label}] RSI oversold & falling ({rsi_now:.0})"));
        } else if rsi_now < 40.0 {
            score += 2.0;
            votes.push(Direction::Put);
            reasons.push(format!("[{label}] RSI bearish ({rsi_now:.0})"));
        }

        // 2. Trend-momentum histogram
        let macd = indicators::macd(&close);
        let hist_now = macd.histogram[n - 1];
        let hist_prev = macd.histogram[n - 2];
        let hist_prev2 = macd.histogram[n - 3];
        if hist_now > 0.0 && hist_now > hist_prev && hist_prev > hist_prev2 {
            score += 3.0;
            votes.push(Direction::Call);
            reasons.push(format!("[{label}] MACD histogram accelerating bullish"));
        } else if hist_now > 0.0 && hist_now > hist_prev {
            score += 2.0;
            votes.push(Direction::Call);
            reasons.push(format!("[{label}] MACD histogram bullish"));
        } else if hist_now < 0.0 && hist_now < hist_prev && hist_prev < hist_prev2 {
            score += 3.0;
            votes.push(Direction::Put);
            reasons.push(format!("[{label}] MACD histogram accelerating bearish"));
        } else if hist_now < 0.0 && hist_now < hist_prev {
            score += 2.0;
            votes.push(Direction::Put);
            reasons.push(format!("[{label}] MACD histogram bearish"));
        }

        // 3. Volatility squeeze
        if let Some(squeeze) = indicators::detect_squeeze(bars) {
            if squeeze.breakout && squeeze.strength_pct > 0.5 {
                score += 3.0;
                votes.push(squeeze.direction);
                reasons.push(format!(
                    "[{label}] BB squeeze breakout -> {} ({:.2}%)",
                    squeeze.direction, squeeze.strength_pct
                ));
            } else if squeeze.in_squeeze {
                // Coiling: worth watching but not yet directional
                score += 1.0;
                reasons.push(format!("[{label}] BB squeeze building (coiling)"));
            }
        }

        // 4. Volume confirmation
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let avg_vol = indicators::rolling_mean(&volume, 20)[n - 1];
        let surge = if avg_vol > 0.0 {
            volume[n - 1] / avg_vol
        } else {
            1.0
        };
        let obv = indicators::obv(bars);
        let obv_rising = obv[n - 1] > indicators::rolling_mean(&obv, 10)[n - 1];
        if surge >= 2.0 {
            score += 3.0;
            if obv_rising {
                votes.push(Direction::Call);
                reasons.push(format!(
                    "[{label}] Massive volume surge ({surge:.1}x) + OBV rising"
                ));
            } else {
                votes.push(Direction::Put);
                reasons.push(format!(
                    "[{label}] Massive volume surge ({surge:.1}x) + OBV falling"
                ));
            }
        } else if surge >= 1.5 {
            score += 2.0;
            votes.push(if obv_rising {
                Direction::Call
            } else {
                Direction::Put
            });
            reasons.push(format!("[{label}] Volume surge ({surge:.1}x)"));
        }

        // 5. VWAP deviation
        let vwap = indicators::vwap(bars)[n - 1];
        let price = close[n - 1];
        if vwap > 0.0 {
            let dev_pct = (price - vwap) / vwap * 100.0;
            if dev_pct > 1.5 {
                score += 1.0;
                votes.push(Direction::Call);
                reasons.push(format!("[{label}] Price {dev_pct:.1}% above VWAP"));
            } else if dev_pct < -1.5 {
                score += 1.0;
                votes.push(Direction::Put);
                reasons.push(format!("[{label}] Price {dev_pct:.1}% below VWAP"));
            }
        }

        let call_votes = votes.iter().filter(|d| **d == Direction::Call).count();
        let put_votes = votes.iter().filter(|d| **d == Direction::Put).count();
        let direction = match call_votes.cmp(&put_votes) {
            std::cmp::Ordering::Greater => Some(Direction::Call),
            std::cmp::Ordering::Less => Some(Direction::Put),
            std::cmp::Ordering::Equal => None,
        };

        TimeframeScore {
            score,
            direction,
            call_votes,
            put_votes,
            reasons,
        }
    }
}
