//! Signal engine: regime detection, multi-timeframe scoring, bonus merge
//! and ranking.
//!
//! One cycle builds a [`CycleContext`] (regime + provider scans) up front,
//! then scores every symbol in the universe against it. All cycle state is
//! passed explicitly; nothing is cached across cycles.

pub mod scorer;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SignalsConfig;
use crate::error::EngineError;
use crate::indicators;
use crate::providers::{BonusProvider, MarketData};
use crate::types::{
    Bar, BonusGrade, Direction, DirectionHint, Regime, Signal, Timeframe, TimeframeBreakdown,
};

use scorer::TimeframeScorer;

/// One bonus provider's graded output for the cycle
pub struct ProviderScan {
    pub name: String,
    /// Per-symbol bonus cap, from [`BonusProvider::max_bonus`]
    pub cap: f64,
    pub grades: HashMap<String, BonusGrade>,
}

/// Per-cycle state, built once and passed through the scan
pub struct CycleContext {
    pub regime: Regime,
    /// Provider scans in configured order; later providers win direction
    /// conflicts
    pub scans: Vec<ProviderScan>,
}

pub struct SignalEngine {
    market_data: Arc<dyn MarketData>,
    config: SignalsConfig,
    scorer: TimeframeScorer,
}

impl SignalEngine {
    pub fn new(market_data: Arc<dyn MarketData>, config: SignalsConfig) -> Self {
        Self {
            market_data,
            config,
            scorer: TimeframeScorer,
        }
    }

    /// Classify the broad market from the reference symbol's daily series.
    /// Any failure is fail-soft: the cycle proceeds as `Neutral`.
    pub async fn market_regime(&self) -> Regime {
        let symbol = &self.config.reference_symbol;
        let bars = match self
            .market_data
            .fetch_bars(symbol, Timeframe::Day1, Timeframe::Day1.lookback_days())
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "regime fetch failed, assuming neutral");
                return Regime::Neutral;
            }
        };
        if bars.len() < 50 {
            debug!(symbol = %symbol, bars = bars.len(), "too little daily history for regime");
            return Regime::Neutral;
        }

        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let n = close.len();
        let ema20 = indicators::ema(&close, 20)[n - 1];
        let ema50 = indicators::ema(&close, 50)[n - 1];
        let price = close[n - 1];

        let regime = if price > ema20 && ema20 > ema50 {
            Regime::Bull
        } else if price < ema20 && ema20 < ema50 {
            Regime::Bear
        } else {
            Regime::Neutral
        };
        info!(%regime, price, ema20, ema50, "market regime");
        regime
    }

    /// Build the per-cycle context: one regime read plus one scan per bonus
    /// provider. A failing provider contributes nothing this cycle.
    pub async fn build_context(&self, providers: &[Arc<dyn BonusProvider>]) -> CycleContext {
        let regime = self.market_regime().await;

        let mut scans = Vec::with_capacity(providers.len());
        for provider in providers {
            let name = provider.name().to_string();
            let grades = match provider.scan(&self.config.watchlist).await {
                Ok(grades) => grades,
                Err(e) => {
                    warn!(provider = %name, error = %e, "bonus provider scan failed");
                    HashMap::new()
                }
            };
            debug!(provider = %name, graded = grades.len(), "provider scan done");
            scans.push(ProviderScan {
                name,
                cap: provider.max_bonus(),
                grades,
            });
        }

        CycleContext { regime, scans }
    }

    /// Score one symbol against the cycle context. `Ok(None)` means no
    /// tradable signal (missing data, no direction, or too weak).
    pub async fn score_symbol(
        &self,
        symbol: &str,
        ctx: &CycleContext,
    ) -> Result<Option<Signal>, EngineError> {
        let mut series: Vec<(Timeframe, Vec<Bar>)> = Vec::with_capacity(3);
        for timeframe in Timeframe::scored() {
            let bars = match self
                .market_data
                .fetch_bars(symbol, timeframe, timeframe.lookback_days())
                .await
            {
                Ok(bars) => bars,
                // An explicit data gap is a neutral result, same as an
                // empty series
                Err(EngineError::NoData { .. }) => {
                    debug!(symbol, %timeframe, "no data for timeframe, no signal");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if bars.is_empty() {
                debug!(symbol, %timeframe, "empty series, no signal");
                return Ok(None);
            }
            series.push((timeframe, bars));
        }

        let mut breakdown = TimeframeBreakdown::default();
        let mut weighted = 0.0;
        let mut reasons: Vec<String> = Vec::new();
        let mut tf_directions: Vec<Option<Direction>> = Vec::with_capacity(3);
        for (timeframe, bars) in &series {
            let tf_score = self.scorer.score_timeframe(bars, timeframe.label());
            match timeframe {
                Timeframe::Hour1 => breakdown.hour1 = tf_score.score,
                Timeframe::Min15 => breakdown.min15 = tf_score.score,
                Timeframe::Min5 => breakdown.min5 = tf_score.score,
                Timeframe::Day1 => {}
            }
            weighted += tf_score.score * timeframe.composite_weight();
            tf_directions.push(tf_score.direction);
            reasons.extend(tf_score.reasons);
        }

        let (confluence, mut direction) = confluence_vote(&tf_directions);

        // Volatility sweet spot from the longest timeframe
        let hour1_bars = &series[0].1;
        let price = hour1_bars.last().map(|b| b.close).unwrap_or(0.0);
        let vol_pct = if price > 0.0 {
            let atr = indicators::atr(hour1_bars, 14);
            atr[atr.len() - 1] / price * 100.0
        } else {
            0.0
        };
        let vol_bonus = volatility_bonus(vol_pct);

        // External provider bonuses and direction hints
        let mut bonuses: Vec<(String, f64)> = Vec::new();
        let mut bonus_total = 0.0;
        for scan in &ctx.scans {
            if let Some(grade) = scan.grades.get(symbol) {
                // Floor at zero so a provider can never drag the composite
                // below the technical score
                let bonus = grade.score.max(0.0).min(scan.cap);
                if bonus > 0.0 {
                    bonuses.push((scan.name.clone(), bonus));
                    bonus_total += bonus;
                }
                reasons.extend(grade.reasons.iter().cloned());
                match grade.hint {
                    DirectionHint::Neutral => {}
                    DirectionHint::Suggest(d) => {
                        if direction.is_none() {
                            direction = Some(d);
                        }
                    }
                    DirectionHint::Override(d) => {
                        if grade.score >= self.config.override_threshold {
                            direction = Some(d);
                        } else if direction.is_none() {
                            direction = Some(d);
                        }
                    }
                }
            }
        }

        let Some(direction) = direction else {
            debug!(symbol, "no direction consensus, dropped");
            return Ok(None);
        };

        let (regime_bonus, regime_aligned) = regime_bonus(ctx.regime, direction);
        let score = weighted + confluence as f64 + regime_bonus + vol_bonus + bonus_total;

        Ok(Some(Signal {
            symbol: symbol.to_string(),
            direction,
            score,
            price,
            confluence,
            regime_aligned,
            vol_pct,
            timeframe_scores: breakdown,
            bonuses,
            reasons,
        }))
    }

    /// Scan the universe and return qualifying signals ranked by confluence
    /// first, composite score second. Per-symbol failures are logged and
    /// skipped.
    pub async fn top_signals(&self, ctx: &CycleContext) -> Vec<Signal> {
        let mut universe: Vec<String> = self.config.watchlist.clone();
        // Symbols the providers surfaced beyond the watchlist, in sorted
        // order so the ranking never depends on map iteration order
        let discovered: BTreeSet<&String> = ctx
            .scans
            .iter()
            .flat_map(|s| s.grades.keys())
            .filter(|sym| !universe.contains(sym))
            .collect();
        universe.extend(discovered.into_iter().cloned());

        let mut signals: Vec<Signal> = Vec::new();
        for symbol in &universe {
            match self.score_symbol(symbol, ctx).await {
                Ok(Some(signal)) if signal.score >= self.config.min_score => {
                    info!(
                        symbol = %signal.symbol,
                        direction = %signal.direction,
                        score = signal.score,
                        confluence = signal.confluence,
                        "signal"
                    );
                    signals.push(signal);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "symbol scan failed, skipping");
                }
            }
        }

        signals.sort_by(|a, b| {
            b.confluence
                .cmp(&a.confluence)
                .then(b.score.total_cmp(&a.score))
        });
        signals
    }
}

/// Confluence bonus and majority direction across the three timeframe votes.
/// All three agreeing earns +4, exactly two +2. A tie yields no direction.
pub fn confluence_vote(directions: &[Option<Direction>]) -> (u8, Option<Direction>) {
    let call_tfs = directions
        .iter()
        .filter(|d| **d == Some(Direction::Call))
        .count();
    let put_tfs = directions
        .iter()
        .filter(|d| **d == Some(Direction::Put))
        .count();

    let confluence = if call_tfs == 3 || put_tfs == 3 {
        4
    } else if call_tfs == 2 || put_tfs == 2 {
        2
    } else {
        0
    };
    let direction = match call_tfs.cmp(&put_tfs) {
        std::cmp::Ordering::Greater => Some(Direction::Call),
        std::cmp::Ordering::Less => Some(Direction::Put),
        std::cmp::Ordering::Equal => None,
    };
    (confluence, direction)
}

/// Regime bonus: +2 aligned with the favored direction, +1 flat when
/// neutral. Neutral never penalizes.
pub fn regime_bonus(regime: Regime, direction: Direction) -> (f64, bool) {
    match regime.favored_direction() {
        Some(favored) if favored == direction => (2.0, true),
        Some(_) => (0.0, false),
        None => (1.0, false),
    }
}

/// Volatility sweet spot from the 1H ATR as a percent of price: enough
/// movement to pay for the premium, not so much that spreads blow out.
pub fn volatility_bonus(vol_pct: f64) -> f64 {
    if (1.0..=4.0).contains(&vol_pct) {
        2.0
    } else if (0.5..1.0).contains(&vol_pct) {
        1.0
    } else {
        0.0
    }
}
