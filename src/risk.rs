//! Trade admission and account-level discipline.
//!
//! All limits are recomputed from current equity on every check; the only
//! cross-check state is the daily snapshot (start-of-day equity and the
//! kill switch), which rolls over lazily on the first check of a new
//! Eastern calendar day.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::America::New_York;
use std::fmt;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::{Direction, Regime, TradeCandidate};

/// Why a trade was refused. Exactly one specific reason per denial.
#[derive(Debug, Clone, PartialEq)]
pub enum DenialReason {
    KillSwitch { drawdown: f64, limit: f64 },
    InsufficientCapital { available: f64, floor: f64 },
    MaxPositions { open: usize, max: usize },
    CostExceedsAvailable { cost: f64, available: f64 },
    CostExceedsLimit { cost: f64, limit: f64 },
    CounterRegime { regime: Regime, direction: Direction, score: f64, required: f64 },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::KillSwitch { drawdown, limit } => {
                write!(f, "daily loss limit hit (down ${drawdown:.2}, limit ${limit:.2})")
            }
            DenialReason::InsufficientCapital { available, floor } => {
                write!(f, "available capital ${available:.2} below floor ${floor:.2}")
            }
            DenialReason::MaxPositions { open, max } => {
                write!(f, "{open} open positions at limit {max}")
            }
            DenialReason::CostExceedsAvailable { cost, available } => {
                write!(f, "cost ${cost:.2} exceeds available ${available:.2}")
            }
            DenialReason::CostExceedsLimit { cost, limit } => {
                write!(f, "cost ${cost:.2} exceeds capital limit ${limit:.2}")
            }
            DenialReason::CounterRegime { regime, direction, score, required } => {
                write!(
                    f,
                    "{direction} against {regime} regime (score {score:.1} < {required:.1})"
                )
            }
        }
    }
}

/// Outcome of a risk check. Denials are first-class results, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Admitted,
    Denied(DenialReason),
}

impl RiskDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, RiskDecision::Admitted)
    }
}

/// Daily snapshot, keyed by Eastern calendar day
#[derive(Debug, Clone)]
struct DayState {
    day: NaiveDate,
    start_of_day_equity: f64,
    killed: bool,
}

pub struct RiskManager {
    config: RiskConfig,
    day: Option<DayState>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config, day: None }
    }

    /// Dynamic capital limit: base plus half of any gains above base.
    /// Losses never shrink the limit below base.
    pub fn capital_limit(&self, equity: f64) -> f64 {
        self.config.base_capital + 0.5 * (equity - self.config.base_capital).max(0.0)
    }

    /// Max concurrent positions steps up with equity.
    pub fn max_positions(&self, equity: f64) -> usize {
        if equity >= 5_000.0 {
            5
        } else if equity >= 2_500.0 {
            4
        } else {
            3
        }
    }

    /// Daily loss limit as a fraction of current equity.
    pub fn daily_loss_limit(&self, equity: f64) -> f64 {
        self.config.daily_loss_pct * equity
    }

    /// Lazy daily rollover: snapshot equity and clear the kill switch on the
    /// first check of a new Eastern calendar day.
    fn roll_day(&mut self, now: DateTime<Utc>, equity: f64) -> DayState {
        let today = now.with_timezone(&New_York).date_naive();
        match self.day.take() {
            Some(state) if state.day == today => state,
            _ => {
                info!(day = %today, equity, "new trading day, risk state reset");
                DayState {
                    day: today,
                    start_of_day_equity: equity,
                    killed: false,
                }
            }
        }
    }

    /// Admission check, evaluated in strict order. The first failing rule
    /// is the denial reason.
    pub fn can_trade(
        &mut self,
        candidate: &TradeCandidate,
        equity: f64,
        available_capital: f64,
        open_positions: usize,
        regime: Regime,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let state = self.roll_day(now, equity);

        // 1. Kill switch: latched for the rest of the day once fired
        let limit = self.daily_loss_limit(equity);
        let drawdown = state.start_of_day_equity - equity;
        let killed = state.killed || drawdown >= limit;
        if killed && !state.killed {
            warn!(drawdown, limit, "kill switch fired, trading halted for the day");
        }
        self.day = Some(DayState { killed, ..state });
        if killed {
            return RiskDecision::Denied(DenialReason::KillSwitch { drawdown, limit });
        }

        // 2. Minimum tradable capital
        if available_capital < self.config.min_capital_to_trade {
            return RiskDecision::Denied(DenialReason::InsufficientCapital {
                available: available_capital,
                floor: self.config.min_capital_to_trade,
            });
        }

        // 3. Position count
        let max = self.max_positions(equity);
        if open_positions >= max {
            return RiskDecision::Denied(DenialReason::MaxPositions {
                open: open_positions,
                max,
            });
        }

        // 4. Cost vs available capital
        if candidate.total_cost > available_capital {
            return RiskDecision::Denied(DenialReason::CostExceedsAvailable {
                cost: candidate.total_cost,
                available: available_capital,
            });
        }

        // 5. Cost vs dynamic capital limit
        let capital_limit = self.capital_limit(equity);
        if candidate.total_cost > capital_limit {
            return RiskDecision::Denied(DenialReason::CostExceedsLimit {
                cost: candidate.total_cost,
                limit: capital_limit,
            });
        }

        // 6. Regime direction filter: don't fight the macro trend without
        // very strong conviction
        if let Some(favored) = regime.favored_direction() {
            if candidate.direction != favored
                && candidate.signal.score < self.config.regime_override_score
            {
                return RiskDecision::Denied(DenialReason::CounterRegime {
                    regime,
                    direction: candidate.direction,
                    score: candidate.signal.score,
                    required: self.config.regime_override_score,
                });
            }
        }

        RiskDecision::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Signal, TimeframeBreakdown};
    use chrono::TimeZone;

    fn config() -> RiskConfig {
        RiskConfig {
            base_capital: 500.0,
            min_capital_to_trade: 20.0,
            daily_loss_pct: 0.14,
            regime_override_score: 16.0,
        }
    }

    fn candidate(direction: Direction, score: f64, total_cost: f64) -> TradeCandidate {
        TradeCandidate {
            id: "t".to_string(),
            symbol: "TSLA".to_string(),
            direction,
            option_symbol: "TSLA260619C00255000".to_string(),
            strike: 255.0,
            expiry: NaiveDate::from_ymd_opt(2026, 6, 19).unwrap(),
            ask: 2.0,
            bid: 1.9,
            delta: Some(0.4),
            contracts: 1,
            total_cost,
            signal: Signal {
                symbol: "TSLA".to_string(),
                direction,
                score,
                price: 250.0,
                confluence: 4,
                regime_aligned: false,
                vol_pct: 2.0,
                timeframe_scores: TimeframeBreakdown::default(),
                bonuses: Vec::new(),
                reasons: Vec::new(),
            },
        }
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, day, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_admits_clean_trade() {
        let mut risk = RiskManager::new(config());
        let decision = risk.can_trade(
            &candidate(Direction::Call, 15.0, 120.0),
            1000.0,
            500.0,
            0,
            Regime::Bull,
            noon(15),
        );
        assert!(decision.is_admitted());
    }

    #[test]
    fn test_kill_switch_fires_latches_and_resets_next_day() {
        let mut risk = RiskManager::new(config());
        let c = candidate(Direction::Call, 15.0, 100.0);

        // Day starts at $1,000
        assert!(risk
            .can_trade(&c, 1000.0, 500.0, 0, Regime::Bull, noon(15))
            .is_admitted());

        // Down $140.01 against a limit of 14% of current equity ($120.40)
        let decision = risk.can_trade(&c, 859.99, 500.0, 0, Regime::Bull, noon(15));
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::KillSwitch { .. })
        ));

        // Full recovery does not un-latch it
        let decision = risk.can_trade(&c, 1000.0, 500.0, 0, Regime::Bull, noon(15));
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::KillSwitch { .. })
        ));

        // Next calendar day clears it
        assert!(risk
            .can_trade(&c, 1000.0, 500.0, 0, Regime::Bull, noon(16))
            .is_admitted());
    }

    #[test]
    fn test_capital_limit_grows_with_half_of_gains() {
        let risk = RiskManager::new(config());
        assert_eq!(risk.capital_limit(500.0), 500.0);
        assert_eq!(risk.capital_limit(1000.0), 750.0);
        // Losses never shrink it below base
        assert_eq!(risk.capital_limit(300.0), 500.0);
    }

    #[test]
    fn test_max_positions_steps_with_equity() {
        let risk = RiskManager::new(config());
        assert_eq!(risk.max_positions(1000.0), 3);
        assert_eq!(risk.max_positions(2500.0), 4);
        assert_eq!(risk.max_positions(5000.0), 5);
    }

    #[test]
    fn test_denial_reasons_in_strict_order() {
        let mut risk = RiskManager::new(config());
        let c = candidate(Direction::Call, 15.0, 600.0);

        // Capital floor trumps every later rule
        let decision = risk.can_trade(&c, 1000.0, 10.0, 5, Regime::Bull, noon(15));
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::InsufficientCapital { .. })
        ));

        // Position count before cost checks
        let decision = risk.can_trade(&c, 1000.0, 700.0, 3, Regime::Bull, noon(15));
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::MaxPositions { .. })
        ));

        // Cost vs available before cost vs limit
        let decision = risk.can_trade(&c, 1000.0, 550.0, 0, Regime::Bull, noon(15));
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::CostExceedsAvailable { .. })
        ));

        // Affordable in cash terms but above the dynamic limit ($750 at
        // $1,000 equity)
        let big = candidate(Direction::Call, 15.0, 800.0);
        let decision = risk.can_trade(&big, 1000.0, 900.0, 0, Regime::Bull, noon(15));
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::CostExceedsLimit { .. })
        ));
    }

    #[test]
    fn test_counter_regime_needs_high_conviction() {
        let mut risk = RiskManager::new(config());

        // CALL into a bear regime at score 12: denied
        let decision = risk.can_trade(
            &candidate(Direction::Call, 12.0, 100.0),
            1000.0,
            500.0,
            0,
            Regime::Bear,
            noon(15),
        );
        assert!(matches!(
            decision,
            RiskDecision::Denied(DenialReason::CounterRegime { .. })
        ));

        // Same trade at score 17: admitted
        let decision = risk.can_trade(
            &candidate(Direction::Call, 17.0, 100.0),
            1000.0,
            500.0,
            0,
            Regime::Bear,
            noon(15),
        );
        assert!(decision.is_admitted());

        // Neutral regime never filters
        let decision = risk.can_trade(
            &candidate(Direction::Put, 12.0, 100.0),
            1000.0,
            500.0,
            0,
            Regime::Neutral,
            noon(15),
        );
        assert!(decision.is_admitted());
    }
}
