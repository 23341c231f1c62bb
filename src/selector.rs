//! Contract selection: map a ranked signal onto one concrete option
//! contract sized to the available capital.
//!
//! Strategy: slightly OTM strike, nearest permitted expiry, delta band
//! wide enough to move but cheap enough to size, tight spreads only.
//! `None` is the normal outcome for "nothing tradable right now".

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::America::New_York;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SelectorConfig;
use crate::error::EngineError;
use crate::providers::OptionsChain;
use crate::types::{Direction, OptionQuote, Signal, TradeCandidate};

/// Minutes into the day when the regular session closes (16:00 ET)
const SESSION_CLOSE_MIN: u32 = 16 * 60;

pub struct ContractSelector {
    chain: Arc<dyn OptionsChain>,
    config: SelectorConfig,
}

impl ContractSelector {
    pub fn new(chain: Arc<dyn OptionsChain>, config: SelectorConfig) -> Self {
        Self { chain, config }
    }

    /// True inside the end-of-day entry blackout (theta risk dominates any
    /// technical edge there).
    pub fn in_eod_blackout(&self, now: DateTime<Utc>) -> bool {
        let et = now.with_timezone(&New_York);
        let minutes = et.hour() * 60 + et.minute();
        minutes >= SESSION_CLOSE_MIN - self.config.eod_blackout_minutes
            && minutes < SESSION_CLOSE_MIN
    }

    /// Nearest expiry at least `min_days_to_expiry` days out, if any.
    async fn nearest_expiry(
        &self,
        symbol: &str,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, EngineError> {
        let mut expirations = self.chain.expirations(symbol).await?;
        expirations.sort();
        Ok(expirations
            .into_iter()
            .find(|exp| (*exp - today).num_days() >= self.config.min_days_to_expiry))
    }

    /// Choose one contract for the signal, or `None` when nothing qualifies.
    /// The returned candidate's total cost never exceeds `capital`.
    pub async fn select_contract(
        &self,
        signal: &Signal,
        capital: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<TradeCandidate>, EngineError> {
        let symbol = &signal.symbol;

        if self.in_eod_blackout(now) {
            info!(symbol = %symbol, "entry blocked, end-of-day blackout");
            return Ok(None);
        }
        if signal.price <= 0.0 {
            return Err(EngineError::Precondition(format!(
                "non-positive price {} for {symbol}",
                signal.price
            )));
        }

        // Slightly OTM: above spot for calls, below for puts, on a $5 grid
        let offset = match signal.direction {
            Direction::Call => 1.0 + self.config.strike_offset_pct,
            Direction::Put => 1.0 - self.config.strike_offset_pct,
        };
        let target_strike = (signal.price * offset / self.config.strike_increment).round()
            * self.config.strike_increment;

        let today = now.with_timezone(&New_York).date_naive();
        let Some(expiry) = self.nearest_expiry(symbol, today).await? else {
            warn!(symbol = %symbol, "no usable expiry");
            return Ok(None);
        };

        let chain = self.chain.chain(symbol, expiry).await?;
        let Some(best) = self.pick_contract(&chain, signal.direction, target_strike) else {
            debug!(symbol = %symbol, target_strike, "no contract survived filtering");
            return Ok(None);
        };

        let Some((contracts, total_cost)) = self.size_position(best.ask, capital) else {
            debug!(symbol = %symbol, ask = best.ask, capital, "cannot afford one contract");
            return Ok(None);
        };

        info!(
            symbol = %symbol,
            option = %best.symbol,
            strike = best.strike,
            %expiry,
            contracts,
            total_cost,
            "contract selected"
        );
        Ok(Some(TradeCandidate {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.clone(),
            direction: signal.direction,
            option_symbol: best.symbol.clone(),
            strike: best.strike,
            expiry,
            ask: best.ask,
            bid: best.bid,
            delta: best.delta,
            contracts,
            total_cost,
            signal: signal.clone(),
        }))
    }

    /// Filter the chain and take the surviving strike closest to target.
    /// First-encountered wins ties.
    fn pick_contract<'a>(
        &self,
        chain: &'a [OptionQuote],
        direction: Direction,
        target_strike: f64,
    ) -> Option<&'a OptionQuote> {
        let mut best: Option<(&OptionQuote, f64)> = None;
        for quote in chain {
            if quote.option_type != direction {
                continue;
            }
            if quote.ask <= 0.0 || quote.ask > self.config.max_contract_price {
                continue;
            }
            // No delta from the chain means no way to judge it
            let Some(delta) = quote.delta else { continue };
            let delta = delta.abs();
            if delta < self.config.delta_min || delta > self.config.delta_max {
                continue;
            }
            let mid = (quote.ask + quote.bid) / 2.0;
            if mid > 0.0 && (quote.ask - quote.bid) / mid > self.config.max_spread_pct {
                continue;
            }

            let diff = (quote.strike - target_strike).abs();
            match best {
                Some((_, best_diff)) if diff >= best_diff => {}
                _ => best = Some((quote, diff)),
            }
        }
        best.map(|(quote, _)| quote)
    }

    /// Contracts = floor(min(capital, per-trade cap) / (ask x 100)).
    /// Never returns a size whose cost exceeds `capital`.
    fn size_position(&self, ask: f64, capital: f64) -> Option<(u32, f64)> {
        if ask <= 0.0 {
            return None;
        }
        let per_contract = ask * 100.0;
        let budget = capital.min(self.config.max_trade_size);
        let mut contracts = (budget / per_contract).floor() as u32;
        if contracts == 0 {
            contracts = 1;
        }
        let mut total_cost = contracts as f64 * per_contract;
        while total_cost > capital && contracts > 1 {
            contracts -= 1;
            total_cost = contracts as f64 * per_contract;
        }
        if total_cost > capital {
            return None;
        }
        Some((contracts, total_cost))
    }
}
