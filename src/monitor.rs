//! Position monitoring and exit management.
//!
//! Each cycle walks the open positions, refreshes the peak bid, and applies
//! the exit ladder: tiered trailing stop first (it is the more specific rule
//! once a position has proven itself), then fixed take-profit, then fixed
//! stop-loss. Exit fills go out as sell-to-close limit orders priced just
//! under the bid. The entry ledger survives restarts through the position
//! store and is saved after every entry/exit mutation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::error::EngineError;
use crate::providers::{Broker, PositionStore};
use crate::types::{
    BrokerPosition, ClosedPosition, OrderRequest, OrderSide, OrderType, PositionRecord,
    TradeCandidate,
};

/// Take-profit / stop-loss pair for one position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitThresholds {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

/// Thresholds scale with the conviction recorded at entry: stronger signals
/// get more room to run.
pub fn exit_thresholds(signal_score: f64) -> ExitThresholds {
    if signal_score >= 16.0 {
        ExitThresholds {
            take_profit_pct: 45.0,
            stop_loss_pct: 33.0,
        }
    } else if signal_score >= 14.0 {
        ExitThresholds {
            take_profit_pct: 42.0,
            stop_loss_pct: 33.0,
        }
    } else {
        ExitThresholds {
            take_profit_pct: 38.0,
            stop_loss_pct: 33.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitReason {
    TrailingStop { pullback_pct: f64, trail_pct: f64 },
    TakeProfit { gain_pct: f64 },
    StopLoss { loss_pct: f64 },
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TrailingStop {
                pullback_pct,
                trail_pct,
            } => write!(f, "trailing stop ({pullback_pct:.1}% off peak, trail {trail_pct:.0}%)"),
            ExitReason::TakeProfit { gain_pct } => write!(f, "take profit (+{gain_pct:.1}%)"),
            ExitReason::StopLoss { loss_pct } => write!(f, "stop loss ({loss_pct:.1}%)"),
        }
    }
}

/// Trailing distance for a given peak gain; `None` until the trail arms at
/// +20%.
fn trail_distance(peak_gain_pct: f64) -> Option<f64> {
    if peak_gain_pct >= 45.0 {
        Some(7.0)
    } else if peak_gain_pct >= 30.0 {
        Some(10.0)
    } else if peak_gain_pct >= 20.0 {
        Some(15.0)
    } else {
        None
    }
}

/// The exit ladder. `record.peak_bid` must already include the current bid.
pub fn exit_decision(
    record: &PositionRecord,
    bid: f64,
    thresholds: ExitThresholds,
) -> Option<ExitReason> {
    if record.entry_price <= 0.0 {
        return None;
    }
    let gain_pct = (bid - record.entry_price) / record.entry_price * 100.0;
    let peak_gain_pct = (record.peak_bid - record.entry_price) / record.entry_price * 100.0;

    if let Some(trail_pct) = trail_distance(peak_gain_pct) {
        let pullback_pct = (record.peak_bid - bid) / record.peak_bid * 100.0;
        if pullback_pct >= trail_pct {
            return Some(ExitReason::TrailingStop {
                pullback_pct,
                trail_pct,
            });
        }
    }
    if gain_pct >= thresholds.take_profit_pct {
        return Some(ExitReason::TakeProfit { gain_pct });
    }
    if gain_pct <= -thresholds.stop_loss_pct {
        return Some(ExitReason::StopLoss { loss_pct: gain_pct });
    }
    None
}

pub struct PositionMonitor {
    broker: Arc<dyn Broker>,
    store: Arc<dyn PositionStore>,
    config: MonitorConfig,
    ledger: HashMap<String, PositionRecord>,
    daily_realized_pnl: f64,
}

impl PositionMonitor {
    /// Build the monitor and load the durable entry ledger. A failed load
    /// starts empty; entry prices then fall back to broker cost basis.
    pub async fn load(
        broker: Arc<dyn Broker>,
        store: Arc<dyn PositionStore>,
        config: MonitorConfig,
    ) -> Self {
        let ledger = match store.load().await {
            Ok(ledger) => ledger,
            Err(e) => {
                warn!(error = %e, "position ledger load failed, starting empty");
                HashMap::new()
            }
        };
        if !ledger.is_empty() {
            info!(positions = ledger.len(), "position ledger restored");
        }
        Self {
            broker,
            store,
            config,
            ledger,
            daily_realized_pnl: 0.0,
        }
    }

    /// Realized P&L accumulated across confirmed exits since startup
    pub fn daily_realized_pnl(&self) -> f64 {
        self.daily_realized_pnl
    }

    pub fn record(&self, option_symbol: &str) -> Option<&PositionRecord> {
        self.ledger.get(option_symbol)
    }

    /// Record a fresh entry in the ledger and persist it.
    pub async fn record_entry(&mut self, candidate: &TradeCandidate) {
        self.ledger.insert(
            candidate.option_symbol.clone(),
            PositionRecord::new(candidate.ask, candidate.signal.score),
        );
        self.persist().await;
    }

    /// Evaluate every open position; returns the positions closed this
    /// cycle. A failing quote or order affects only its own position.
    pub async fn check_positions(&mut self, positions: &[BrokerPosition]) -> Vec<ClosedPosition> {
        let mut closed = Vec::new();
        for position in positions {
            if position.quantity <= 0 {
                continue;
            }
            match self.check_one(position).await {
                Ok(Some(exit)) => closed.push(exit),
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "position check failed");
                }
            }
        }
        closed
    }

    async fn check_one(
        &mut self,
        position: &BrokerPosition,
    ) -> Result<Option<ClosedPosition>, EngineError> {
        let quote = self.broker.quote(&position.symbol).await?;
        let bid = quote.bid;
        if bid <= 0.0 {
            // No market right now; try again next cycle
            return Ok(None);
        }

        let entry_from_basis = position.cost_basis / (position.quantity as f64 * 100.0);
        let default_score = self.config.default_signal_score;
        let record = self
            .ledger
            .entry(position.symbol.clone())
            .or_insert_with(|| PositionRecord::new(entry_from_basis, default_score));
        if bid > record.peak_bid {
            record.peak_bid = bid;
        }
        let record = *record;

        let thresholds = exit_thresholds(record.signal_score);
        let Some(reason) = exit_decision(&record, bid, thresholds) else {
            return Ok(None);
        };

        let limit_price = (bid * (1.0 - self.config.exit_discount_pct) * 100.0).round() / 100.0;
        let request = OrderRequest {
            symbol: position.underlying().to_string(),
            option_symbol: position.symbol.clone(),
            side: OrderSide::SellToClose,
            quantity: position.quantity as u32,
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
        };
        let result = self.broker.place_order(&request).await?;

        let realized_pnl = (bid - record.entry_price) * 100.0 * position.quantity as f64;
        let pnl_pct = (bid - record.entry_price) / record.entry_price * 100.0;
        info!(
            symbol = %position.symbol,
            %reason,
            bid,
            limit_price,
            realized_pnl,
            order_id = %result.order_id,
            "position closed"
        );

        self.ledger.remove(&position.symbol);
        self.daily_realized_pnl += realized_pnl;
        self.persist().await;

        Ok(Some(ClosedPosition {
            option_symbol: position.symbol.clone(),
            underlying: position.underlying().to_string(),
            quantity: position.quantity,
            exit_bid: bid,
            realized_pnl,
            pnl_pct,
        }))
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.ledger).await {
            warn!(error = %e, "position ledger save failed");
        }
    }
}
