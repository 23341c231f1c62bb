//! One decision cycle, start to finish: exits first, then capital, then
//! signals, then one entry attempt at most.
//!
//! The runner owns the components and the collaborator handles. Scheduling,
//! market-hours gating and sleep intervals live outside; callers invoke
//! [`CycleRunner::run_once`] whenever they want a cycle.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::monitor::PositionMonitor;
use crate::providers::{BonusProvider, Broker, MarketData, OptionsChain, PositionStore};
use crate::risk::{RiskDecision, RiskManager};
use crate::selector::ContractSelector;
use crate::signal::SignalEngine;
use crate::types::{
    BrokerPosition, ClosedPosition, OrderRequest, OrderSide, OrderType, Regime, TradeCandidate,
};

/// What one cycle did, for the external scheduler/dashboard
#[derive(Debug)]
pub struct CycleReport {
    pub regime: Regime,
    pub exits: Vec<ClosedPosition>,
    pub signals_found: usize,
    pub candidate: Option<TradeCandidate>,
    pub decision: Option<RiskDecision>,
    /// Entry order confirmed by the broker
    pub entered: bool,
}

pub struct CycleRunner {
    config: AppConfig,
    broker: Arc<dyn Broker>,
    engine: SignalEngine,
    selector: ContractSelector,
    risk: RiskManager,
    monitor: PositionMonitor,
    providers: Vec<Arc<dyn BonusProvider>>,
}

impl CycleRunner {
    pub async fn new(
        config: AppConfig,
        market_data: Arc<dyn MarketData>,
        broker: Arc<dyn Broker>,
        chain: Arc<dyn OptionsChain>,
        store: Arc<dyn PositionStore>,
        providers: Vec<Arc<dyn BonusProvider>>,
    ) -> Self {
        let engine = SignalEngine::new(market_data, config.signals.clone());
        let selector = ContractSelector::new(chain, config.selector.clone());
        let risk = RiskManager::new(config.risk.clone());
        let monitor = PositionMonitor::load(broker.clone(), store, config.monitor.clone()).await;
        Self {
            config,
            broker,
            engine,
            selector,
            risk,
            monitor,
            providers,
        }
    }

    pub fn monitor(&self) -> &PositionMonitor {
        &self.monitor
    }

    /// Run one full decision cycle. Collaborator failures degrade this
    /// cycle's output; they never poison the next cycle.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> CycleReport {
        // 1. Exits come first so freed capital is visible below
        let positions = match self.broker.positions().await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "positions fetch failed, skipping exit checks");
                Vec::new()
            }
        };
        let exits = self.monitor.check_positions(&positions).await;

        let closed: HashSet<&str> = exits.iter().map(|c| c.option_symbol.as_str()).collect();
        let open: Vec<&BrokerPosition> = positions
            .iter()
            .filter(|p| p.quantity > 0 && !closed.contains(p.symbol.as_str()))
            .collect();

        // 2. Capital picture
        let equity = match self.broker.account_equity().await {
            Ok(equity) => equity,
            Err(e) => {
                warn!(error = %e, "equity fetch failed, assuming base capital");
                self.config.risk.base_capital
            }
        };
        let committed: f64 = open.iter().map(|p| p.cost_basis).sum();
        let available = (equity - committed).max(0.0);
        let effective = available.min(self.risk.capital_limit(equity));
        info!(
            equity,
            available,
            effective,
            open = open.len(),
            exits = exits.len(),
            "cycle capital"
        );

        // 3. Signal scan context (regime + provider scans)
        let ctx = self.engine.build_context(&self.providers).await;

        if effective < self.config.risk.min_capital_to_trade {
            info!(effective, "not enough capital to trade, skipping scan");
            return CycleReport {
                regime: ctx.regime,
                exits,
                signals_found: 0,
                candidate: None,
                decision: None,
                entered: false,
            };
        }

        let signals = self.engine.top_signals(&ctx).await;
        let signals_found = signals.len();

        // 4. First signal that yields a contract wins. Skip anything with
        // an open position or an exit from this same cycle.
        let busy: HashSet<&str> = open
            .iter()
            .map(|p| p.underlying())
            .chain(exits.iter().map(|c| c.underlying.as_str()))
            .collect();
        let mut candidate: Option<TradeCandidate> = None;
        for signal in &signals {
            if busy.contains(signal.symbol.as_str()) {
                info!(symbol = %signal.symbol, "skipping, position already open or just closed");
                continue;
            }
            match self.selector.select_contract(signal, effective, now).await {
                Ok(Some(found)) => {
                    candidate = Some(found);
                    break;
                }
                Ok(None) => {
                    info!(symbol = %signal.symbol, "no suitable contract, trying next signal");
                }
                Err(e) => {
                    warn!(symbol = %signal.symbol, error = %e, "contract selection failed");
                }
            }
        }
        let Some(candidate) = candidate else {
            return CycleReport {
                regime: ctx.regime,
                exits,
                signals_found,
                candidate: None,
                decision: None,
                entered: false,
            };
        };

        // 5. Risk gate
        let decision = self.risk.can_trade(
            &candidate,
            equity,
            effective,
            open.len(),
            ctx.regime,
            now,
        );
        if let RiskDecision::Denied(reason) = &decision {
            info!(symbol = %candidate.symbol, %reason, "risk manager blocked entry");
            return CycleReport {
                regime: ctx.regime,
                exits,
                signals_found,
                candidate: Some(candidate),
                decision: Some(decision),
                entered: false,
            };
        }

        // 6. Execute and record
        let request = OrderRequest {
            symbol: candidate.symbol.clone(),
            option_symbol: candidate.option_symbol.clone(),
            side: OrderSide::BuyToOpen,
            quantity: candidate.contracts,
            order_type: OrderType::Market,
            limit_price: None,
        };
        let entered = match self.broker.place_order(&request).await {
            Ok(result) => {
                info!(
                    symbol = %candidate.symbol,
                    option = %candidate.option_symbol,
                    contracts = candidate.contracts,
                    cost = candidate.total_cost,
                    order_id = %result.order_id,
                    "entry order submitted"
                );
                self.monitor.record_entry(&candidate).await;
                true
            }
            Err(e) => {
                warn!(symbol = %candidate.symbol, error = %e, "entry order failed");
                false
            }
        };

        CycleReport {
            regime: ctx.regime,
            exits,
            signals_found,
            candidate: Some(candidate),
            decision: Some(decision),
            entered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        MonitorConfig, PersistenceConfig, RiskConfig, SelectorConfig, SignalsConfig,
    };
    use crate::providers::{MemoryStore, MockBroker, MockMarketData, MockOptionsChain};
    use crate::types::{Bar, Direction, OptionQuote, OrderResult, Quote};
    use chrono::{NaiveDate, TimeZone};

    fn trending_bars(n: usize, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + step * i as f64;
                Bar {
                    ts: i as i64,
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    fn config(watchlist: &[&str]) -> AppConfig {
        AppConfig {
            signals: SignalsConfig {
                watchlist: watchlist.iter().map(|s| s.to_string()).collect(),
                reference_symbol: "SPY".to_string(),
                min_score: 5.0,
                override_threshold: 2.0,
            },
            selector: SelectorConfig {
                strike_offset_pct: 0.02,
                strike_increment: 5.0,
                min_days_to_expiry: 0,
                max_contract_price: 3.0,
                delta_min: 0.20,
                delta_max: 0.70,
                max_spread_pct: 0.20,
                max_trade_size: 125.0,
                eod_blackout_minutes: 30,
            },
            risk: RiskConfig {
                base_capital: 500.0,
                min_capital_to_trade: 20.0,
                daily_loss_pct: 0.14,
                regime_override_score: 16.0,
            },
            monitor: MonitorConfig {
                exit_discount_pct: 0.02,
                default_signal_score: 13.0,
            },
            persistence: PersistenceConfig {
                data_dir: "./data".to_string(),
                ledger_file: "positions.json".to_string(),
            },
        }
    }

    fn market_data() -> Arc<MockMarketData> {
        let mut market = MockMarketData::new();
        market
            .expect_fetch_bars()
            .returning(|_, _, _| Ok(trending_bars(60, 1.0)));
        Arc::new(market)
    }

    fn chain_mock() -> Arc<MockOptionsChain> {
        let mut chain = MockOptionsChain::new();
        chain
            .expect_expirations()
            .returning(|_| Ok(vec![NaiveDate::from_ymd_opt(2026, 6, 19).unwrap()]));
        chain.expect_chain().returning(|symbol, _| {
            Ok(vec![OptionQuote {
                symbol: format!("{symbol}260619C00165000"),
                option_type: Direction::Call,
                strike: 165.0,
                bid: 0.95,
                ask: 1.00,
                delta: Some(0.40),
            }])
        });
        Arc::new(chain)
    }

    // 18:00 UTC = 14:00 ET on a June Monday
    fn midday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 18, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_full_cycle_enters_a_trade() {
        let mut broker = MockBroker::new();
        broker.expect_positions().returning(|| Ok(Vec::new()));
        broker.expect_account_equity().returning(|| Ok(1000.0));
        broker
            .expect_place_order()
            .withf(|req| {
                req.side == OrderSide::BuyToOpen
                    && req.order_type == OrderType::Market
                    && req.quantity == 1
            })
            .times(1)
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "ord-1".to_string(),
                    status: "ok".to_string(),
                })
            });

        let store = Arc::new(MemoryStore::default());
        let mut runner = CycleRunner::new(
            config(&["NVDA"]),
            market_data(),
            Arc::new(broker),
            chain_mock(),
            store.clone(),
            Vec::new(),
        )
        .await;

        let report = runner.run_once(midday()).await;
        assert_eq!(report.signals_found, 1);
        assert!(report.decision.as_ref().unwrap().is_admitted());
        assert!(report.entered);

        // Entry reached the durable ledger
        let ledger = store.load().await.unwrap();
        let record = ledger.get("NVDA260619C00165000").unwrap();
        assert_eq!(record.entry_price, 1.00);
    }

    #[tokio::test]
    async fn test_open_symbol_is_skipped_for_reentry() {
        let mut broker = MockBroker::new();
        broker.expect_positions().returning(|| {
            Ok(vec![BrokerPosition {
                symbol: "NVDA260619C00160000".to_string(),
                quantity: 1,
                cost_basis: 100.0,
            }])
        });
        // Flat quote: the open position neither gains nor loses enough
        broker
            .expect_quote()
            .returning(|_| Ok(Quote { bid: 1.00, ask: 1.05 }));
        broker.expect_account_equity().returning(|| Ok(1000.0));
        broker.expect_place_order().times(1).returning(|_| {
            Ok(OrderResult {
                order_id: "ord-2".to_string(),
                status: "ok".to_string(),
            })
        });

        let mut runner = CycleRunner::new(
            config(&["NVDA", "TSLA"]),
            market_data(),
            Arc::new(broker),
            chain_mock(),
            Arc::new(MemoryStore::default()),
            Vec::new(),
        )
        .await;

        let report = runner.run_once(midday()).await;
        // NVDA already open, so the entry must be TSLA
        assert_eq!(report.candidate.as_ref().unwrap().symbol, "TSLA");
        assert!(report.entered);
    }

    #[tokio::test]
    async fn test_just_closed_symbol_is_not_reentered() {
        let mut broker = MockBroker::new();
        broker.expect_positions().returning(|| {
            Ok(vec![BrokerPosition {
                symbol: "NVDA260619C00160000".to_string(),
                quantity: 1,
                cost_basis: 200.0, // entry 2.00
            }])
        });
        // +50%: the position exits this cycle
        broker
            .expect_quote()
            .returning(|_| Ok(Quote { bid: 3.00, ask: 3.05 }));
        broker.expect_account_equity().returning(|| Ok(1000.0));
        // Exactly one order: the sell-to-close; no buy back into NVDA
        broker
            .expect_place_order()
            .withf(|req| req.side == OrderSide::SellToClose)
            .times(1)
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "ord-3".to_string(),
                    status: "ok".to_string(),
                })
            });

        let mut runner = CycleRunner::new(
            config(&["NVDA"]),
            market_data(),
            Arc::new(broker),
            chain_mock(),
            Arc::new(MemoryStore::default()),
            Vec::new(),
        )
        .await;

        let report = runner.run_once(midday()).await;
        assert_eq!(report.exits.len(), 1);
        assert!(report.candidate.is_none());
        assert!(!report.entered);
    }

    #[tokio::test]
    async fn test_positions_failure_degrades_but_cycle_continues() {
        let mut broker = MockBroker::new();
        broker
            .expect_positions()
            .returning(|| Err(crate::error::EngineError::Broker("api down".to_string())));
        broker.expect_account_equity().returning(|| Ok(1000.0));
        broker.expect_place_order().returning(|_| {
            Ok(OrderResult {
                order_id: "ord-4".to_string(),
                status: "ok".to_string(),
            })
        });

        let mut runner = CycleRunner::new(
            config(&["NVDA"]),
            market_data(),
            Arc::new(broker),
            chain_mock(),
            Arc::new(MemoryStore::default()),
            Vec::new(),
        )
        .await;

        let report = runner.run_once(midday()).await;
        assert!(report.exits.is_empty());
        assert!(report.entered);
    }

    #[tokio::test]
    async fn test_no_capital_skips_the_scan() {
        let mut broker = MockBroker::new();
        broker.expect_positions().returning(|| Ok(Vec::new()));
        // $10 equity is below the $20 floor
        broker.expect_account_equity().returning(|| Ok(10.0));

        let mut runner = CycleRunner::new(
            config(&["NVDA"]),
            market_data(),
            Arc::new(broker),
            chain_mock(),
            Arc::new(MemoryStore::default()),
            Vec::new(),
        )
        .await;

        let report = runner.run_once(midday()).await;
        assert_eq!(report.signals_found, 0);
        assert!(report.candidate.is_none());
        assert!(!report.entered);
    }
}
