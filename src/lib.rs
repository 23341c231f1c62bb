//! OptBot Library
//!
//! Autonomous options trading decision engine: multi-timeframe technical
//! signals, external conviction bonuses, dynamic risk limits and tiered
//! trailing exits. Scheduling and broker transports live outside this crate
//! behind the collaborator traits in [`providers`].

pub mod config;
pub mod cycle;
pub mod error;
pub mod indicators;
pub mod monitor;
pub mod providers;
pub mod risk;
pub mod selector;
pub mod signal;
pub mod telemetry;
pub mod types;

pub use config::AppConfig;
pub use cycle::{CycleReport, CycleRunner};
pub use error::EngineError;
pub use risk::{DenialReason, RiskDecision};
pub use signal::{CycleContext, SignalEngine};
pub use types::{Direction, Regime, Signal, TradeCandidate};
