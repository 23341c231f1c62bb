//! Typed error channel for the decision core.
//!
//! The taxonomy follows the engine's failure-isolation contract: data gaps
//! are neutral results at the call site, provider and broker failures are
//! caught at the per-unit boundary, and risk denials are never errors (see
//! `risk::RiskDecision`).

use crate::types::Timeframe;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Empty or missing series/quote. Callers treat this as a neutral
    /// result, not a failure.
    #[error("no market data for {symbol} {timeframe}")]
    NoData { symbol: String, timeframe: Timeframe },

    /// An external bonus/data provider failed; the unit under evaluation is
    /// dropped from this cycle only.
    #[error("provider {name} failed: {message}")]
    Provider { name: String, message: String },

    #[error("broker error: {0}")]
    Broker(String),

    /// Configuration or precondition violation (e.g. non-positive price).
    /// The affected computation is skipped; the cycle continues.
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn provider(name: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Provider {
            name: name.into(),
            message: message.into(),
        }
    }
}
