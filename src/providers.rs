//! Collaborator contracts consumed by the decision core.
//!
//! Every external dependency sits behind one of these traits so the core
//! stays implementation-agnostic and each seam can be mocked in tests.
//! Failures cross these boundaries as [`EngineError`]; the callers decide
//! how soft the failure is (empty data is neutral, provider errors drop the
//! unit under evaluation for the cycle).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::EngineError;
use crate::types::{
    Bar, BonusGrade, BrokerPosition, OptionQuote, OrderRequest, OrderResult, PositionRecord,
    Quote, Timeframe,
};

/// Historical bar source. An empty series is a valid answer (no data), not
/// an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        lookback_days: u32,
    ) -> Result<Vec<Bar>, EngineError>;
}

/// Brokerage operations the core is allowed to perform. Exactly these four;
/// anything else is an orchestration concern outside the decision core.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn positions(&self) -> Result<Vec<BrokerPosition>, EngineError>;
    async fn quote(&self, symbol: &str) -> Result<Quote, EngineError>;
    async fn account_equity(&self) -> Result<f64, EngineError>;
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult, EngineError>;
}

/// Options chain lookups, kept off the broker contract because they are a
/// quote-layer concern.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OptionsChain: Send + Sync {
    /// Available expiries for a symbol, ascending.
    async fn expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, EngineError>;
    async fn chain(&self, symbol: &str, expiry: NaiveDate)
        -> Result<Vec<OptionQuote>, EngineError>;
}

/// External conviction source (insider activity, earnings/gap catalysts,
/// legislative trades). Scans the whole universe once per cycle and grades a
/// subset of it. Fail-soft: a scan error drops this provider's grades for
/// the cycle and nothing else.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BonusProvider: Send + Sync {
    /// Stable identifier used in signal bonus breakdowns and logs.
    fn name(&self) -> &str;
    /// Upper bound on the bonus this provider may contribute per symbol.
    fn max_bonus(&self) -> f64;
    async fn scan(&self, universe: &[String])
        -> Result<HashMap<String, BonusGrade>, EngineError>;
}

/// Durable snapshot store for per-position entry records. Loaded once at
/// startup, saved after every entry/exit mutation.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load(&self) -> Result<HashMap<String, PositionRecord>, EngineError>;
    async fn save(&self, records: &HashMap<String, PositionRecord>) -> Result<(), EngineError>;
}

/// JSON-file position store. A missing file loads as an empty ledger so
/// first runs need no setup.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PositionStore for JsonFileStore {
    async fn load(&self) -> Result<HashMap<String, PositionRecord>, EngineError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::Persistence(format!("parse {:?}: {e}", self.path))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "no position ledger on disk, starting empty");
                Ok(HashMap::new())
            }
            Err(e) => Err(EngineError::Persistence(format!(
                "read {:?}: {e}",
                self.path
            ))),
        }
    }

    async fn save(&self, records: &HashMap<String, PositionRecord>) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::Persistence(format!("mkdir {parent:?}: {e}")))?;
        }
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| EngineError::Persistence(format!("serialize ledger: {e}")))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| EngineError::Persistence(format!("write {:?}: {e}", self.path)))
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, PositionRecord>>,
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load(&self) -> Result<HashMap<String, PositionRecord>, EngineError> {
        Ok(self.records.lock().expect("store lock").clone())
    }

    async fn save(&self, records: &HashMap<String, PositionRecord>) -> Result<(), EngineError> {
        *self.records.lock().expect("store lock") = records.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_store_missing_file_loads_empty() {
        let path = std::env::temp_dir().join(format!("optbot-{}.json", uuid::Uuid::new_v4()));
        let store = JsonFileStore::new(&path);
        let records = store.load().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_json_store_persists_ledger() {
        let path = std::env::temp_dir().join(format!("optbot-{}.json", uuid::Uuid::new_v4()));
        let store = JsonFileStore::new(&path);

        let mut records = HashMap::new();
        records.insert(
            "TSLA240621C00250000".to_string(),
            PositionRecord::new(2.50, 15.0),
        );
        store.save(&records).await.unwrap();

        let loaded = store.load().await.unwrap();
        let record = loaded.get("TSLA240621C00250000").unwrap();
        assert_eq!(record.entry_price, 2.50);
        assert_eq!(record.signal_score, 15.0);
        assert_eq!(record.peak_bid, 2.50);

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::default();
        let mut records = HashMap::new();
        records.insert("SPY240101P00450000".to_string(), PositionRecord::new(1.0, 13.0));
        store.save(&records).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}
