//! Configuration management for OptBot
//!
//! Loads from optional config files + environment variables via .env

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub signals: SignalsConfig,
    pub selector: SelectorConfig,
    pub risk: RiskConfig,
    pub monitor: MonitorConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalsConfig {
    /// Symbols scanned every cycle
    pub watchlist: Vec<String>,
    /// Broad-market symbol used for the regime check
    pub reference_symbol: String,
    /// Minimum composite score for a signal to rank
    pub min_score: f64,
    /// Provider bonus at or above this may replace the technical direction
    pub override_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectorConfig {
    /// Strike offset from spot, as a fraction (0.02 = 2% OTM)
    pub strike_offset_pct: f64,
    /// Strike rounding increment in dollars
    pub strike_increment: f64,
    /// Nearest expiry must be at least this many days out (0 = 0DTE ok)
    pub min_days_to_expiry: i64,
    /// Maximum ask per contract in dollars
    pub max_contract_price: f64,
    /// Absolute delta band
    pub delta_min: f64,
    pub delta_max: f64,
    /// Maximum bid/ask spread as a fraction of midpoint
    pub max_spread_pct: f64,
    /// Maximum dollars per trade
    pub max_trade_size: f64,
    /// No new entries in the final minutes of the session
    pub eod_blackout_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Base trading capital in dollars
    pub base_capital: f64,
    /// Deny trades when available capital is below this floor
    pub min_capital_to_trade: f64,
    /// Daily loss limit as a fraction of current equity
    pub daily_loss_pct: f64,
    /// Composite score required to trade against the regime
    pub regime_override_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Exit limit price discount off the current bid (0.02 = 2%)
    pub exit_discount_pct: f64,
    /// Score assumed for positions with no recorded entry score
    pub default_signal_score: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Position ledger file name inside the data directory
    pub ledger_file: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Signal defaults
            .set_default(
                "signals.watchlist",
                vec![
                    "TSLA", "NVDA", "COIN", "MSTR", "AMD", "PLTR", "HOOD", "RBLX", "TQQQ",
                    "SOXL", "SPXL", "LABU", "SPY", "QQQ",
                ],
            )?
            .set_default("signals.reference_symbol", "SPY")?
            .set_default("signals.min_score", 13.0)?
            .set_default("signals.override_threshold", 2.0)?
            // Selector defaults
            .set_default("selector.strike_offset_pct", 0.02)?
            .set_default("selector.strike_increment", 5.0)?
            .set_default("selector.min_days_to_expiry", 0)?
            .set_default("selector.max_contract_price", 3.0)?
            .set_default("selector.delta_min", 0.20)?
            .set_default("selector.delta_max", 0.70)?
            .set_default("selector.max_spread_pct", 0.20)?
            .set_default("selector.max_trade_size", 125.0)?
            .set_default("selector.eod_blackout_minutes", 30)?
            // Risk defaults
            .set_default("risk.base_capital", 500.0)?
            .set_default("risk.min_capital_to_trade", 20.0)?
            .set_default("risk.daily_loss_pct", 0.14)?
            .set_default("risk.regime_override_score", 16.0)?
            // Monitor defaults
            .set_default("monitor.exit_discount_pct", 0.02)?
            .set_default("monitor.default_signal_score", 13.0)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.ledger_file", "positions.json")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (OPTBOT_*)
            .add_source(Environment::with_prefix("OPTBOT").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(app_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "watchlist={} ref={} min_score={:.0} capital={:.0} max_trade={:.0}",
            self.signals.watchlist.len(),
            self.signals.reference_symbol,
            self.signals.min_score,
            self.risk.base_capital,
            self.selector.max_trade_size
        )
    }

    /// Path of the position ledger file
    pub fn ledger_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.persistence.data_dir).join(&self.persistence.ledger_file)
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load() {
        let config = AppConfig::load().unwrap();
        assert!(config.signals.watchlist.contains(&"TSLA".to_string()));
        assert_eq!(config.signals.reference_symbol, "SPY");
        assert_eq!(config.risk.base_capital, 500.0);
        assert_eq!(config.selector.max_trade_size, 125.0);
        assert!(config.selector.delta_min < config.selector.delta_max);
        assert!(config.ledger_path().ends_with("positions.json"));
    }
}
