//! Core types used throughout OptBot
//!
//! Defines common data structures for bars, signals, contracts and orders.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Call,
    Put,
}

impl Direction {
    /// Parse from a chain's option_type field ("call"/"put")
    pub fn from_option_type(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "call" => Some(Direction::Call),
            "put" => Some(Direction::Put),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Call => write!(f, "CALL"),
            Direction::Put => write!(f, "PUT"),
        }
    }
}

/// Macro trend classification of the reference broad-market symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Bull,
    Bear,
    Neutral,
}

impl Regime {
    /// Direction this regime favors, if any
    pub fn favored_direction(&self) -> Option<Direction> {
        match self {
            Regime::Bull => Some(Direction::Call),
            Regime::Bear => Some(Direction::Put),
            Regime::Neutral => None,
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regime::Bull => write!(f, "BULL"),
            Regime::Bear => write!(f, "BEAR"),
            Regime::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Bar intervals fetched from the market data provider. `Day1` feeds the
/// regime check only; the other three are scored per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Day1,
    Hour1,
    Min15,
    Min5,
}

impl Timeframe {
    /// Short label used in signal reason strings
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Day1 => "1D",
            Timeframe::Hour1 => "1H",
            Timeframe::Min15 => "15M",
            Timeframe::Min5 => "5M",
        }
    }

    /// Weight of this timeframe in the composite score.
    /// The three scored weights sum to 1.0; the longest counts most.
    pub fn composite_weight(&self) -> f64 {
        match self {
            Timeframe::Day1 => 0.0,
            Timeframe::Hour1 => 0.40,
            Timeframe::Min15 => 0.35,
            Timeframe::Min5 => 0.25,
        }
    }

    /// Lookback window requested from the data provider, in calendar days
    pub fn lookback_days(&self) -> u32 {
        match self {
            Timeframe::Day1 => 180,
            Timeframe::Hour1 => 90,
            Timeframe::Min15 => 5,
            Timeframe::Min5 => 2,
        }
    }

    /// The three timeframes that contribute to the composite score
    pub fn scored() -> [Timeframe; 3] {
        [Timeframe::Hour1, Timeframe::Min15, Timeframe::Min5]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Day1 => write!(f, "1d"),
            Timeframe::Hour1 => write!(f, "1h"),
            Timeframe::Min15 => write!(f, "15m"),
            Timeframe::Min5 => write!(f, "5m"),
        }
    }
}

/// One OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time in milliseconds
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Score for one (symbol, timeframe) evaluation
#[derive(Debug, Clone, Default)]
pub struct TimeframeScore {
    pub score: f64,
    pub direction: Option<Direction>,
    pub call_votes: usize,
    pub put_votes: usize,
    pub reasons: Vec<String>,
}

impl TimeframeScore {
    /// Neutral result for insufficient history. Not an error.
    pub fn neutral() -> Self {
        Self::default()
    }
}

/// Per-timeframe score breakdown carried on a ranked signal
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeframeBreakdown {
    pub hour1: f64,
    pub min15: f64,
    pub min5: f64,
}

/// Ranked, tradable signal produced by the signal engine.
/// Direction is always concrete here; direction-less symbols are dropped
/// before ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    /// Composite score: weighted timeframe scores + confluence + regime +
    /// volatility bonuses + provider bonuses
    pub score: f64,
    /// Underlying price at evaluation (longest timeframe's last close)
    pub price: f64,
    /// Cross-timeframe confluence bonus: 4, 2 or 0
    pub confluence: u8,
    pub regime_aligned: bool,
    /// 1H ATR as a percentage of price
    pub vol_pct: f64,
    pub timeframe_scores: TimeframeBreakdown,
    /// Bonus merged per provider, in provider order
    pub bonuses: Vec<(String, f64)>,
    pub reasons: Vec<String>,
}

impl Signal {
    /// Bonus contributed by a named provider, 0.0 if it graded nothing
    pub fn bonus_from(&self, provider: &str) -> f64 {
        self.bonuses
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, score)| *score)
            .unwrap_or(0.0)
    }
}

/// How a bonus provider wants to steer the trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DirectionHint {
    /// No opinion
    #[default]
    Neutral,
    /// Fill in the direction only when the technicals produced none
    Suggest(Direction),
    /// Replace the technical direction outright
    Override(Direction),
}

/// One provider's grade for one symbol
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BonusGrade {
    /// Provider-clamped bonus. May be negative at the provider level; the
    /// engine floors it at zero when merging.
    pub score: f64,
    pub hint: DirectionHint,
    pub reasons: Vec<String>,
}

/// Concrete option contract chosen for a signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub option_symbol: String,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub ask: f64,
    pub bid: f64,
    pub delta: Option<f64>,
    pub contracts: u32,
    /// contracts x ask x 100
    pub total_cost: f64,
    pub signal: Signal,
}

/// Open position as reported by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Option symbol (e.g. "TSLA240621C00250000")
    pub symbol: String,
    pub quantity: i64,
    pub cost_basis: f64,
}

impl BrokerPosition {
    /// Underlying ticker: the leading uppercase letters of the option symbol
    pub fn underlying(&self) -> &str {
        underlying_of(&self.symbol)
    }
}

/// Leading uppercase-letter prefix of an OCC-style option symbol
pub fn underlying_of(option_symbol: &str) -> &str {
    let end = option_symbol
        .find(|c: char| !c.is_ascii_uppercase())
        .unwrap_or(option_symbol.len());
    &option_symbol[..end]
}

/// Bid/ask quote for one symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
}

/// One contract row from an options chain, fields validated at parse time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuote {
    pub symbol: String,
    pub option_type: Direction,
    pub strike: f64,
    pub bid: f64,
    pub ask: f64,
    /// Greeks are consumed, not derived; the chain may omit them
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    BuyToOpen,
    SellToClose,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::BuyToOpen => write!(f, "buy_to_open"),
            OrderSide::SellToClose => write!(f, "sell_to_close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// Order handed to the broker collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub option_symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
}

/// Broker acknowledgement of a submitted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub status: String,
}

/// Durable per-position record kept by the position monitor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionRecord {
    pub entry_price: f64,
    pub signal_score: f64,
    /// Highest bid observed since entry; floored at the entry price
    pub peak_bid: f64,
}

impl PositionRecord {
    pub fn new(entry_price: f64, signal_score: f64) -> Self {
        Self {
            entry_price,
            signal_score,
            peak_bid: entry_price,
        }
    }
}

/// Result of a confirmed exit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub option_symbol: String,
    pub underlying: String,
    pub quantity: i64,
    pub exit_bid: f64,
    pub realized_pnl: f64,
    pub pnl_pct: f64,
}
