//! Central configuration for the market-making engine.
//!
//! One TOML file (path given on the command line, `config.toml` by
//! default) carries exchange connectivity, the maker's sizing knobs,
//! tracker poll cadences, and retention bounds. Anything omitted falls
//! back to the serde defaults below.

use serde::Deserialize;
use std::path::Path;

/// Exchange connectivity and credential locations.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// REST base URL
    pub base_url: String,
    /// File whose first line is the API key
    pub key_file: String,
    /// File whose first line is the API secret
    pub secret_file: String,
    /// Transport-level timeout for every HTTP call (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Minimum spacing between authenticated requests (milliseconds)
    #[serde(default = "default_gate_interval")]
    pub gate_interval_ms: u64,
}

/// Maker round parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MakerConfig {
    /// Pair name as listed by the exchange (e.g. "XXBTZUSD")
    pub pair: String,
    /// Fraction of each balance deployed into the ladders
    pub fund_factor: f64,
    /// Inventory targeting: skews deployment toward the configured ratio
    pub targeting_factor: f64,
    /// Resilience = resilience_factor * max recent trade volume
    pub resilience_factor: f64,
    /// Taker fee in percent, used by the spread-crossing margin test
    pub fee_pct: f64,
    /// Ladder size cap per side
    #[serde(default = "default_max_orders")]
    pub max_orders: usize,
    /// Seconds between maker rounds
    #[serde(default = "default_round_secs")]
    pub round_secs: u64,
    /// Treat an equal-priced desired order as a valid inward replacement
    #[serde(default)]
    pub reconcile_equal_price: bool,
}

/// Tracker polling cadence (seconds).
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_trades_poll")]
    pub trades_secs: u64,
    #[serde(default = "default_book_poll")]
    pub book_secs: u64,
    #[serde(default = "default_balance_poll")]
    pub balance_secs: u64,
    #[serde(default = "default_executions_poll")]
    pub executions_secs: u64,
    /// Depth levels requested per book poll
    #[serde(default = "default_book_depth")]
    pub book_depth: u32,
}

/// Retention bounds for the rolling trackers.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Trades older than this fall off the window. Must exceed the longest
    /// VWAP lookback any consumer asks for.
    #[serde(default = "default_trades_window")]
    pub trades_window_secs: u64,
    /// Hard cap on retained executions
    #[serde(default = "default_max_executions")]
    pub max_executions: usize,
}

fn default_http_timeout() -> u64 {
    10
}
fn default_gate_interval() -> u64 {
    1500
}
fn default_max_orders() -> usize {
    15
}
fn default_round_secs() -> u64 {
    30
}
fn default_trades_poll() -> u64 {
    7
}
fn default_book_poll() -> u64 {
    5
}
fn default_balance_poll() -> u64 {
    30
}
fn default_executions_poll() -> u64 {
    17
}
fn default_book_depth() -> u32 {
    100
}
fn default_trades_window() -> u64 {
    86_400
}
fn default_max_executions() -> usize {
    4096
}

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub maker: MakerConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            trades_secs: default_trades_poll(),
            book_secs: default_book_poll(),
            balance_secs: default_balance_poll(),
            executions_secs: default_executions_poll(),
            book_depth: default_book_depth(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trades_window_secs: default_trades_window(),
            max_executions: default_max_executions(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> crate::core::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::core::Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| crate::core::Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}
