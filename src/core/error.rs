//! Error handling - hierarchical errors for the trading engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// krill-mm error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Exchange API errors (the `error` half of a response envelope)
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Malformed or unexpected payload shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid state (stale snapshot, empty window, dead channel)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),
}
