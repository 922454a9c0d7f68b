//! Core types - integer tick prices and the entities that cross actor boundaries

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::core::{Error, Result};

/// Price expressed as an integer in units of 10^-decimals of the quote
/// currency. Everything inside the ladder pipeline compares, hashes and
/// offsets these; decimal strings exist only at the exchange boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriceTick(pub i64);

impl PriceTick {
    /// Shift by a signed number of ticks.
    pub fn offset(self, delta: i64) -> Self {
        Self(self.0 + delta)
    }

    /// Approximate price value for rate arithmetic. Never feed the result
    /// back into tick space.
    pub fn to_price(self, decimals: u32) -> f64 {
        self.0 as f64 / 10f64.powi(decimals as i32)
    }
}

/// Parse a decimal price string into tick space, truncating to `decimals`
/// places. Truncation (not rounding) preserves the ordering of the source
/// strings.
pub fn parse_price(s: &str, decimals: u32) -> Result<PriceTick> {
    let value = Decimal::from_str(s.trim())
        .map_err(|e| Error::Parse(format!("bad price {:?}: {}", s, e)))?;
    let scaled = value * Decimal::from(10i64.pow(decimals));
    let tick = scaled
        .trunc()
        .to_i64()
        .ok_or_else(|| Error::Parse(format!("price {:?} outside tick range", s)))?;
    Ok(PriceTick(tick))
}

/// Render a tick as the exchange's decimal string with exactly `decimals`
/// fractional digits. Inverse of `parse_price` for in-range inputs.
pub fn format_price(tick: PriceTick, decimals: u32) -> String {
    Decimal::new(tick.0, decimals).to_string()
}

/// Order direction. Buy quotes the bid side, sell the ask side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Exchange wire forms: "b"/"s" in public trades, "buy"/"sell" elsewhere.
    pub fn from_exchange(s: &str) -> Option<Self> {
        match s {
            "b" | "buy" => Some(Side::Buy),
            "s" | "sell" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution style reported with public trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeKind {
    Market,
    Limit,
}

impl TradeKind {
    pub fn from_exchange(s: &str) -> Option<Self> {
        match s {
            "m" | "market" => Some(TradeKind::Market),
            "l" | "limit" => Some(TradeKind::Limit),
            _ => None,
        }
    }
}

/// One public trade, possibly a coalesced run of near-simultaneous prints.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub timestamp: f64,
    pub volume: f64,
    pub price: f64,
    pub cost: f64,
    pub side: Side,
    pub kind: TradeKind,
    pub tag: String,
}

/// One side's depth level: integer tick price, base volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: PriceTick,
    pub volume: f64,
}

/// One of the agent's own fills.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub oid: String,
    pub txid: String,
    pub timestamp: f64,
    pub side: Side,
    pub pair: String,
    pub price: f64,
    pub volume: f64,
    pub cost: f64,
    pub fee: f64,
}

/// Ladder-generator output. `amount` is in the funding denomination of the
/// side it was generated for: quote currency for bids, base for asks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DesiredOrder {
    pub amount: f64,
    pub price: PriceTick,
}

/// An order resting on the exchange. Volume is the unfilled remainder in
/// base units, as the exchange reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveOrder {
    pub oid: String,
    pub price: PriceTick,
    pub volume: f64,
}

/// One tradeable pair, immutable after bootstrap.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub pair: String,
    pub base: String,
    pub quote: String,
    /// Price decimals: tick = price * 10^decimals.
    pub decimals: u32,
    pub lot_decimals: u32,
}

/// One asset from the exchange catalogue.
#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub name: String,
    pub decimals: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_truncates() {
        assert_eq!(parse_price("105.559", 2).unwrap(), PriceTick(10555));
        assert_eq!(parse_price("105.551", 2).unwrap(), PriceTick(10555));
        assert_eq!(parse_price("105.5", 3).unwrap(), PriceTick(105500));
        assert_eq!(parse_price("0.00012345", 8).unwrap(), PriceTick(12345));
    }

    #[test]
    fn test_parse_price_preserves_order() {
        let lo = parse_price("64999.9", 1).unwrap();
        let hi = parse_price("65000.0", 1).unwrap();
        assert!(lo < hi);
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(PriceTick(10555), 2), "105.55");
        assert_eq!(format_price(PriceTick(105500), 3), "105.500");
        assert_eq!(format_price(PriceTick(7), 4), "0.0007");
    }

    #[test]
    fn test_tick_round_trip() {
        for s in ["105.55", "0.0001", "76543.21", "99999.99"] {
            let tick = parse_price(s, 2).unwrap();
            assert_eq!(parse_price(&format_price(tick, 2), 2).unwrap(), tick);
        }
        // D-digit string -> tick -> string is the identity
        assert_eq!(format_price(parse_price("76543.21", 2).unwrap(), 2), "76543.21");
    }

    #[test]
    fn test_parse_price_rejects_garbage() {
        assert!(parse_price("not-a-price", 2).is_err());
        assert!(parse_price("", 2).is_err());
    }

    #[test]
    fn test_side_from_exchange() {
        assert_eq!(Side::from_exchange("b"), Some(Side::Buy));
        assert_eq!(Side::from_exchange("sell"), Some(Side::Sell));
        assert_eq!(Side::from_exchange("x"), None);
    }
}
