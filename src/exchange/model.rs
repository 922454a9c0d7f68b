//! Typed payloads for the exchange REST API.
//!
//! Regular objects deserialize into structs; the public trade rows are
//! heterogeneous arrays and are walked manually through `Value`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::{Side, TradeEvent, TradeKind};

/// Entry in the `Assets` catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetEntry {
    pub altname: String,
    pub decimals: u32,
}

/// Entry in the `AssetPairs` catalogue.
#[derive(Debug, Clone, Deserialize)]
pub struct PairEntry {
    pub base: String,
    pub quote: String,
    pub pair_decimals: u32,
    pub lot_decimals: u32,
}

/// One side of a `Depth` response: rows of [price, volume, timestamp].
#[derive(Debug, Clone, Deserialize)]
pub struct DepthBook {
    pub bids: Vec<(String, String, f64)>,
    pub asks: Vec<(String, String, f64)>,
}

/// `TradesHistory` result envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    pub count: u64,
    #[serde(default)]
    pub trades: HashMap<String, HistoryFill>,
}

/// One private fill inside a `TradesHistory` page.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryFill {
    pub ordertxid: String,
    pub pair: String,
    pub time: f64,
    #[serde(rename = "type")]
    pub side: String,
    pub price: String,
    pub cost: String,
    pub fee: String,
    pub vol: String,
}

/// `OpenOrders` result envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersResult {
    #[serde(default)]
    pub open: HashMap<String, OpenOrderInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrderInfo {
    pub descr: OrderDescr,
    pub vol: String,
    pub vol_exec: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderDescr {
    pub pair: String,
    #[serde(rename = "type")]
    pub side: String,
    pub price: String,
}

/// Parse one public trade row: [price, volume, time, side, kind, misc].
/// Returns `None` on rows that do not match the published shape.
pub fn parse_trade_row(row: &Value) -> Option<TradeEvent> {
    let fields = row.as_array()?;
    let price: f64 = fields.first()?.as_str()?.parse().ok()?;
    let volume: f64 = fields.get(1)?.as_str()?.parse().ok()?;
    let timestamp = fields.get(2)?.as_f64()?;
    let side = Side::from_exchange(fields.get(3)?.as_str()?)?;
    let kind = TradeKind::from_exchange(fields.get(4)?.as_str()?)?;
    let tag = fields.get(5).and_then(Value::as_str).unwrap_or_default().to_string();
    Some(TradeEvent {
        timestamp,
        volume,
        price,
        cost: volume * price,
        side,
        kind,
        tag,
    })
}
