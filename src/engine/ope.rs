//! Order placement engine: serializes order-mutating calls through the
//! Gate and normalizes their results.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::core::{format_price, LiveOrder, PriceTick, Side};
use crate::exchange::Gate;

/// Placement seam. Production goes through the OPE actor; the reconciler
/// is tested against scripted implementations.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    /// Place a bid funded with `quote_amount` of the quote currency.
    async fn bid(
        &self,
        pair: &str,
        quote_amount: f64,
        price: PriceTick,
        decimals: u32,
    ) -> Option<LiveOrder>;

    /// Place an ask offering `base_amount` of the base currency.
    async fn ask(
        &self,
        pair: &str,
        base_amount: f64,
        price: PriceTick,
        decimals: u32,
    ) -> Option<LiveOrder>;

    /// Cancel by order id. "Unknown order" counts as success.
    async fn cancel(&self, oid: &str) -> bool;
}

pub enum OpeCommand {
    Bid {
        pair: String,
        quote_amount: f64,
        price: PriceTick,
        decimals: u32,
        reply: oneshot::Sender<Option<LiveOrder>>,
    },
    Ask {
        pair: String,
        base_amount: f64,
        price: PriceTick,
        decimals: u32,
        reply: oneshot::Sender<Option<LiveOrder>>,
    },
    Cancel {
        oid: String,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub struct OrderPlacementEngine {
    control: mpsc::Sender<OpeCommand>,
}

impl OrderPlacementEngine {
    pub fn spawn(gate: Gate) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        tokio::spawn(worker(gate, control_rx));
        Self { control: control_tx }
    }
}

#[async_trait]
impl OrderPlacer for OrderPlacementEngine {
    async fn bid(
        &self,
        pair: &str,
        quote_amount: f64,
        price: PriceTick,
        decimals: u32,
    ) -> Option<LiveOrder> {
        let (reply, rx) = oneshot::channel();
        let command = OpeCommand::Bid {
            pair: pair.to_string(),
            quote_amount,
            price,
            decimals,
            reply,
        };
        self.control.send(command).await.ok()?;
        rx.await.ok().flatten()
    }

    async fn ask(
        &self,
        pair: &str,
        base_amount: f64,
        price: PriceTick,
        decimals: u32,
    ) -> Option<LiveOrder> {
        let (reply, rx) = oneshot::channel();
        let command = OpeCommand::Ask {
            pair: pair.to_string(),
            base_amount,
            price,
            decimals,
            reply,
        };
        self.control.send(command).await.ok()?;
        rx.await.ok().flatten()
    }

    async fn cancel(&self, oid: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = OpeCommand::Cancel { oid: oid.to_string(), reply };
        if self.control.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

async fn worker(gate: Gate, mut control: mpsc::Receiver<OpeCommand>) {
    while let Some(command) = control.recv().await {
        match command {
            OpeCommand::Bid { pair, quote_amount, price, decimals, reply } => {
                let price_value = price.to_price(decimals);
                let placed = if price_value > 0.0 {
                    // Bids start base-denominated; the retry ladder flips
                    // them back to quote when the exchange objects.
                    post_limit(&gate, Side::Buy, &pair, price, quote_amount / price_value, decimals)
                        .await
                } else {
                    None
                };
                let _ = reply.send(placed);
            }
            OpeCommand::Ask { pair, base_amount, price, decimals, reply } => {
                let placed =
                    post_limit(&gate, Side::Sell, &pair, price, base_amount, decimals).await;
                let _ = reply.send(placed);
            }
            OpeCommand::Cancel { oid, reply } => {
                let _ = reply.send(cancel_order(&gate, &oid).await);
            }
        }
    }
}

/// Submit one limit order, with the volume-floor retry ladder:
/// an error mentioning "volume" flips to quote-denominated volume
/// (`oflags=viqc`, volume·price), and a second such error bumps the
/// quote volume once by 0.01. Anything else is logged and unplaced.
async fn post_limit(
    gate: &Gate,
    side: Side,
    pair: &str,
    price: PriceTick,
    volume: f64,
    decimals: u32,
) -> Option<LiveOrder> {
    let price_value = price.to_price(decimals);
    let mut volume = volume;
    let mut quote_denominated = false;
    let mut bumped = false;

    loop {
        let mut params: Vec<(String, String)> = vec![
            ("pair".into(), pair.to_string()),
            ("type".into(), side.as_str().to_string()),
            ("ordertype".into(), "limit".into()),
            ("price".into(), format_price(price, decimals)),
            ("volume".into(), format!("{:.8}", volume)),
        ];
        if quote_denominated {
            params.push(("oflags".into(), "viqc".into()));
        }

        let response = gate.request("AddOrder", params).await;
        if response.ok() {
            let oid = response
                .result
                .as_ref()
                .and_then(|r| r["txid"][0].as_str())
                .map(str::to_string);
            return match oid {
                Some(oid) => {
                    let base_volume =
                        if quote_denominated { volume / price_value } else { volume };
                    Some(LiveOrder { oid, price, volume: base_volume })
                }
                None => {
                    warn!("AddOrder {} {} accepted without txid", side, pair);
                    None
                }
            };
        }

        if response.error_contains("volume") {
            if quote_denominated {
                if bumped {
                    warn!("AddOrder {} {}: volume floor persists, giving up", side, pair);
                    return None;
                }
                volume += 0.01;
                bumped = true;
            } else {
                volume *= price_value;
                quote_denominated = true;
            }
            continue;
        }

        warn!("AddOrder {} {} rejected: {}", side, pair, response.errors.join("; "));
        return None;
    }
}

async fn cancel_order(gate: &Gate, oid: &str) -> bool {
    let response = gate.request("CancelOrder", vec![("txid".into(), oid.into())]).await;
    if response.ok() || response.error_contains("Unknown order") {
        return true;
    }
    warn!("CancelOrder {} failed: {}", oid, response.errors.join("; "));
    false
}
