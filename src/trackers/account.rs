//! Balances, realized VWAP, and ownership of the lictor and the OPE.
//!
//! The updater polls the Balance endpoint and posts whole maps through
//! the control channel; the worker serves reads. The two tasks share the
//! balance map only through those messages.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::core::{Execution, Side};
use crate::engine::ope::OrderPlacementEngine;
use crate::exchange::Gate;
use crate::supervisor::supervise;
use crate::trackers::executions::ExecutionTracker;

pub enum AccountCommand {
    /// Current balance of one asset; unknown assets read as zero.
    Balance { asset: String, reply: oneshot::Sender<f64> },
    /// Realized VWAP over the agent's own fills matching side and pair.
    Vwap {
        side: Side,
        pair: String,
        reply: oneshot::Sender<Option<f64>>,
    },
    /// Slot update posted by the updater.
    SetBalances(HashMap<String, f64>),
}

#[derive(Clone)]
pub struct AccountTracker {
    control: mpsc::Sender<AccountCommand>,
    pub lictor: ExecutionTracker,
    pub ope: OrderPlacementEngine,
}

impl AccountTracker {
    pub fn spawn(
        gate: Gate,
        balance_delay: Duration,
        executions_delay: Duration,
        executions_cap: usize,
    ) -> Self {
        let lictor = ExecutionTracker::spawn(gate.clone(), executions_delay, executions_cap);
        let ope = OrderPlacementEngine::spawn(gate.clone());

        let (control_tx, control_rx) = mpsc::channel(16);
        let updater_tx = control_tx.clone();
        supervise("account-updater", move || {
            updater(gate.clone(), balance_delay, updater_tx.clone())
        });
        tokio::spawn(worker(control_rx, lictor.clone()));

        Self { control: control_tx, lictor, ope }
    }

    pub async fn balance(&self, asset: &str) -> f64 {
        let (reply, rx) = oneshot::channel();
        let command = AccountCommand::Balance { asset: asset.to_string(), reply };
        if self.control.send(command).await.is_err() {
            return 0.0;
        }
        rx.await.unwrap_or(0.0)
    }

    pub async fn vwap(&self, side: Side, pair: &str) -> Option<f64> {
        let (reply, rx) = oneshot::channel();
        let command = AccountCommand::Vwap { side, pair: pair.to_string(), reply };
        self.control.send(command).await.ok()?;
        rx.await.ok().flatten()
    }
}

async fn updater(gate: Gate, delay: Duration, control: mpsc::Sender<AccountCommand>) {
    loop {
        let response = gate.request("Balance", vec![]).await;
        if response.ok() {
            if let Some(raw) = response.result.as_ref().and_then(|r| r.as_object()) {
                let balances: HashMap<String, f64> = raw
                    .iter()
                    .filter_map(|(asset, amount)| {
                        let amount: f64 = amount.as_str()?.parse().ok()?;
                        Some((asset.clone(), amount))
                    })
                    .collect();
                if control.send(AccountCommand::SetBalances(balances)).await.is_err() {
                    return;
                }
            }
        } else {
            warn!("balance updater: {}", response.errors.join("; "));
        }
        tokio::time::sleep(delay).await;
    }
}

async fn worker(mut control: mpsc::Receiver<AccountCommand>, lictor: ExecutionTracker) {
    let mut balances: HashMap<String, f64> = HashMap::new();
    while let Some(command) = control.recv().await {
        match command {
            AccountCommand::Balance { asset, reply } => {
                let _ = reply.send(balances.get(&asset).copied().unwrap_or(0.0));
            }
            AccountCommand::Vwap { side, pair, reply } => {
                let fills = lictor.executions().await;
                let _ = reply.send(fold_vwap(&fills, side, &pair));
            }
            AccountCommand::SetBalances(new) => balances = new,
        }
    }
}

/// ∑cost / ∑volume over the fills matching both filters.
pub(crate) fn fold_vwap(fills: &[Execution], side: Side, pair: &str) -> Option<f64> {
    let (cost, volume) = fills
        .iter()
        .filter(|f| f.side == side && f.pair == pair)
        .fold((0.0, 0.0), |(c, v), f| (c + f.cost, v + f.volume));
    if volume > 0.0 {
        Some(cost / volume)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(side: Side, pair: &str, volume: f64, cost: f64) -> Execution {
        Execution {
            oid: "OID".into(),
            txid: "TXID".into(),
            timestamp: 0.0,
            side,
            pair: pair.into(),
            price: cost / volume,
            volume,
            cost,
            fee: 0.0,
        }
    }

    #[test]
    fn test_fold_vwap_filters_side_and_pair() {
        let fills = vec![
            fill(Side::Buy, "XXBTZUSD", 1.0, 100.0),
            fill(Side::Buy, "XXBTZUSD", 3.0, 330.0),
            fill(Side::Sell, "XXBTZUSD", 2.0, 250.0),
            fill(Side::Buy, "XETHZUSD", 1.0, 10.0),
        ];
        assert_eq!(fold_vwap(&fills, Side::Buy, "XXBTZUSD"), Some(430.0 / 4.0));
        assert_eq!(fold_vwap(&fills, Side::Sell, "XXBTZUSD"), Some(125.0));
        assert_eq!(fold_vwap(&fills, Side::Sell, "XETHZUSD"), None);
    }

    #[test]
    fn test_fold_vwap_empty_is_none() {
        assert_eq!(fold_vwap(&[], Side::Buy, "XXBTZUSD"), None);
    }
}
