//! Rolling public-trade window for one market.
//!
//! Two cooperating tasks: an updater that polls the Trades endpoint past
//! a continuation cursor, and a worker that multiplexes the control
//! channel with the ingest buffer. Near-simultaneous prints with the same
//! side/kind/tag are coalesced into one volume-weighted record.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::core::{Result, Side, TradeEvent};
use crate::exchange::model::parse_trade_row;
use crate::exchange::RestClient;
use crate::supervisor::supervise;

/// Prints closer than this (same side/kind/tag) merge into one record.
const COALESCE_WINDOW_SECS: f64 = 0.3;

pub enum TradesCommand {
    /// Largest single-trade volume currently in the window.
    Max { reply: oneshot::Sender<Option<f64>> },
    /// Volume-weighted average price over the filtered window.
    Vwap {
        since: Option<f64>,
        side: Option<Side>,
        reply: oneshot::Sender<Option<f64>>,
    },
    /// Hold all service (including ingestion) until the next command.
    Pause,
}

#[derive(Clone)]
pub struct TradesTracker {
    control: mpsc::Sender<TradesCommand>,
}

impl TradesTracker {
    pub fn spawn(
        client: Arc<RestClient>,
        pair: String,
        delay: Duration,
        retention: Duration,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (buffer_tx, buffer_rx) = mpsc::channel(64);
        supervise("trades-updater", move || {
            updater(client.clone(), pair.clone(), delay, buffer_tx.clone())
        });
        tokio::spawn(worker(control_rx, buffer_rx, retention.as_secs_f64()));
        Self { control: control_tx }
    }

    pub async fn max(&self) -> Option<f64> {
        let (reply, rx) = oneshot::channel();
        self.control.send(TradesCommand::Max { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn vwap(&self, since: Option<f64>, side: Option<Side>) -> Option<f64> {
        let (reply, rx) = oneshot::channel();
        self.control.send(TradesCommand::Vwap { since, side, reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn pause(&self) {
        let _ = self.control.send(TradesCommand::Pause).await;
    }
}

async fn updater(
    client: Arc<RestClient>,
    pair: String,
    delay: Duration,
    buffer: mpsc::Sender<Vec<TradeEvent>>,
) {
    let mut cursor: Option<String> = None;
    loop {
        match poll_trades(&client, &pair, cursor.as_deref()).await {
            Ok((batch, last)) => {
                cursor = last.or(cursor);
                if !batch.is_empty() && buffer.send(batch).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("trades updater ({}): {}", pair, e),
        }
        tokio::time::sleep(delay).await;
    }
}

async fn poll_trades(
    client: &RestClient,
    pair: &str,
    since: Option<&str>,
) -> Result<(Vec<TradeEvent>, Option<String>)> {
    let mut params = vec![("pair", pair.to_string())];
    if let Some(s) = since {
        params.push(("since", s.to_string()));
    }
    let result = client.public("Trades", &params).await?;
    let batch = result[pair]
        .as_array()
        .map(|rows| rows.iter().filter_map(parse_trade_row).collect())
        .unwrap_or_default();
    let last = result["last"].as_str().map(str::to_string);
    Ok((batch, last))
}

async fn worker(
    mut control: mpsc::Receiver<TradesCommand>,
    mut buffer: mpsc::Receiver<Vec<TradeEvent>>,
    retention_secs: f64,
) {
    // Front of the deque is the newest record.
    let mut window: VecDeque<TradeEvent> = VecDeque::new();
    loop {
        let mut command = tokio::select! {
            Some(cmd) = control.recv() => cmd,
            Some(batch) = buffer.recv() => {
                for trade in batch {
                    ingest(&mut window, trade);
                }
                trim(&mut window, retention_secs);
                continue;
            }
            else => return,
        };
        while matches!(command, TradesCommand::Pause) {
            match control.recv().await {
                Some(next) => command = next,
                None => return,
            }
        }
        match command {
            TradesCommand::Max { reply } => {
                let _ = reply.send(window.iter().map(|t| t.volume).reduce(f64::max));
            }
            TradesCommand::Vwap { since, side, reply } => {
                let _ = reply.send(window_vwap(&window, since, side));
            }
            TradesCommand::Pause => unreachable!("drained above"),
        }
    }
}

/// Fold a trade into the front of the window, merging with the newest
/// record when side, kind and tag match and the prints are closer than
/// the coalescing threshold. The merged record keeps the earlier
/// timestamp and the volume-weighted price.
pub(crate) fn ingest(window: &mut VecDeque<TradeEvent>, trade: TradeEvent) {
    if let Some(front) = window.front_mut() {
        let close = (trade.timestamp - front.timestamp).abs() < COALESCE_WINDOW_SECS;
        if close && front.side == trade.side && front.kind == trade.kind && front.tag == trade.tag
        {
            let volume = front.volume + trade.volume;
            let cost = front.cost + trade.cost;
            front.timestamp = front.timestamp.min(trade.timestamp);
            front.volume = volume;
            front.cost = cost;
            front.price = cost / volume;
            return;
        }
    }
    window.push_front(trade);
}

pub(crate) fn window_vwap(
    window: &VecDeque<TradeEvent>,
    since: Option<f64>,
    side: Option<Side>,
) -> Option<f64> {
    let (cost, volume) = window
        .iter()
        .filter(|t| since.map_or(true, |s| t.timestamp >= s))
        .filter(|t| side.map_or(true, |s| t.side == s))
        .fold((0.0, 0.0), |(c, v), t| (c + t.cost, v + t.volume));
    if volume > 0.0 {
        Some(cost / volume)
    } else {
        None
    }
}

fn trim(window: &mut VecDeque<TradeEvent>, retention_secs: f64) {
    let Some(newest) = window.front().map(|t| t.timestamp) else { return };
    while window
        .back()
        .map_or(false, |t| newest - t.timestamp > retention_secs)
    {
        window.pop_back();
    }
}
