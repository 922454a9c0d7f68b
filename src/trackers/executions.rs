//! The lictor: the agent's own fill history since a rolling cursor.
//!
//! The updater pulls fills in paginated chunks through the Gate, pinning
//! the page window with an `end` txid so a shifting server view is
//! detected rather than silently merged. The worker accumulates fills
//! newest-first and answers snapshot requests.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::core::{Error, Execution, Result, Side};
use crate::exchange::model::{HistoryFill, HistoryPage};
use crate::exchange::Gate;
use crate::supervisor::supervise;

pub enum LictorCommand {
    Executions { reply: oneshot::Sender<Vec<Execution>> },
}

#[derive(Clone)]
pub struct ExecutionTracker {
    control: mpsc::Sender<LictorCommand>,
}

impl ExecutionTracker {
    pub fn spawn(gate: Gate, delay: Duration, cap: usize) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (buffer_tx, buffer_rx) = mpsc::channel(64);
        supervise("lictor-updater", move || {
            updater(gate.clone(), delay, buffer_tx.clone())
        });
        tokio::spawn(worker(control_rx, buffer_rx, cap));
        Self { control: control_tx }
    }

    /// Current snapshot of parsed executions, newest first.
    pub async fn executions(&self) -> Vec<Execution> {
        let (reply, rx) = oneshot::channel();
        if self.control.send(LictorCommand::Executions { reply }).await.is_err() {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }
}

async fn updater(gate: Gate, delay: Duration, buffer: mpsc::Sender<Execution>) {
    let mut since: Option<String> = None;
    loop {
        tokio::time::sleep(delay).await;
        match fetch_chunk(&gate, since.as_deref(), delay).await {
            Ok(chunk) => {
                if let Some(newest) = chunk.last() {
                    since = Some(newest.txid.clone());
                }
                for fill in chunk {
                    if buffer.send(fill).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!("lictor updater: {}", e),
        }
    }
}

/// Pull every fill newer than `since`, ascending by timestamp.
///
/// Protocol: an unbounded probe fixes the chunk size and the `end` txid,
/// then offset pages walk the pinned window. Every page must report the
/// same count; a mismatch means the server's view shifted and the chunk
/// is abandoned (the next poll retries).
pub(crate) async fn fetch_chunk(
    gate: &Gate,
    since: Option<&str>,
    delay: Duration,
) -> Result<Vec<Execution>> {
    let (count, probe) = history(gate, since, None, None).await?;
    if count == 0 {
        return Ok(vec![]);
    }
    let until = probe
        .first()
        .map(|f| f.txid.clone())
        .ok_or_else(|| Error::Parse("history reports fills but returned none".into()))?;

    let mut accum: Vec<Execution> = Vec::with_capacity(count as usize);
    while (accum.len() as u64) < count {
        tokio::time::sleep(delay).await;
        let (page_count, page) = history(gate, since, Some(&until), Some(accum.len())).await?;
        if page_count != count {
            return Err(Error::InvalidState(format!(
                "history shifted mid-chunk: {} -> {}",
                count, page_count
            )));
        }
        if page.is_empty() {
            return Err(Error::InvalidState(
                "history page empty before chunk complete".into(),
            ));
        }
        accum.extend(page);
    }
    accum.sort_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(Ordering::Equal));
    Ok(accum)
}

/// One TradesHistory call. Fills come back newest-first, matching the
/// exchange's listing order.
async fn history(
    gate: &Gate,
    since: Option<&str>,
    until: Option<&str>,
    offset: Option<usize>,
) -> Result<(u64, Vec<Execution>)> {
    let mut params: Vec<(String, String)> = vec![];
    if let Some(s) = since {
        params.push(("start".into(), s.into()));
    }
    if let Some(u) = until {
        params.push(("end".into(), u.into()));
    }
    if let Some(o) = offset {
        params.push(("ofs".into(), o.to_string()));
    }
    let response = gate.request("TradesHistory", params).await;
    if !response.ok() {
        return Err(Error::Exchange(response.errors.join("; ")));
    }
    let page: HistoryPage = serde_json::from_value(
        response
            .result
            .ok_or_else(|| Error::Parse("TradesHistory without result".into()))?,
    )?;
    let mut fills: Vec<Execution> = page
        .trades
        .into_iter()
        .filter_map(|(txid, fill)| to_execution(txid, fill))
        .collect();
    fills.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(Ordering::Equal));
    Ok((page.count, fills))
}

fn to_execution(txid: String, fill: HistoryFill) -> Option<Execution> {
    let side = Side::from_exchange(&fill.side)?;
    Some(Execution {
        oid: fill.ordertxid,
        txid,
        timestamp: fill.time,
        side,
        pair: fill.pair,
        price: fill.price.parse().ok()?,
        volume: fill.vol.parse().ok()?,
        cost: fill.cost.parse().ok()?,
        fee: fill.fee.parse().ok()?,
    })
}

async fn worker(
    mut control: mpsc::Receiver<LictorCommand>,
    mut buffer: mpsc::Receiver<Execution>,
    cap: usize,
) {
    // Front of the deque is the newest fill.
    let mut fills: VecDeque<Execution> = VecDeque::new();
    loop {
        tokio::select! {
            Some(command) = control.recv() => match command {
                LictorCommand::Executions { reply } => {
                    let _ = reply.send(fills.iter().cloned().collect());
                }
            },
            Some(fill) = buffer.recv() => {
                // Guard against replays after an updater restart.
                if !fills.iter().any(|f| f.txid == fill.txid) {
                    fills.push_front(fill);
                    fills.truncate(cap);
                }
            }
            else => return,
        }
    }
}
