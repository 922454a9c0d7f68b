//! Top-of-book snapshot for one market.
//!
//! An updater polls the Depth endpoint; a worker serves the latest
//! snapshot on demand. Decimal price strings are truncated into tick
//! space here — nothing past this point sees a floating-point price.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::core::{parse_price, BookLevel, Result};
use crate::exchange::model::DepthBook;
use crate::exchange::RestClient;
use crate::supervisor::supervise;

pub enum BookCommand {
    /// Bid side, descending in price.
    Bids { reply: oneshot::Sender<Vec<BookLevel>> },
    /// Ask side, ascending in price.
    Asks { reply: oneshot::Sender<Vec<BookLevel>> },
    /// Hold all service (including snapshot swaps) until the next command.
    Pause,
}

#[derive(Clone)]
pub struct BookTracker {
    control: mpsc::Sender<BookCommand>,
}

impl BookTracker {
    pub fn spawn(
        client: Arc<RestClient>,
        pair: String,
        decimals: u32,
        depth: u32,
        delay: Duration,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (buffer_tx, buffer_rx) = mpsc::channel(4);
        supervise("book-updater", move || {
            updater(client.clone(), pair.clone(), decimals, depth, delay, buffer_tx.clone())
        });
        tokio::spawn(worker(control_rx, buffer_rx));
        Self { control: control_tx }
    }

    pub async fn bids(&self) -> Vec<BookLevel> {
        let (reply, rx) = oneshot::channel();
        if self.control.send(BookCommand::Bids { reply }).await.is_err() {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }

    pub async fn asks(&self) -> Vec<BookLevel> {
        let (reply, rx) = oneshot::channel();
        if self.control.send(BookCommand::Asks { reply }).await.is_err() {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }

    pub async fn pause(&self) {
        let _ = self.control.send(BookCommand::Pause).await;
    }
}

async fn updater(
    client: Arc<RestClient>,
    pair: String,
    decimals: u32,
    depth: u32,
    delay: Duration,
    buffer: mpsc::Sender<(Vec<BookLevel>, Vec<BookLevel>)>,
) {
    loop {
        match poll_depth(&client, &pair, decimals, depth).await {
            Ok(snapshot) => {
                if buffer.send(snapshot).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("book updater ({}): {}", pair, e),
        }
        tokio::time::sleep(delay).await;
    }
}

async fn poll_depth(
    client: &RestClient,
    pair: &str,
    decimals: u32,
    depth: u32,
) -> Result<(Vec<BookLevel>, Vec<BookLevel>)> {
    let params = [("pair", pair.to_string()), ("count", depth.to_string())];
    let result = client.public("Depth", &params).await?;
    let book: DepthBook = serde_json::from_value(result[pair].clone())?;
    Ok((parse_side(&book.bids, decimals), parse_side(&book.asks, decimals)))
}

fn parse_side(rows: &[(String, String, f64)], decimals: u32) -> Vec<BookLevel> {
    rows.iter()
        .filter_map(|(price, volume, _ts)| {
            let price = parse_price(price, decimals).ok()?;
            let volume: f64 = volume.parse().ok()?;
            Some(BookLevel { price, volume })
        })
        .collect()
}

async fn worker(
    mut control: mpsc::Receiver<BookCommand>,
    mut buffer: mpsc::Receiver<(Vec<BookLevel>, Vec<BookLevel>)>,
) {
    let mut bids: Vec<BookLevel> = vec![];
    let mut asks: Vec<BookLevel> = vec![];
    loop {
        let mut command = tokio::select! {
            Some(cmd) = control.recv() => cmd,
            Some((new_bids, new_asks)) = buffer.recv() => {
                bids = new_bids;
                asks = new_asks;
                continue;
            }
            else => return,
        };
        while matches!(command, BookCommand::Pause) {
            match control.recv().await {
                Some(next) => command = next,
                None => return,
            }
        }
        match command {
            BookCommand::Bids { reply } => {
                let _ = reply.send(bids.clone());
            }
            BookCommand::Asks { reply } => {
                let _ = reply.send(asks.clone());
            }
            BookCommand::Pause => unreachable!("drained above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PriceTick;

    #[test]
    fn test_parse_side_truncates_into_ticks() {
        let rows = vec![
            ("30243.49999".to_string(), "1.5".to_string(), 0.0),
            ("30243.3".to_string(), "0.25".to_string(), 0.0),
        ];
        let side = parse_side(&rows, 1);
        assert_eq!(side[0], BookLevel { price: PriceTick(302434), volume: 1.5 });
        assert_eq!(side[1], BookLevel { price: PriceTick(302433), volume: 0.25 });
    }

    #[test]
    fn test_parse_side_skips_malformed_rows() {
        let rows = vec![
            ("garbage".to_string(), "1.5".to_string(), 0.0),
            ("100.0".to_string(), "2.0".to_string(), 0.0),
        ];
        let side = parse_side(&rows, 2);
        assert_eq!(side.len(), 1);
        assert_eq!(side[0].price, PriceTick(10000));
    }

    #[tokio::test]
    async fn test_worker_serves_latest_snapshot() {
        let (control_tx, control_rx) = mpsc::channel(16);
        let (buffer_tx, buffer_rx) = mpsc::channel(4);
        tokio::spawn(worker(control_rx, buffer_rx));

        let bids = vec![BookLevel { price: PriceTick(100), volume: 1.0 }];
        let asks = vec![BookLevel { price: PriceTick(102), volume: 2.0 }];
        buffer_tx.send((bids.clone(), asks.clone())).await.unwrap();

        // Poll until the swap lands, then both sides must match.
        loop {
            let (reply, rx) = oneshot::channel();
            control_tx.send(BookCommand::Bids { reply }).await.unwrap();
            if rx.await.unwrap() == bids {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (reply, rx) = oneshot::channel();
        control_tx.send(BookCommand::Asks { reply }).await.unwrap();
        assert_eq!(rx.await.unwrap(), asks);
    }
}
