use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use krill_mm::core::AppConfig;
use krill_mm::engine::{Maker, MakerCommand};
use krill_mm::exchange::{Credentials, Gate, RestClient};
use krill_mm::trackers::{AccountTracker, BookTracker, TradesTracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("🦐 krill-mm starting...");

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = AppConfig::load(Path::new(&config_path))?;

    let credentials = Credentials::load(
        Path::new(&config.exchange.key_file),
        Path::new(&config.exchange.secret_file),
    )?;

    let client = Arc::new(RestClient::new(
        &config.exchange.base_url,
        Duration::from_secs(config.exchange.http_timeout_secs),
    )?);

    // Process-wide immutable catalogues, loaded once at bootstrap.
    let assets = Arc::new(client.assets().await.context("fetching asset catalogue")?);
    let markets = Arc::new(client.asset_pairs().await.context("fetching pair catalogue")?);
    tracing::info!("loaded {} assets, {} pairs", assets.len(), markets.len());

    let market = markets
        .get(&config.maker.pair)
        .cloned()
        .with_context(|| format!("exchange does not list pair {}", config.maker.pair))?;
    tracing::info!(
        "market {}: {} / {} at {} price decimals",
        market.pair,
        market.base,
        market.quote,
        market.decimals
    );

    let gate = Gate::spawn(
        client.clone(),
        credentials,
        Duration::from_millis(config.exchange.gate_interval_ms),
    );

    let trades = TradesTracker::spawn(
        client.clone(),
        market.pair.clone(),
        Duration::from_secs(config.poll.trades_secs),
        Duration::from_secs(config.retention.trades_window_secs),
    );
    let book = BookTracker::spawn(
        client.clone(),
        market.pair.clone(),
        market.decimals,
        config.poll.book_depth,
        Duration::from_secs(config.poll.book_secs),
    );
    let account = AccountTracker::spawn(
        gate.clone(),
        Duration::from_secs(config.poll.balance_secs),
        Duration::from_secs(config.poll.executions_secs),
        config.retention.max_executions,
    );

    // Operators drive the running maker through this channel.
    let (control, control_rx) = mpsc::channel::<MakerCommand>(8);
    let maker = Maker::new(market, config.maker.clone(), gate, trades, book, account);

    tracing::info!("✅ actors wired, entering maker loop");
    let _control = control;
    maker.run(control_rx).await;
    Ok(())
}
