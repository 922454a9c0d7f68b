//! Gate - the single serializer in front of the signed transport.
//!
//! One worker task owns the credentials and processes one request at a
//! time, so authenticated calls are linearized by construction: if A's
//! send precedes B's on the input channel, A's HTTP call starts first.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::warn;

use crate::exchange::client::{ApiResponse, RestClient};
use crate::exchange::signer::Credentials;

/// Seam between the Gate worker and the HTTP layer. Production uses
/// `RestClient`; tests script it.
#[async_trait]
pub trait SignedTransport: Send + Sync {
    async fn call(
        &self,
        credentials: &Credentials,
        path: &str,
        params: &[(String, String)],
    ) -> ApiResponse;
}

#[async_trait]
impl SignedTransport for RestClient {
    async fn call(
        &self,
        credentials: &Credentials,
        path: &str,
        params: &[(String, String)],
    ) -> ApiResponse {
        self.signed(credentials, path, params).await
    }
}

/// Requests, plus the key-slot directive that hot-swaps credentials.
pub enum GateCommand {
    Call {
        path: String,
        params: Vec<(String, String)>,
        reply: oneshot::Sender<ApiResponse>,
    },
    SetCredentials(Box<Credentials>),
}

/// Clonable handle to the Gate worker.
#[derive(Clone)]
pub struct Gate {
    tx: mpsc::Sender<GateCommand>,
}

impl Gate {
    pub fn spawn(
        transport: Arc<dyn SignedTransport>,
        credentials: Credentials,
        min_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(worker(transport, credentials, min_interval, rx));
        Self { tx }
    }

    /// Issue one authenticated request. Never fails: a dead worker shows
    /// up as a transport error in the `errors` half.
    pub async fn request(&self, path: &str, params: Vec<(String, String)>) -> ApiResponse {
        let (reply, response) = oneshot::channel();
        let command = GateCommand::Call { path: path.to_string(), params, reply };
        if self.tx.send(command).await.is_err() {
            return ApiResponse::transport("gate unavailable");
        }
        response
            .await
            .unwrap_or_else(|_| ApiResponse::transport("gate dropped the request"))
    }

    /// Swap the held credentials without restarting the worker.
    pub async fn set_credentials(&self, credentials: Credentials) {
        let _ = self.tx.send(GateCommand::SetCredentials(Box::new(credentials))).await;
    }
}

async fn worker(
    transport: Arc<dyn SignedTransport>,
    mut credentials: Credentials,
    min_interval: Duration,
    mut rx: mpsc::Receiver<GateCommand>,
) {
    let mut pace = min_interval;
    let mut last_call: Option<Instant> = None;

    while let Some(command) = rx.recv().await {
        match command {
            GateCommand::SetCredentials(c) => credentials = *c,
            GateCommand::Call { path, params, reply } => {
                if let Some(at) = last_call {
                    let wait = pace.saturating_sub(at.elapsed());
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                }
                let response = transport.call(&credentials, &path, &params).await;
                last_call = Some(Instant::now());

                // Adaptive pacing: back off while the exchange pushes back,
                // decay toward the configured floor on clean calls.
                if response.error_contains("Rate limit") {
                    pace = std::cmp::min(pace * 2, min_interval * 8);
                    warn!("gate: rate limited on {}, pacing at {:?}", path, pace);
                } else if pace > min_interval {
                    pace = std::cmp::max(pace / 2, min_interval);
                }

                let _ = reply.send(response);
            }
        }
    }
}
