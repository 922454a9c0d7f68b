//! Task supervision: restart a polling actor whenever its future ends.
//!
//! Worker loops are total and only exit on channel closure, so this is
//! mainly the updaters' safety net against panics in decode paths.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Spawn `factory()` and respawn it whenever it completes or panics.
pub fn supervise<F, Fut>(name: &'static str, mut factory: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let run = tokio::spawn(factory());
            match run.await {
                Ok(()) => warn!("{}: stopped, restarting", name),
                Err(e) if e.is_panic() => warn!("{}: panicked, restarting", name),
                Err(_) => return, // runtime shutting down
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}
