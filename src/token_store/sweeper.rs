//! Periodic deletion of tokens that have not been used for a while.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::TokenStore;
use crate::server::metrics;

/// Deletes tokens whose last use is older than `retention_days`.
pub fn sweep_stale_tokens(store: &dyn TokenStore, retention_days: u64) -> Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
    let removed = store.cleanup_old_tokens(cutoff)?;
    metrics::record_tokens_pruned("stale", removed);
    Ok(removed)
}

/// Runs [`sweep_stale_tokens`] every `interval` until `shutdown` is cancelled.
/// The first sweep happens one interval after spawning.
pub fn spawn_token_sweeper(
    store: Arc<dyn TokenStore>,
    retention_days: u64,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match sweep_stale_tokens(store.as_ref(), retention_days) {
                        Ok(count) => {
                            if count > 0 {
                                info!("Swept {} stale push tokens", count);
                            }
                        }
                        Err(e) => {
                            error!("Failed to sweep stale push tokens: {}", e);
                        }
                    }
                }
            }
        }
    })
}
