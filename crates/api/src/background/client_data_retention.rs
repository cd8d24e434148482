//! Periodic cleanup of expired socket client data.
//!
//! Reads already ignore expired documents; this job only reclaims the space.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::ClientDataStore;

/// How often the cleanup job runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(600); // 10 minutes

/// Run the client data retention loop until `cancel` is triggered.
pub async fn run(store: Arc<dyn ClientDataStore>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Client data retention job started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Client data retention job stopping");
                break;
            }
            _ = ticker.tick() => {
                match store.purge_expired().await {
                    Ok(0) => tracing::debug!("Client data retention: nothing to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Client data retention: purged expired documents"),
                    Err(e) => tracing::error!(error = %e, "Client data retention: cleanup failed"),
                }
            }
        }
    }
}
