//! Periodic tombstone reconciliation.

use crate::services::UploadOrchestrator;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Records purged per reconciliation pass.
pub const RECONCILE_BATCH: usize = 100;

/// Retry backend deletion for tombstoned records every `interval`.
pub fn spawn_reconciler(orchestrator: UploadOrchestrator, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = orchestrator.purge_tombstoned(RECONCILE_BATCH).await {
                warn!(error = %err, "tombstone reconciliation failed");
            }
        }
    })
}
