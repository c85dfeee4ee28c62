//! Periodic sweep of records whose physical write was never confirmed and of
//! temporary files left by interrupted writes.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::records::RecordStore;
use crate::service::FileItemService;

/// Spawns the orphan and temp-file sweep. A zero `interval` disables it.
///
/// `grace` is both the age a pending record must reach before it is settled
/// and the age of temp files that are removed.
pub fn spawn_background_tasks<S>(
    service: Arc<FileItemService<S>>,
    interval: Duration,
    grace: Duration,
) where
    S: RecordStore + 'static,
{
    if interval.is_zero() {
        info!("orphaned record sweep disabled");
        return;
    }

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match service.reconcile_orphans(grace).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "orphaned record sweep finished"),
                Err(err) => warn!(error = %err, "orphaned record sweep failed"),
            }
            match service.storage().remove_stale_temp_files(grace).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "stale temp file sweep finished"),
                Err(err) => warn!(error = %err, "stale temp file sweep failed"),
            }
        }
    });
}
