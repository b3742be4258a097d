use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use crate::application::snapshot_cache::SnapshotCaches;

/// Periodically drop expired snapshot and usage entries.
pub async fn run_cache_sweep_loop(caches: Arc<SnapshotCaches>, every: Duration) {
    let mut ticker = interval(every);

    info!(
        "Snapshot cache sweeper started (sweeping every {}s)",
        every.as_secs()
    );

    loop {
        ticker.tick().await;

        let removed = caches.sweep();
        if removed > 0 {
            debug!(removed, "Swept expired snapshot cache entries");
        }
    }
}
