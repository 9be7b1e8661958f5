//! Background refresh loop: runs `Ingestor::refresh` on a fixed interval.
//!
//! Each tick is one full cycle: fetch every feed, dedup against the store,
//! classify, commit. A failed cycle is logged and the next tick retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::ingestor::Ingestor;
use crate::pipeline::types::FeedSource;
use crate::store::Database;

/// Spawn a background task that refreshes all feeds every `interval`.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling;
/// the loop exits at the next tick.
pub fn spawn_refresh_poller(
    ingestor: Ingestor,
    sources: Vec<Arc<dyn FeedSource>>,
    db: Arc<dyn Database>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Refresh poller started, polling {} feeds every {}s",
            sources.len(),
            interval.as_secs()
        );

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Refresh poller shutting down");
                return;
            }

            refresh_once(&ingestor, &sources, db.as_ref()).await;
        }
    });

    (handle, shutdown_flag)
}

async fn refresh_once(ingestor: &Ingestor, sources: &[Arc<dyn FeedSource>], db: &dyn Database) {
    match ingestor.refresh(sources, db).await {
        Ok(result) => {
            for failed in result.failed_sources() {
                warn!(source = %failed.source, "Feed unavailable this cycle");
            }
            info!(
                fetched = result.total_fetched(),
                admitted = result.total_admitted(),
                duplicates = result.total_duplicates(),
                heartbeat = result.is_heartbeat(),
                "Refresh cycle complete"
            );
        }
        Err(e) => {
            error!("Refresh cycle failed: {e}");
        }
    }
}
