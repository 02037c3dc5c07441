//! Write-behind flusher task.

use crate::errors::DigitwinError;
use crate::store::DigitwinStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Spawn the background task that persists dirty twins.
///
/// It flushes every `interval`, early when the dirty count reaches the
/// configured threshold, and one final time when `shutdown` is cancelled.
pub fn spawn_flusher(
    store: Arc<DigitwinStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !store.is_persistent() {
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = store.flush_needed.notified() => {
                    tracing::debug!("flush threshold reached");
                }
                _ = shutdown.cancelled() => break,
            }
            match flush(&store).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "digitwin flush failed; retrying next cycle"),
                Err(e) => tracing::error!(error = %e, "digitwin flush task aborted"),
            }
        }

        match flush(&store).await {
            Ok(Ok(count)) => tracing::info!(count, "digitwin flushed on shutdown"),
            Ok(Err(e)) => tracing::error!(error = %e, "final digitwin flush failed"),
            Err(e) => tracing::error!(error = %e, "final digitwin flush task aborted"),
        }
    })
}

/// Save pending changes on the blocking pool, off the async workers.
async fn flush(store: &Arc<DigitwinStore>) -> Result<Result<usize, DigitwinError>, JoinError> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.save_changes()).await
}
