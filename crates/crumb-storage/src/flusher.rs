//! Background flush task
//!
//! Pairs with [`Persistence::Deferred`](crumb_core::Persistence::Deferred):
//! new records stay in the cache and reach the durable table in batches.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::store::CompactionStore;

/// Handle to a running flusher
pub struct FlusherHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FlusherHandle {
    /// Stop the task after one final flush
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            error!(error = %e, "Flusher task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Flush `store` every `interval` on the blocking pool
pub fn spawn_flusher(store: Arc<CompactionStore>, interval: Duration) -> FlusherHandle {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Flusher started");
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Flusher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    flush_blocking(&store).await;
                }
            }
        }

        flush_blocking(&store).await;
    });

    FlusherHandle {
        shutdown_tx: Some(shutdown_tx),
        task,
    }
}

async fn flush_blocking(store: &Arc<CompactionStore>) {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.flush()).await {
        Ok(Ok(count)) => debug!(count, "Periodic flush"),
        Ok(Err(e)) => error!(error = %e, "Periodic flush failed"),
        Err(e) => error!(error = %e, "Flush task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use crumb_core::Persistence;
    use tempfile::TempDir;

    fn long_payload(tag: &str) -> String {
        format!("~{{note:'{}'}}{tag}", "y".repeat(80))
    }

    #[tokio::test]
    async fn test_final_flush_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            CompactionStore::open(StoreConfig::at(temp_dir.path().join("flush.redb"))).unwrap(),
        );
        let handle = spawn_flusher(Arc::clone(&store), Duration::from_secs(3600));

        store.encode(&long_payload("a"), Persistence::Deferred).unwrap();
        assert_eq!(store.stats().unwrap().dirty, 1);

        handle.shutdown().await;
        let stats = store.stats().unwrap();
        assert_eq!(stats.dirty, 0);
        assert_eq!(stats.durable, 1);
    }

    #[tokio::test]
    async fn test_periodic_flush() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            CompactionStore::open(StoreConfig::at(temp_dir.path().join("flush.redb"))).unwrap(),
        );
        let handle = spawn_flusher(Arc::clone(&store), Duration::from_millis(10));

        store.encode(&long_payload("b"), Persistence::Deferred).unwrap();

        let mut flushed = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.stats().unwrap().durable == 1 {
                flushed = true;
                break;
            }
        }
        assert!(flushed);
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
