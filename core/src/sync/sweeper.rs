use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ledger::NoteLedger;
use crate::storage::KvStore;

/// Wall clock in unix milliseconds
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Background eviction of expired optimistic nullifiers
pub struct OptimisticSweeper;

impl OptimisticSweeper {
    /// Run `prune_optimistic_nullifiers` every `interval` under the ledger
    /// lock until `cancel` fires
    pub fn spawn<S: KvStore + 'static>(
        ledger: Arc<Mutex<NoteLedger<S>>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Optimistic sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let ledger = ledger.lock().await;
                        if let Err(e) = ledger.prune_optimistic_nullifiers(unix_time_ms()) {
                            warn!(error = %e, "Optimistic sweep failed");
                        }
                    }
                }
            }
        })
    }
}
