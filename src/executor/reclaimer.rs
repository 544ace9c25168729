//! Lease Reclaimer
//!
//! Returns rows held by workers that died, hung, or shut down mid-batch to the
//! pending pool once their lease has expired.

use crate::backlog::BacklogStore;
use crate::error::StoreError;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct LeaseReclaimer {
    store: Arc<dyn BacklogStore>,
    interval: Duration,
}

impl LeaseReclaimer {
    pub fn new(store: Arc<dyn BacklogStore>, interval: Duration) -> Arc<Self> {
        Arc::new(Self { store, interval })
    }

    /// One sweep. Returns how many rows went back to `pending`.
    pub async fn sweep_once(&self) -> Result<u64, StoreError> {
        let reclaimed = self.store.reclaim_expired().await?;

        if reclaimed > 0 {
            tracing::info!(reclaimed, "returned expired leases to pending");
        }

        Ok(reclaimed)
    }

    /// Sweeps on a fixed cadence until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(interval_ms = self.interval.as_millis() as u64, "lease reclaimer started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::warn!(error = %err, "lease sweep failed, retrying next tick");
                    }
                }
            }
        }

        tracing::debug!("lease reclaimer stopped");
    }
}
