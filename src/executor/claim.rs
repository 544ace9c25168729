//! Claim Manager
//!
//! Thin layer between workers and the store that owns the lease duration.
//! Every call maps to exactly one atomic store operation.

use crate::backlog::types::{EventRecord, IdentityKey, LeaseOwner, Outcome};
use crate::backlog::BacklogStore;
use crate::error::StoreError;

use std::sync::Arc;
use std::time::Duration;

pub struct ClaimManager {
    store: Arc<dyn BacklogStore>,
    lease_duration: Duration,
}

impl ClaimManager {
    pub fn new(store: Arc<dyn BacklogStore>, lease_duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            store,
            lease_duration,
        })
    }

    /// Takes up to `batch_size` of the oldest pending rows for `owner`.
    ///
    /// An empty result means the backlog has nothing pending right now.
    pub async fn claim(
        &self,
        owner: &LeaseOwner,
        batch_size: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.store
            .claim(owner, batch_size, self.lease_duration)
            .await
    }

    /// Reports the outcome of one claimed row.
    ///
    /// `Ok(false)` means the lease was lost (reclaimed, or already reported)
    /// and the report was discarded.
    pub async fn report(
        &self,
        key: &IdentityKey,
        owner: &LeaseOwner,
        outcome: &Outcome,
    ) -> Result<bool, StoreError> {
        let accepted = self.store.complete(key, owner, outcome).await?;

        if !accepted {
            tracing::debug!(key = %key, owner = %owner, "report discarded, lease no longer held");
        }

        Ok(accepted)
    }

    /// Pushes the expiry of every row still held by `owner`.
    pub async fn renew(&self, owner: &LeaseOwner) -> Result<u64, StoreError> {
        self.store.extend_lease(owner, self.lease_duration).await
    }
}
