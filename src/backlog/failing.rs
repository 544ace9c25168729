//! Test double that fails chosen operations with a transient store error.

use super::memory::MemoryBacklog;
use super::types::*;
use super::BacklogStore;
use crate::error::StoreError;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a [`MemoryBacklog`]; `insert_batch` and `claim` fail while switched on.
#[derive(Debug, Default)]
pub struct FailingBacklog {
    pub inner: MemoryBacklog,
    pub fail_inserts: AtomicBool,
    pub fail_claims: AtomicBool,
    pub claim_calls: AtomicUsize,
}

fn outage() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl BacklogStore for FailingBacklog {
    async fn insert_batch(&self, events: Vec<NewEvent>) -> Result<IngestSummary, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.insert_batch(events).await
    }

    async fn claim(
        &self,
        owner: &LeaseOwner,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.claim(owner, batch_size, lease).await
    }

    async fn complete(
        &self,
        key: &IdentityKey,
        owner: &LeaseOwner,
        outcome: &Outcome,
    ) -> Result<bool, StoreError> {
        self.inner.complete(key, owner, outcome).await
    }

    async fn extend_lease(&self, owner: &LeaseOwner, lease: Duration) -> Result<u64, StoreError> {
        self.inner.extend_lease(owner, lease).await
    }

    async fn reclaim_expired(&self) -> Result<u64, StoreError> {
        self.inner.reclaim_expired().await
    }

    async fn retry_failed(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        self.inner.retry_failed(key).await
    }

    async fn get(&self, key: &IdentityKey) -> Result<Option<EventRecord>, StoreError> {
        self.inner.get(key).await
    }

    async fn list_events(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        self.inner.list_events(topic, limit).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.inner.stats().await
    }
}
