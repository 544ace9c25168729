//! Backlog Store Module
//!
//! The durable record of every event and its processing state. It is the only
//! shared mutable resource in the system: gates and workers in any number of
//! processes coordinate exclusively through the atomic conditional operations
//! of [`BacklogStore`].
//!
//! ## Coordination Points
//! - **insert-if-absent**: `insert_batch` records a new identity or drops a duplicate.
//! - **claim-if-pending**: `claim` moves the oldest pending rows to `processing` under a lease.
//! - **complete-if-leased**: `complete` records a terminal outcome only for the current lease owner.
//! - **reclaim-if-expired**: `reclaim_expired` returns abandoned leases to the pending pool.
//!
//! Counters move only together with the row mutation that justifies them.
//!
//! ## Submodules
//! - **`types`**: Records, identity keys, outcomes and counter snapshots.
//! - **`memory`**: In-process store on top of `DashMap`.
//! - **`postgres`**: Durable store on top of Postgres (`sqlx`).

pub mod memory;
pub mod postgres;
pub mod types;

#[cfg(test)]
mod tests;

#[cfg(test)]
pub(crate) mod failing;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;
use types::*;

/// Atomic operations every backlog implementation must provide.
///
/// Each method is one indivisible step against the shared store. Callers never
/// combine them into read-then-write sequences.
#[async_trait]
pub trait BacklogStore: Send + Sync {
    /// Inserts each event unless its identity already exists and bumps the
    /// ingestion counters in the same commit.
    ///
    /// Either the whole batch (rows and counters) is committed or nothing is.
    async fn insert_batch(&self, events: Vec<NewEvent>) -> Result<IngestSummary, StoreError>;

    /// Moves up to `batch_size` of the oldest pending rows to `processing`,
    /// leased to `owner` until `now + lease`, and returns them oldest first.
    async fn claim(
        &self,
        owner: &LeaseOwner,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Records a terminal outcome.
    ///
    /// Returns `false` without touching anything when the row is not
    /// `processing` under `owner` (already reported, or reclaimed).
    async fn complete(
        &self,
        key: &IdentityKey,
        owner: &LeaseOwner,
        outcome: &Outcome,
    ) -> Result<bool, StoreError>;

    /// Pushes the expiry of every row still leased to `owner` to `now + lease`.
    async fn extend_lease(&self, owner: &LeaseOwner, lease: Duration) -> Result<u64, StoreError>;

    /// Returns every `processing` row whose lease has expired to `pending`.
    async fn reclaim_expired(&self) -> Result<u64, StoreError>;

    /// Moves a `failed` row back to `pending`. Returns `false` for any other state.
    async fn retry_failed(&self, key: &IdentityKey) -> Result<bool, StoreError>;

    async fn get(&self, key: &IdentityKey) -> Result<Option<EventRecord>, StoreError>;

    /// Most recently ingested rows first, optionally restricted to one topic.
    async fn list_events(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
