//! In-Process Backlog
//!
//! A [`BacklogStore`] that keeps rows in a `DashMap` keyed by identity. It is
//! shared between gates and worker pools through an `Arc`, so it outlives any
//! of them, which is what tests and single-process deployments need.
//!
//! ## Atomicity
//! - Insert-if-absent uses the map's `entry` API (one shard lock).
//! - Claim, complete, reclaim and retry are compare-and-set updates performed
//!   while holding the row's shard lock, re-checking the precondition first.
//! - Operations that move counters take the counters lock *before* touching
//!   rows and release it after, so a stats read never observes rows and
//!   counters out of step. Lock order is always counters, then rows.

use super::types::*;
use super::BacklogStore;
use crate::error::StoreError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tallies {
    counters: Counters,
    topics: BTreeMap<String, TopicCounts>,
}

/// DashMap-backed implementation of [`BacklogStore`].
#[derive(Debug, Default)]
pub struct MemoryBacklog {
    /// Structure: `IdentityKey -> EventRecord`.
    rows: DashMap<IdentityKey, EventRecord>,
    tallies: Mutex<Tallies>,
    next_seq: AtomicI64,
}

impl MemoryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows regardless of state.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Pending rows, oldest first.
    ///
    /// Only a snapshot: a row listed here may be claimed by someone else before
    /// the caller gets to it, so every use re-checks the state under the lock.
    fn pending_keys(&self) -> Vec<IdentityKey> {
        let mut pending: Vec<(DateTime<Utc>, i64, IdentityKey)> = self
            .rows
            .iter()
            .filter(|entry| entry.processing_state == ProcessingState::Pending)
            .map(|entry| (entry.ingest_time, entry.seq, entry.key().clone()))
            .collect();

        pending.sort();
        pending.into_iter().map(|(_, _, key)| key).collect()
    }
}

fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now + chrono::Duration::milliseconds(lease.as_millis().min(i64::MAX as u128) as i64)
}

#[async_trait]
impl BacklogStore for MemoryBacklog {
    async fn insert_batch(&self, events: Vec<NewEvent>) -> Result<IngestSummary, StoreError> {
        let mut tallies = self.tallies.lock();
        let mut summary = IngestSummary::default();

        for event in events {
            summary.received += 1;

            match self.rows.entry(event.key) {
                Entry::Occupied(_) => summary.duplicates += 1,
                Entry::Vacant(slot) => {
                    let key = slot.key().clone();
                    slot.insert(EventRecord {
                        topic: key.topic,
                        event_id: key.event_id,
                        timestamp: event.timestamp,
                        ingest_time: Utc::now(),
                        source: event.source,
                        payload: event.payload,
                        processing_state: ProcessingState::Pending,
                        lease_owner: None,
                        lease_expiry: None,
                        failure_reason: None,
                        attempts: 0,
                        seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    });
                    summary.inserted += 1;
                }
            }
        }

        tallies.counters.received += summary.received;
        tallies.counters.unique_processed += summary.inserted;
        tallies.counters.duplicate_dropped += summary.duplicates;

        Ok(summary)
    }

    async fn claim(
        &self,
        owner: &LeaseOwner,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut claimed = Vec::new();
        if batch_size == 0 {
            return Ok(claimed);
        }

        for key in self.pending_keys() {
            if let Some(mut entry) = self.rows.get_mut(&key) {
                // Another claimer may have won this row since the snapshot.
                if entry.processing_state != ProcessingState::Pending {
                    continue;
                }

                let now = Utc::now();
                entry.processing_state = ProcessingState::Processing;
                entry.lease_owner = Some(owner.clone());
                entry.lease_expiry = Some(lease_expiry(now, lease));
                entry.attempts += 1;
                claimed.push(entry.value().clone());
            }

            if claimed.len() == batch_size {
                break;
            }
        }

        if !claimed.is_empty() {
            tracing::debug!(owner = %owner, count = claimed.len(), "claimed rows");
        }

        Ok(claimed)
    }

    async fn complete(
        &self,
        key: &IdentityKey,
        owner: &LeaseOwner,
        outcome: &Outcome,
    ) -> Result<bool, StoreError> {
        let mut tallies = self.tallies.lock();

        let Some(mut entry) = self.rows.get_mut(key) else {
            return Ok(false);
        };

        if entry.processing_state != ProcessingState::Processing
            || entry.lease_owner.as_ref() != Some(owner)
        {
            tracing::debug!(key = %key, owner = %owner, "stale completion ignored");
            return Ok(false);
        }

        entry.processing_state = outcome.state();
        entry.failure_reason = outcome.reason().map(str::to_string);
        entry.lease_owner = None;
        entry.lease_expiry = None;
        drop(entry);

        let topic = tallies.topics.entry(key.topic.clone()).or_default();
        match outcome {
            Outcome::Done => topic.done += 1,
            Outcome::Failed { .. } => topic.failed += 1,
        }

        Ok(true)
    }

    async fn extend_lease(&self, owner: &LeaseOwner, lease: Duration) -> Result<u64, StoreError> {
        let mut extended = 0;
        let expiry = lease_expiry(Utc::now(), lease);

        for mut entry in self.rows.iter_mut() {
            if entry.processing_state == ProcessingState::Processing
                && entry.lease_owner.as_ref() == Some(owner)
            {
                entry.lease_expiry = Some(expiry);
                extended += 1;
            }
        }

        Ok(extended)
    }

    async fn reclaim_expired(&self) -> Result<u64, StoreError> {
        let expired: Vec<IdentityKey> = self
            .rows
            .iter()
            .filter(|entry| {
                entry.processing_state == ProcessingState::Processing
                    && entry.lease_expiry.map_or(false, |at| at < Utc::now())
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut reclaimed = 0;
        for key in expired {
            if let Some(mut entry) = self.rows.get_mut(&key) {
                // The owner may have reported, or extended, since the scan.
                let still_expired = entry.processing_state == ProcessingState::Processing
                    && entry.lease_expiry.map_or(false, |at| at < Utc::now());
                if !still_expired {
                    continue;
                }

                tracing::debug!(key = %key, owner = ?entry.lease_owner, "reclaiming expired lease");
                entry.processing_state = ProcessingState::Pending;
                entry.lease_owner = None;
                entry.lease_expiry = None;
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    async fn retry_failed(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        match self.rows.get_mut(key) {
            Some(mut entry) if entry.processing_state == ProcessingState::Failed => {
                entry.processing_state = ProcessingState::Pending;
                entry.failure_reason = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &IdentityKey) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.rows.get(key).map(|entry| entry.value().clone()))
    }

    async fn list_events(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let mut events: Vec<EventRecord> = self
            .rows
            .iter()
            .filter(|entry| topic.map_or(true, |t| entry.topic == t))
            .map(|entry| entry.value().clone())
            .collect();

        events.sort_by(|a, b| (b.ingest_time, b.seq).cmp(&(a.ingest_time, a.seq)));
        events.truncate(limit);

        Ok(events)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let tallies = self.tallies.lock();

        let mut queue = QueueCounts::default();
        for entry in self.rows.iter() {
            queue.bump(entry.processing_state, 1);
        }

        Ok(StoreStats {
            counters: tallies.counters,
            topics: tallies.topics.clone(),
            queue,
        })
    }
}
