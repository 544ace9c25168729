//! Stats Module
//!
//! Read-only view over the store's counters, per-topic outcomes and live queue
//! depth. It has no write path of its own: every number comes from the store
//! in one `stats()` call.

pub mod handlers;

#[cfg(test)]
mod tests;

use crate::backlog::types::QueueCounts;
use crate::backlog::BacklogStore;
use crate::error::StoreError;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicStats {
    pub topic: String,
    pub done: u64,
    pub failed: u64,
}

/// Body of `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    /// Sorted by topic name.
    pub topics: Vec<TopicStats>,
    /// `queue.pending` is the queue depth.
    pub queue: QueueCounts,
    /// Since this instance started.
    pub uptime_seconds: u64,
}

pub struct StatsAggregator {
    store: Arc<dyn BacklogStore>,
    started_at: Instant,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn BacklogStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            started_at: Instant::now(),
        })
    }

    pub async fn snapshot(&self) -> Result<StatsResponse, StoreError> {
        let stats = self.store.stats().await?;

        Ok(StatsResponse {
            received: stats.counters.received,
            unique_processed: stats.counters.unique_processed,
            duplicate_dropped: stats.counters.duplicate_dropped,
            topics: stats
                .topics
                .into_iter()
                .map(|(topic, counts)| TopicStats {
                    topic,
                    done: counts.done,
                    failed: counts.failed,
                })
                .collect(),
            queue: stats.queue,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        })
    }
}
