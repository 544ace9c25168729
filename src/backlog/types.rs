use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The (topic, event_id) pair that names one logical event.
///
/// This is both the dedup key and the primary key of the backlog. Ordering is
/// lexicographic by topic, then event id, which is also the order batches are
/// written in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub topic: String,
    pub event_id: String,
}

impl IdentityKey {
    pub fn new(topic: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            event_id: event_id.into(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.event_id)
    }
}

/// Lifecycle state of an event in the backlog.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    /// Recorded and waiting to be claimed.
    Pending,
    /// Claimed by a worker. Accompanied by `lease_owner` and `lease_expiry`.
    Processing,
    /// Terminal. Never changes again.
    Done,
    /// Terminal for the core; only an explicit retry moves it back to `Pending`.
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Pending => "pending",
            ProcessingState::Processing => "processing",
            ProcessingState::Done => "done",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ProcessingState::Pending),
            "processing" => Some(ProcessingState::Processing),
            "done" => Some(ProcessingState::Done),
            "failed" => Some(ProcessingState::Failed),
            _ => None,
        }
    }
}

/// Token identifying one claim made by one worker.
///
/// A fresh token is minted for every `claim` call, so a report carrying a token
/// from an earlier claim never matches a row that has since been reclaimed and
/// claimed again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct LeaseOwner(pub String);

impl LeaseOwner {
    pub fn mint(instance: &str, worker_id: usize) -> Self {
        Self(format!("{}/w{}/{}", instance, worker_id, uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for LeaseOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event that passed validation and is about to be offered to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub key: IdentityKey,
    /// Event time supplied by the producer.
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: serde_json::Value,
}

/// One row of the backlog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub topic: String,
    pub event_id: String,
    /// Event time supplied by the producer, stored verbatim.
    pub timestamp: DateTime<Utc>,
    /// Assigned by the store when the identity was first recorded.
    pub ingest_time: DateTime<Utc>,
    pub source: String,
    pub payload: serde_json::Value,
    pub processing_state: ProcessingState,
    pub lease_owner: Option<LeaseOwner>,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// How many times the row has been claimed.
    pub attempts: u32,
    /// Store-assigned insertion sequence; tie breaker for oldest-first claims.
    #[serde(skip)]
    pub seq: i64,
}

impl EventRecord {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.topic.clone(), self.event_id.clone())
    }
}

/// Terminal outcome reported by a worker for one claimed row.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Failed { reason: String },
}

impl Outcome {
    pub fn state(&self) -> ProcessingState {
        match self {
            Outcome::Done => ProcessingState::Done,
            Outcome::Failed { .. } => ProcessingState::Failed,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Done => None,
            Outcome::Failed { reason } => Some(reason),
        }
    }
}

/// Result of one ingestion batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub received: u64,
    pub inserted: u64,
    pub duplicates: u64,
}

/// Monotonic counters maintained by the store.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counters {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
}

/// Terminal outcomes recorded for one topic.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicCounts {
    pub done: u64,
    pub failed: u64,
}

/// Number of rows currently in each processing state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

impl QueueCounts {
    pub fn bump(&mut self, state: ProcessingState, by: u64) {
        match state {
            ProcessingState::Pending => self.pending += by,
            ProcessingState::Processing => self.processing += by,
            ProcessingState::Done => self.done += by,
            ProcessingState::Failed => self.failed += by,
        }
    }
}

/// Everything the stats view needs, read in one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub counters: Counters,
    pub topics: BTreeMap<String, TopicCounts>,
    pub queue: QueueCounts,
}
