//! Ingestion Data Types
//!
//! Wire shapes of the publish and listing endpoints.

use crate::backlog::types::{EventRecord, IngestSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One event as producers send it.
///
/// Used by clients (see the `publisher` binary). The gate itself validates raw
/// JSON values so it can report every offending field instead of the first one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventInput {
    pub topic: String,
    pub event_id: String,
    /// ISO-8601 / RFC 3339 event time.
    pub timestamp: String,
    pub source: String,
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Response of `POST /publish`.
pub type PublishResponse = IngestSummary;

/// Query string of `GET /events`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub topic: Option<String>,
    /// Kept raw so a non-numeric value is reported like an out-of-range one.
    pub limit: Option<String>,
}

/// One row as returned by `GET /events`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventView {
    pub topic: String,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub source: String,
    pub payload: serde_json::Value,
    pub processing_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub attempts: u32,
}

impl From<EventRecord> for EventView {
    fn from(record: EventRecord) -> Self {
        Self {
            processing_state: record.processing_state.as_str().to_string(),
            topic: record.topic,
            event_id: record.event_id,
            timestamp: record.timestamp,
            ingest_time: record.ingest_time,
            source: record.source,
            payload: record.payload,
            failure_reason: record.failure_reason,
            attempts: record.attempts,
        }
    }
}

/// Response of `POST /events/:topic/:event_id/retry`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryResponse {
    pub retried: bool,
}
