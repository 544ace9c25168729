//! Ingestion Gate
//!
//! Accepts batches from producers, validates every event before touching the
//! store, and hands the batch to [`BacklogStore::insert_batch`] as one unit.
//! A batch with a single invalid event is rejected whole.

use crate::backlog::types::{EventRecord, IdentityKey, IngestSummary, NewEvent};
use crate::backlog::BacklogStore;
use crate::error::{FieldError, IngestError, StoreError, ValidationError};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Longest accepted `topic`, `event_id` or `source`.
pub const MAX_FIELD_LEN: usize = 200;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 5000;

/// Flattens the accepted body shapes into a list of raw events.
///
/// - `{"events": [...]}`: batch
/// - `[...]`: batch
/// - `{...}`: single event
pub fn normalize_body(body: Value) -> Result<Vec<Value>, ValidationError> {
    match body {
        Value::Object(mut map) if map.contains_key("events") => match map.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            _ => Err(ValidationError::MalformedBody(
                "'events' must be an array".to_string(),
            )),
        },
        Value::Array(events) => Ok(events),
        Value::Object(map) => Ok(vec![Value::Object(map)]),
        _ => Err(ValidationError::MalformedBody(
            "body must be an object, an array, or {\"events\": [...]}".to_string(),
        )),
    }
}

/// Parses an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn text_field<'a>(
    event: &'a serde_json::Map<String, Value>,
    name: &str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    match event.get(name) {
        None | Some(Value::Null) => {
            errors.push(FieldError::new(name, "field required"));
            None
        }
        Some(Value::String(s)) if s.is_empty() => {
            errors.push(FieldError::new(name, "must not be empty"));
            None
        }
        Some(Value::String(s)) if s.chars().count() > MAX_FIELD_LEN => {
            errors.push(FieldError::new(
                name,
                format!("must be at most {} characters", MAX_FIELD_LEN),
            ));
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            errors.push(FieldError::new(name, "must be a string"));
            None
        }
    }
}

/// Parses the `limit` query parameter of the listing endpoint.
pub fn parse_limit(raw: &str) -> Result<usize, ValidationError> {
    raw.trim()
        .parse::<usize>()
        .ok()
        .filter(|limit| (1..=MAX_LIST_LIMIT).contains(limit))
        .ok_or_else(|| ValidationError::InvalidLimit {
            got: raw.to_string(),
            max: MAX_LIST_LIMIT,
        })
}

/// Validates one raw event, collecting every offending field.
pub fn validate_event(index: usize, raw: &Value) -> Result<NewEvent, ValidationError> {
    let Value::Object(event) = raw else {
        return Err(ValidationError::InvalidEvent {
            index,
            errors: vec![FieldError::new("event", "must be an object")],
        });
    };

    let mut errors = Vec::new();

    let topic = text_field(event, "topic", &mut errors);
    let event_id = text_field(event, "event_id", &mut errors);
    let source = text_field(event, "source", &mut errors);

    let timestamp = match event.get("timestamp") {
        None | Some(Value::Null) => {
            errors.push(FieldError::new("timestamp", "field required"));
            None
        }
        Some(Value::String(s)) => {
            let parsed = parse_timestamp(s);
            if parsed.is_none() {
                errors.push(FieldError::new("timestamp", "must be an ISO-8601 datetime"));
            }
            parsed
        }
        Some(_) => {
            errors.push(FieldError::new("timestamp", "must be a string"));
            None
        }
    };

    let payload = match event.get("payload") {
        None | Some(Value::Null) => Some(Value::Object(Default::default())),
        Some(obj @ Value::Object(_)) => Some(obj.clone()),
        Some(_) => {
            errors.push(FieldError::new("payload", "must be an object"));
            None
        }
    };

    match (topic, event_id, source, timestamp, payload) {
        (Some(topic), Some(event_id), Some(source), Some(timestamp), Some(payload))
            if errors.is_empty() =>
        {
            Ok(NewEvent {
                key: IdentityKey::new(topic, event_id),
                timestamp,
                source: source.to_string(),
                payload,
            })
        }
        _ => Err(ValidationError::InvalidEvent { index, errors }),
    }
}

/// Validates a whole batch. Fails on the first invalid event.
pub fn validate_batch(raw: &[Value], max_batch: usize) -> Result<Vec<NewEvent>, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    if raw.len() > max_batch {
        return Err(ValidationError::BatchTooLarge {
            size: raw.len(),
            max: max_batch,
        });
    }

    raw.iter()
        .enumerate()
        .map(|(index, event)| validate_event(index, event))
        .collect()
}

/// Front door of the backlog.
pub struct IngestionGate {
    store: Arc<dyn BacklogStore>,
    max_batch: usize,
}

impl IngestionGate {
    pub fn new(store: Arc<dyn BacklogStore>, max_batch: usize) -> Arc<Self> {
        Arc::new(Self { store, max_batch })
    }

    /// Validates and records a batch of raw events.
    ///
    /// Nothing reaches the store unless every event is valid. Duplicates are
    /// dropped silently and only show up in the returned summary.
    pub async fn submit(&self, raw: Vec<Value>) -> Result<IngestSummary, IngestError> {
        let events = validate_batch(&raw, self.max_batch)?;
        self.submit_events(events).await
    }

    /// Records a batch whose events are already validated.
    pub async fn submit_events(&self, events: Vec<NewEvent>) -> Result<IngestSummary, IngestError> {
        if events.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        if events.len() > self.max_batch {
            return Err(ValidationError::BatchTooLarge {
                size: events.len(),
                max: self.max_batch,
            }
            .into());
        }

        let summary = self.store.insert_batch(events).await?;

        tracing::debug!(
            received = summary.received,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "batch ingested"
        );

        Ok(summary)
    }

    /// Most recently ingested events, optionally for one topic.
    pub async fn list_events(
        &self,
        topic: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<EventRecord>, IngestError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(ValidationError::InvalidLimit {
                got: limit.to_string(),
                max: MAX_LIST_LIMIT,
            }
            .into());
        }

        let topic = topic.filter(|t| !t.is_empty());
        Ok(self.store.list_events(topic, limit).await?)
    }

    /// Explicitly moves a failed event back to `pending`.
    pub async fn retry_failed(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        let retried = self.store.retry_failed(key).await?;
        if retried {
            tracing::info!(key = %key, "failed event queued for retry");
        }
        Ok(retried)
    }
}
