//! Postgres Backlog
//!
//! [`BacklogStore`] on top of a `sqlx` [`PgPool`]. Every coordination point is
//! a single statement or a single transaction, so any number of processes can
//! share one database.
//!
//! ## Schema
//! - `events`: one row per identity, primary key `(topic, event_id)`.
//! - `stats`: named monotonic counters (`received`, `unique_processed`, `duplicate_dropped`).
//! - `topic_stats`: terminal outcomes per topic.
//!
//! ## Concurrency
//! - Inserts use `on conflict do nothing returning`, so a losing writer sees no row.
//! - Claims pick rows with `for update skip locked`, so concurrent claimers never
//!   block on, or select, the same row.
//! - Batches are written in identity order and counters last, which keeps row
//!   locks acquired in one global order across concurrent batches.

use super::types::*;
use super::BacklogStore;
use crate::error::StoreError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    create table if not exists events (
        seq bigserial,
        topic text not null,
        event_id text not null,
        event_ts timestamptz not null,
        ingest_time timestamptz not null default now(),
        source text not null,
        payload jsonb not null,
        processing_state text not null default 'pending',
        lease_owner text null,
        lease_expiry timestamptz null,
        failure_reason text null,
        attempts integer not null default 0,
        primary key (topic, event_id)
    )
    "#,
    "create index if not exists events_state_age_idx on events (processing_state, ingest_time, seq)",
    "create index if not exists events_ingest_time_idx on events (ingest_time desc)",
    r#"
    create table if not exists stats (
        key text primary key,
        val bigint not null default 0
    )
    "#,
    r#"
    insert into stats (key, val) values
        ('received', 0),
        ('unique_processed', 0),
        ('duplicate_dropped', 0)
    on conflict do nothing
    "#,
    r#"
    create table if not exists topic_stats (
        topic text primary key,
        done bigint not null default 0,
        failed bigint not null default 0
    )
    "#,
];

/// Advisory lock held while the schema is created.
const SCHEMA_LOCK_KEY: i64 = 0x5055_4253_5542;

const EVENT_COLUMNS: &str = "seq, topic, event_id, event_ts, ingest_time, source, payload, \
     processing_state, lease_owner, lease_expiry, failure_reason, attempts";

/// Connection settings for [`PgBacklog::connect`].
#[derive(Debug, Clone)]
pub struct PgOptions {
    pub url: String,
    pub max_connections: u32,
    /// Bounds how long an operation waits for a pooled connection.
    pub acquire_timeout: Duration,
}

/// Row shape of the `events` table.
#[derive(Debug, Clone, FromRow)]
struct DbEvent {
    seq: i64,
    topic: String,
    event_id: String,
    event_ts: DateTime<Utc>,
    ingest_time: DateTime<Utc>,
    source: String,
    payload: serde_json::Value,
    processing_state: String,
    lease_owner: Option<String>,
    lease_expiry: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    attempts: i32,
}

impl TryFrom<DbEvent> for EventRecord {
    type Error = StoreError;

    fn try_from(row: DbEvent) -> Result<Self, Self::Error> {
        let processing_state =
            ProcessingState::parse(&row.processing_state).ok_or_else(|| StoreError::CorruptRow {
                key: format!("{}/{}", row.topic, row.event_id),
                reason: format!("unknown processing_state '{}'", row.processing_state),
            })?;

        Ok(EventRecord {
            topic: row.topic,
            event_id: row.event_id,
            timestamp: row.event_ts,
            ingest_time: row.ingest_time,
            source: row.source,
            payload: row.payload,
            processing_state,
            lease_owner: row.lease_owner.map(LeaseOwner),
            lease_expiry: row.lease_expiry,
            failure_reason: row.failure_reason,
            attempts: row.attempts.max(0) as u32,
            seq: row.seq,
        })
    }
}

fn into_records(rows: Vec<DbEvent>) -> Result<Vec<EventRecord>, StoreError> {
    rows.into_iter().map(EventRecord::try_from).collect()
}

/// Durable backlog backed by Postgres.
pub struct PgBacklog {
    pool: PgPool,
}

impl PgBacklog {
    /// Connects and creates the schema if it does not exist yet.
    pub async fn connect(options: &PgOptions) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(&options.url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        Self::create_schema(&pool).await?;
        tracing::info!("Postgres backlog ready");

        Ok(Self { pool })
    }

    async fn create_schema(pool: &PgPool) -> Result<(), StoreError> {
        let mut tx = pool.begin().await?;

        // Concurrent `create ... if not exists` can still collide in the catalog.
        sqlx::query("select pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl BacklogStore for PgBacklog {
    async fn insert_batch(&self, mut events: Vec<NewEvent>) -> Result<IngestSummary, StoreError> {
        events.sort_by(|a, b| a.key.cmp(&b.key));

        let mut tx = self.pool.begin().await?;
        let mut summary = IngestSummary::default();

        for event in events {
            summary.received += 1;

            let created: Option<(i64,)> = sqlx::query_as(
                r#"insert into events (topic, event_id, event_ts, source, payload)
                values ($1, $2, $3, $4, $5)
                on conflict (topic, event_id) do nothing
                returning seq"#,
            )
            .bind(&event.key.topic)
            .bind(&event.key.event_id)
            .bind(event.timestamp)
            .bind(&event.source)
            .bind(&event.payload)
            .fetch_optional(&mut *tx)
            .await?;

            if created.is_some() {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        for (key, by) in [
            ("duplicate_dropped", summary.duplicates),
            ("received", summary.received),
            ("unique_processed", summary.inserted),
        ] {
            if by == 0 {
                continue;
            }
            sqlx::query("update stats set val = val + $1 where key = $2")
                .bind(by as i64)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::trace!(
            received = summary.received,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "batch committed"
        );

        Ok(summary)
    }

    async fn claim(
        &self,
        owner: &LeaseOwner,
        batch_size: usize,
        lease: Duration,
    ) -> Result<Vec<EventRecord>, StoreError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"with picked as (
                select topic, event_id from events
                where processing_state = 'pending'
                order by ingest_time, seq
                limit $1
                for update skip locked
            )
            update events e set
                processing_state = 'processing',
                lease_owner = $2,
                lease_expiry = now() + make_interval(secs => $3),
                attempts = e.attempts + 1
            from picked
            where e.topic = picked.topic and e.event_id = picked.event_id
            returning {}"#,
            EVENT_COLUMNS
                .split(", ")
                .map(|column| format!("e.{}", column.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let rows: Vec<DbEvent> = sqlx::query_as(&sql)
            .bind(batch_size as i64)
            .bind(&owner.0)
            .bind(lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = into_records(rows)?;
        claimed.sort_by(|a, b| (a.ingest_time, a.seq).cmp(&(b.ingest_time, b.seq)));

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
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"update events set
                processing_state = $3,
                failure_reason = $4,
                lease_owner = null,
                lease_expiry = null
            where topic = $1 and event_id = $2
                and processing_state = 'processing'
                and lease_owner = $5"#,
        )
        .bind(&key.topic)
        .bind(&key.event_id)
        .bind(outcome.state().as_str())
        .bind(outcome.reason())
        .bind(&owner.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!(key = %key, owner = %owner, "stale completion ignored");
            return Ok(false);
        }

        let (done, failed) = match outcome {
            Outcome::Done => (1i64, 0i64),
            Outcome::Failed { .. } => (0, 1),
        };

        sqlx::query(
            r#"insert into topic_stats (topic, done, failed) values ($1, $2, $3)
            on conflict (topic) do update set
                done = topic_stats.done + excluded.done,
                failed = topic_stats.failed + excluded.failed"#,
        )
        .bind(&key.topic)
        .bind(done)
        .bind(failed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn extend_lease(&self, owner: &LeaseOwner, lease: Duration) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            r#"update events set lease_expiry = now() + make_interval(secs => $2)
            where lease_owner = $1 and processing_state = 'processing'"#,
        )
        .bind(&owner.0)
        .bind(lease.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected())
    }

    async fn reclaim_expired(&self) -> Result<u64, StoreError> {
        // The predicate is re-evaluated against the latest row version after any
        // concurrent writer commits, so a row completed meanwhile is skipped.
        let updated = sqlx::query(
            r#"update events set
                processing_state = 'pending',
                lease_owner = null,
                lease_expiry = null
            where processing_state = 'processing' and lease_expiry < now()"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected())
    }

    async fn retry_failed(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            r#"update events set processing_state = 'pending', failure_reason = null
            where topic = $1 and event_id = $2 and processing_state = 'failed'"#,
        )
        .bind(&key.topic)
        .bind(&key.event_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    async fn get(&self, key: &IdentityKey) -> Result<Option<EventRecord>, StoreError> {
        let row: Option<DbEvent> = sqlx::query_as(&format!(
            "select {} from events where topic = $1 and event_id = $2",
            EVENT_COLUMNS
        ))
        .bind(&key.topic)
        .bind(&key.event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EventRecord::try_from).transpose()
    }

    async fn list_events(
        &self,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows: Vec<DbEvent> = match topic {
            Some(topic) => {
                sqlx::query_as(&format!(
                    "select {} from events where topic = $1 \
                     order by ingest_time desc, seq desc limit $2",
                    EVENT_COLUMNS
                ))
                .bind(topic)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "select {} from events order by ingest_time desc, seq desc limit $1",
                    EVENT_COLUMNS
                ))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        into_records(rows)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        // One snapshot for all three reads.
        let mut tx = self.pool.begin().await?;
        sqlx::query("set transaction isolation level repeatable read read only")
            .execute(&mut *tx)
            .await?;

        let counter_rows: Vec<(String, i64)> = sqlx::query_as("select key, val from stats")
            .fetch_all(&mut *tx)
            .await?;

        let topic_rows: Vec<(String, i64, i64)> =
            sqlx::query_as("select topic, done, failed from topic_stats order by topic")
                .fetch_all(&mut *tx)
                .await?;

        let state_rows: Vec<(String, i64)> = sqlx::query_as(
            "select processing_state, count(*) from events group by processing_state",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut counters = Counters::default();
        for (key, val) in counter_rows {
            let val = val.max(0) as u64;
            match key.as_str() {
                "received" => counters.received = val,
                "unique_processed" => counters.unique_processed = val,
                "duplicate_dropped" => counters.duplicate_dropped = val,
                other => tracing::warn!(key = other, "ignoring unknown stats counter"),
            }
        }

        let topics: BTreeMap<String, TopicCounts> = topic_rows
            .into_iter()
            .map(|(topic, done, failed)| {
                (
                    topic,
                    TopicCounts {
                        done: done.max(0) as u64,
                        failed: failed.max(0) as u64,
                    },
                )
            })
            .collect();

        let mut queue = QueueCounts::default();
        for (state, count) in state_rows {
            match ProcessingState::parse(&state) {
                Some(state) => queue.bump(state, count.max(0) as u64),
                None => tracing::warn!(state = %state, "ignoring unknown processing_state"),
            }
        }

        Ok(StoreStats {
            counters,
            topics,
            queue,
        })
    }
}
