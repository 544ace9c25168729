//! Application Wiring
//!
//! Builds a running aggregator from its parts: a store, a processing step and
//! the executor settings. The store is passed in as an `Arc`, so it outlives
//! any aggregator built on it; starting a second aggregator on the same store
//! behaves like a process restart.


use crate::backlog::memory::MemoryBacklog;
use crate::backlog::postgres::PgBacklog;
use crate::backlog::BacklogStore;
use crate::config::Settings;
use crate::executor::executor::{ExecutorHandle, TaskExecutor};
use crate::executor::registry::EventProcessor;
use crate::executor::types::ExecutorConfig;
use crate::ingestion::gate::IngestionGate;
use crate::ingestion::handlers::{handle_list_events, handle_publish, handle_retry};
use crate::stats::handlers::{handle_health, handle_stats};
use crate::stats::StatsAggregator;

use anyhow::Context;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Opens the store selected by `DATABASE_URL`.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn BacklogStore>> {
    if settings.is_memory() {
        tracing::warn!("using the in-process store, events will not survive a restart");
        return Ok(Arc::new(MemoryBacklog::new()));
    }

    let store = PgBacklog::connect(&settings.pg_options())
        .await
        .context("failed to open the Postgres backlog")?;

    Ok(Arc::new(store))
}

/// HTTP surface over the gate and the stats view.
pub fn build_router(gate: Arc<IngestionGate>, stats: Arc<StatsAggregator>) -> Router {
    Router::new()
        .route("/publish", post(handle_publish))
        .route("/events", get(handle_list_events))
        .route("/events/:topic/:event_id/retry", post(handle_retry))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(Extension(gate))
        .layer(Extension(stats))
        .layer(TraceLayer::new_for_http())
}

/// One running aggregator instance.
pub struct Aggregator {
    gate: Arc<IngestionGate>,
    stats: Arc<StatsAggregator>,
    executor: ExecutorHandle,
}

impl Aggregator {
    /// Starts the worker pool and the reclaimer. Must run inside a Tokio runtime.
    pub fn start(
        store: Arc<dyn BacklogStore>,
        processor: Arc<dyn EventProcessor>,
        config: ExecutorConfig,
        max_publish_batch: usize,
    ) -> Self {
        let gate = IngestionGate::new(store.clone(), max_publish_batch);
        let stats = StatsAggregator::new(store.clone());
        let executor = TaskExecutor::new(store, processor, config).start();

        Self {
            gate,
            stats,
            executor,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.gate.clone(), self.stats.clone())
    }

    /// Stops the workers and waits for in-flight batches. The store stays open.
    pub async fn shutdown(self) {
        self.executor.shutdown().await;
    }
}
