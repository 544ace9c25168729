//! Pub/Sub Event Aggregator Library
//!
//! Producers publish events to topics; every (topic, event_id) is recorded once
//! and processed to completion exactly once, even with many gates and workers
//! sharing one store and even when a worker dies mid-batch.
//!
//! ## Architecture Modules
//! - **`backlog`**: The shared store. Atomic insert-if-absent, claim-if-pending,
//!   complete-if-leased and reclaim-if-expired, in memory or on Postgres.
//! - **`ingestion`**: The front door. Normalizes and validates publish batches and
//!   records them with dedup accounting.
//! - **`executor`**: The worker pool. Claims batches under a lease, runs the
//!   pluggable processing step and reports outcomes; reclaims abandoned leases.
//! - **`stats`**: Read-only counters, per-topic outcomes and queue depth.
//! - **`config`**: Environment-driven settings.
//! - **`error`**: Error taxonomy and its HTTP mapping.
//! - **`app`**: Wiring of the above into a running instance and its router.

pub mod app;
pub mod backlog;
pub mod config;
pub mod error;
pub mod executor;
pub mod ingestion;
pub mod stats;
