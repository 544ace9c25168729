//! Event Executor Module
//!
//! Drains the backlog with a pool of independent workers that coordinate only
//! through the store.
//!
//! ## Architecture Overview
//! The executor follows a **Pull-based** model with **Lease** management:
//! 1. **Claim**: a worker atomically moves the oldest pending rows to
//!    `processing` under a lease token minted for that claim.
//! 2. **Execution**: each row runs through the injected [`registry::EventProcessor`].
//! 3. **Report**: the outcome lands only if the worker still holds the lease,
//!    so late or repeated reports are no-ops.
//! 4. **Reclaim**: leases that expire without a report return to `pending`,
//!    giving at-least-once processing with exactly-once completion.
//!
//! ## Submodules
//! - **`claim`**: Lease-aware wrapper around the store's claim, complete and renew operations.
//! - **`executor`**: Worker pool lifecycle (claim -> run -> report) and shutdown.
//! - **`registry`**: Topic to processing-step dispatch.
//! - **`reclaimer`**: Periodic sweep of expired leases.

pub mod claim;
pub mod executor;
pub mod reclaimer;
pub mod registry;
pub mod types;
