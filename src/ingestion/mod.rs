//! Ingestion Module
//!
//! Entry point for producers. Publish requests are normalized, validated as a
//! whole, and recorded in the backlog with insert-if-absent semantics.
//!
//! ## Workflow
//! 1. **Normalize**: accept `{"events": [...]}`, a bare array, or a single object.
//! 2. **Validate**: reject the whole batch if any event is invalid.
//! 3. **Record**: one `insert_batch` call; duplicates are dropped and counted.

pub mod gate;
pub mod handlers;
pub mod types;
