//! Ergonomic observation outbox gateway and aggregation service.
//!
//! Observation files are drained from a local outbox, validated, and
//! forwarded to an aggregation service that keeps only per-(day, metric,
//! bucket) counters; no per-person record is ever stored.

pub mod config;
pub mod outbox;
pub mod schema;
pub mod service;
pub mod store;
pub mod transport;
