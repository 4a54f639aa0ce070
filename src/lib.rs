#![deny(missing_docs)]

//! Hierarchical map-reduce summarization of long OCR-derived medical documents.

/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Worker counters.
pub mod metrics;
/// Splitting, estimation, reduction and the claim loop.
pub mod processing;
/// Relational document store.
pub mod storage;
/// Text-generation backends and retry policy.
pub mod summarization;
