//! # Observability
//!
//! Prometheus metrics for the reload pipeline. Logging goes through
//! `tracing` and is configured by the binary.

pub mod metrics;
