//! procmetrics gateway library entry.
//!
//! Wires the core store and aggregator into an axum HTTP surface: strict
//! YAML config, ops endpoints (`/healthz`, `/readyz`, `/metrics`),
//! request-latency middleware and process hooks. Consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod hooks;
pub mod obs;
pub mod ops;
pub mod router;
