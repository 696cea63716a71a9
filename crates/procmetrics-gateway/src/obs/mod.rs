//! Service-level metrics recorded through the multi-process store.

pub mod metrics;

pub use metrics::ServiceMetrics;
