//! procmetrics: per-process metric stores merged at scrape time.
//!
//! Single dependency for services: the recording and aggregation API
//! (`core`), the HTTP surface and process hooks (`gateway`), and the types
//! most call sites need at the top level.

pub mod core {
    pub use procmetrics_core::*;
}

pub mod gateway {
    pub use procmetrics_gateway::*;
}

pub use procmetrics_core::{
    expose, Aggregator, GaugeMode, LifecycleManager, LocalMetricStore, MetricDescriptor,
    MetricRegistry, MetricsError, Result, Role,
};
pub use procmetrics_gateway::{app_state::AppState, config::ProcmetricsConfig};
