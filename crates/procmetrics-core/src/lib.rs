//! procmetrics core: multi-process metric recording and scrape-time aggregation.
//!
//! Every process of a service writes its metrics into its own file in a
//! shared directory (`{role}_{pid}.db`). Writers never coordinate; a scrape
//! reads all files, merges them per metric type, and renders the result in
//! the Prometheus text format.
//!
//! ```text
//! MetricRegistry ──> LocalMetricStore ──> {role}_{pid}.db   (write path)
//! Aggregator ──> AggregatedSnapshot ──> expose::render     (read path)
//! LifecycleManager: on_start / on_stop / reap_orphans
//! ```
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. A damaged store
//! file costs that file's contribution, never the scrape.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod aggregate;
pub mod descriptor;
pub mod error;
pub mod expose;
pub mod lifecycle;
pub mod process;
pub mod registry;
pub mod snapshot;
pub mod store;

pub use aggregate::{Aggregator, ScrapeTicket};
pub use descriptor::{GaugeMode, LabelSet, MetricDescriptor, MetricKind};
/// Shared result type.
pub use error::{ErrorCode, MetricsError, Result};
pub use lifecycle::{LifecycleManager, ReapReport};
pub use process::{Liveness, ProcessId, Role, SystemLiveness};
pub use registry::MetricRegistry;
pub use snapshot::{AggregatedSnapshot, MetricFamily, Sample, SampleValue};
pub use store::LocalMetricStore;
