//! Built-in service metrics: build info and HTTP request latency.
//!
//! Both live in the shared multi-process store like any user metric, so a
//! scrape on any process reports every process's requests.

use std::time::Duration;

use procmetrics_core::descriptor::DEFAULT_BUCKETS;
use procmetrics_core::{GaugeMode, LocalMetricStore, MetricDescriptor, MetricRegistry, Result};

use crate::config::BuildInfo;

pub const BUILD_LABELS: [&str; 5] = [
    "git_short_sha",
    "git_sha",
    "git_branch",
    "git_tag",
    "build_date",
];
pub const LATENCY_LABELS: [&str; 3] = ["path", "method", "http_status"];

pub struct ServiceMetrics {
    build: String,
    request_latency: String,
}

impl ServiceMetrics {
    /// Register `{namespace}_build` and `{namespace}_api_requests_latency_seconds`.
    pub fn register(registry: &MetricRegistry, namespace: &str) -> Result<Self> {
        let build = registry.register(
            MetricDescriptor::gauge(&format!("{namespace}_build"), "Git build information.")
                .with_labels(&BUILD_LABELS)
                .with_mode(GaugeMode::LiveAll),
        )?;
        let latency = registry.register(
            MetricDescriptor::histogram(
                &format!("{namespace}_api_requests_latency_seconds"),
                "Requests latency in seconds.",
                &DEFAULT_BUCKETS,
            )
            .with_labels(&LATENCY_LABELS),
        )?;
        Ok(Self {
            build: build.name.clone(),
            request_latency: latency.name.clone(),
        })
    }

    pub fn build_metric(&self) -> &str {
        &self.build
    }

    pub fn latency_metric(&self) -> &str {
        &self.request_latency
    }

    /// Set this process's build-info series to 1.
    pub fn expose_build_info(&self, store: &LocalMetricStore, build: &BuildInfo) -> Result<()> {
        let short = build.git_short_sha();
        store.set(
            &self.build,
            &[
                short.as_str(),
                build.git_sha.as_str(),
                build.git_branch.as_str(),
                build.git_tag.as_str(),
                build.build_date.as_str(),
            ],
            1.0,
        )
    }

    /// Failures are logged; a request never fails because of its metric.
    pub fn record_request(
        &self,
        store: &LocalMetricStore,
        path: &str,
        method: &str,
        status: u16,
        elapsed: Duration,
    ) {
        let status = status.to_string();
        if let Err(e) = store.observe(
            &self.request_latency,
            &[path, method, status.as_str()],
            elapsed.as_secs_f64(),
        ) {
            tracing::warn!(metric = %self.request_latency, error = %e, "request latency not recorded");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use procmetrics_core::{Aggregator, ProcessId, Role, SampleValue};

    #[test]
    fn names_follow_namespace() {
        let reg = MetricRegistry::new();
        let m = ServiceMetrics::register(&reg, "immuni").unwrap();
        assert_eq!(m.build_metric(), "immuni_build");
        assert_eq!(m.latency_metric(), "immuni_api_requests_latency_seconds");
        assert_eq!(reg.lookup("immuni_build").unwrap().mode, GaugeMode::LiveAll);
    }

    #[test]
    fn build_info_and_latency_land_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let reg = Arc::new(MetricRegistry::new());
        let m = ServiceMetrics::register(&reg, "app").unwrap();
        let store =
            LocalMetricStore::create(dir.path(), ProcessId::current(Role::Api), Arc::clone(&reg))
                .unwrap();

        m.expose_build_info(&store, &BuildInfo::default()).unwrap();
        assert_eq!(
            store
                .value(
                    "app_build",
                    &["no-rele", "no-release", "no-release", "no-release", "no-release"]
                )
                .unwrap(),
            1.0
        );

        m.record_request(&store, "/", "GET", 200, Duration::from_millis(3));
        m.record_request(&store, "/", "GET", 200, Duration::from_secs(20));

        let snap = Aggregator::new(dir.path()).scrape().unwrap();
        match snap.value("app_api_requests_latency_seconds", &["/", "GET", "200"]) {
            Some(SampleValue::Histogram { buckets, count, .. }) => {
                assert_eq!(*count, 2.0);
                // 20s is above the largest default bound
                assert_eq!(buckets.last().map(|b| b.1), Some(1.0));
            }
            other => panic!("unexpected sample: {other:?}"),
        }
    }
}
