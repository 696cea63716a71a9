//! Shared application state.
//!
//! One per process: the registry, this process's store, and the read side
//! (aggregator) used by `/metrics`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use procmetrics_core::{
    Aggregator, LifecycleManager, LocalMetricStore, MetricRegistry, ProcessId, Result, Role,
};

use crate::config::ProcmetricsConfig;
use crate::obs::ServiceMetrics;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: ProcmetricsConfig,
    lifecycle: LifecycleManager,
    store: LocalMetricStore,
    aggregator: Aggregator,
    metrics: ServiceMetrics,
    draining: AtomicBool,
}

impl AppState {
    /// Register metrics, allocate this process's store in `dir`, and expose
    /// build info. Fails fast on fatal errors (unusable directory, conflicting
    /// descriptors).
    pub fn new(cfg: ProcmetricsConfig, dir: PathBuf, role: Role) -> Result<Self> {
        Self::for_process(cfg, dir, ProcessId::current(role))
    }

    pub fn for_process(cfg: ProcmetricsConfig, dir: PathBuf, process: ProcessId) -> Result<Self> {
        let registry = Arc::new(MetricRegistry::new());
        let metrics = ServiceMetrics::register(&registry, &cfg.service.namespace)?;
        for d in &cfg.metrics {
            registry.register(d.clone())?;
        }

        let lifecycle =
            LifecycleManager::new(dir.clone(), registry).with_reap_grace(cfg.reaper.grace());
        let store = lifecycle.start_process(process)?;
        metrics.expose_build_info(&store, &cfg.service.build)?;

        tracing::info!(
            %process,
            dir = %dir.display(),
            metrics = lifecycle.registry().len(),
            "metrics state ready"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                lifecycle,
                store,
                aggregator: Aggregator::new(dir),
                metrics,
                draining: AtomicBool::new(false),
            }),
        })
    }

    pub fn cfg(&self) -> &ProcmetricsConfig {
        &self.inner.cfg
    }

    pub fn dir(&self) -> &Path {
        self.inner.lifecycle.dir()
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        self.inner.lifecycle.registry()
    }

    pub fn store(&self) -> &LocalMetricStore {
        &self.inner.store
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.inner.lifecycle
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.inner.aggregator
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.inner.metrics
    }

    pub fn scrape_timeout(&self) -> Duration {
        self.inner.cfg.server.scrape_timeout()
    }

    /// Mark draining state.
    pub fn set_draining(&self) {
        self.inner.draining.store(true, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Relaxed)
    }
}
