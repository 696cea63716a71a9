//! Store lifecycle: allocate at process start, delete at graceful stop,
//! reclaim stores of processes that died without stopping.
//!
//! A scrape merges an orphan before deleting it. The periodic sweep cannot
//! merge, so it leaves a dead process's store alone until it has seen that
//! store dead for a full grace period, giving scrapes the first chance at it.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{MetricsError, Result};
use crate::process::{Liveness, ProcessId, Role, SystemLiveness};
use crate::registry::MetricRegistry;
use crate::store::{list_stores, list_temp_files, remove_store, LocalMetricStore};

/// How long the sweep waits after first finding a store's process dead.
/// Keep it above the scrape interval.
pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(120);

/// Outcome of one orphan sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Orphans still inside their grace period.
    pub deferred: Vec<PathBuf>,
}

pub struct LifecycleManager {
    dir: PathBuf,
    registry: Arc<MetricRegistry>,
    liveness: Arc<dyn Liveness>,
    reap_grace: Duration,
    /// First sweep that found each orphan.
    sightings: Mutex<HashMap<PathBuf, Instant>>,
}

impl LifecycleManager {
    pub fn new(dir: impl Into<PathBuf>, registry: Arc<MetricRegistry>) -> Self {
        Self {
            dir: dir.into(),
            registry,
            liveness: Arc::new(SystemLiveness),
            reap_grace: DEFAULT_REAP_GRACE,
            sightings: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn Liveness>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_reap_grace(mut self, grace: Duration) -> Self {
        self.reap_grace = grace;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Fail with `StorageUnavailable` unless the directory exists and accepts
    /// new files.
    pub fn check_storage(&self) -> Result<()> {
        let meta = fs::metadata(&self.dir).map_err(|e| {
            MetricsError::StorageUnavailable(format!("{}: {e}", self.dir.display()))
        })?;
        if !meta.is_dir() {
            return Err(MetricsError::StorageUnavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        let probe = self.dir.join(format!(".probe_{}", std::process::id()));
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&probe)
            .map_err(|e| {
                MetricsError::StorageUnavailable(format!(
                    "{} not writable: {e}",
                    self.dir.display()
                ))
            })?;
        if let Err(e) = fs::remove_file(&probe) {
            tracing::warn!(path = %probe.display(), error = %e, "failed to remove storage probe");
        }
        Ok(())
    }

    /// Process-start hook: allocate this process's store.
    pub fn on_start(&self, role: Role) -> Result<LocalMetricStore> {
        self.start_process(ProcessId::current(role))
    }

    /// Allocate the store of an explicit process (hosts that spawn and track
    /// their own children).
    pub fn start_process(&self, process: ProcessId) -> Result<LocalMetricStore> {
        self.check_storage()?;
        let store = LocalMetricStore::create(&self.dir, process, Arc::clone(&self.registry))
            .map_err(|e| match e {
                MetricsError::Io(io) => {
                    MetricsError::StorageUnavailable(format!("{}: {io}", self.dir.display()))
                }
                other => other,
            })?;
        tracing::info!(%process, path = %store.path().display(), "metrics store allocated");
        Ok(store)
    }

    /// Process-stop hook: delete the caller's store. Failures are logged only;
    /// a leftover file is reclaimed later as an orphan.
    pub fn on_stop(&self, store: &LocalMetricStore) {
        let process = store.process();
        match remove_store(store.path()) {
            Ok(_) => tracing::info!(%process, "metrics store removed"),
            Err(e) => {
                tracing::warn!(%process, path = %store.path().display(), error = %e, "failed to remove metrics store")
            }
        }
    }

    /// Delete stores whose owning process no longer exists, once this
    /// manager has seen them dead for the grace period, plus temp files
    /// dead processes left mid-growth. Safe to run concurrently with scrapes
    /// and other reapers.
    pub fn reap_orphans(&self) -> Result<ReapReport> {
        let own_pid = std::process::id();
        let now = Instant::now();
        let mut report = ReapReport::default();
        let mut sightings = self
            .sightings
            .lock()
            .map_err(|_| MetricsError::Internal("reaper sightings lock poisoned".into()))?;
        let mut still_dead = HashMap::new();

        for (process, path) in list_stores(&self.dir)? {
            if process.pid == own_pid || self.liveness.is_alive(process.pid) {
                continue;
            }
            let first_seen = sightings.get(&path).copied();
            if first_seen.map_or(true, |t| now.duration_since(t) < self.reap_grace) {
                tracing::debug!(%process, path = %path.display(), "orphan left for a scrape to merge");
                still_dead.insert(path.clone(), first_seen.unwrap_or(now));
                report.deferred.push(path);
                continue;
            }
            reclaim(process, path, &mut report);
        }
        // forget stores a scrape or another reaper has since reclaimed
        *sightings = still_dead;
        drop(sightings);

        for (process, path) in list_temp_files(&self.dir)? {
            if process.pid != own_pid && !self.liveness.is_alive(process.pid) {
                reclaim(process, path, &mut report);
            }
        }
        Ok(report)
    }
}

fn reclaim(process: ProcessId, path: PathBuf, report: &mut ReapReport) {
    match remove_store(&path) {
        Ok(true) => {
            tracing::info!(%process, path = %path.display(), "reaped orphaned store");
            report.removed.push(path);
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(%process, path = %path.display(), error = %e, "failed to reap orphaned store");
            report.failed.push(path);
        }
    }
}
