//! Process hooks for the api, worker and beat roles.
//!
//! - stop: delete this process's store (best effort)
//! - reaper: periodic orphan sweep on the blocking pool; orphans get
//!   `reaper.grace_ms` for a scrape to merge them first
//! - exposition listener: worker/beat processes on one host share a port;
//!   the first to bind serves `/metrics`, the others run without a listener

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use procmetrics_core::{Result, Role};

use crate::app_state::AppState;

/// Process-stop hook. Never fails; a leftover store is reclaimed later as an
/// orphan.
pub fn on_process_stop(state: &AppState) {
    state.lifecycle().on_stop(state.store());
}

/// Spawn the periodic orphan sweep, or nothing when `reaper.interval_ms` is 0.
pub fn spawn_reaper(state: AppState) -> Option<JoinHandle<()>> {
    let every = state.cfg().reaper.interval()?;
    Some(tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        // the first tick completes immediately
        tick.tick().await;
        loop {
            tick.tick().await;
            let sweeping = state.clone();
            match tokio::task::spawn_blocking(move || sweeping.lifecycle().reap_orphans()).await {
                Ok(Ok(report)) if !report.removed.is_empty() || !report.failed.is_empty() => {
                    tracing::info!(
                        removed = report.removed.len(),
                        failed = report.failed.len(),
                        deferred = report.deferred.len(),
                        "orphan sweep done"
                    );
                }
                Ok(Ok(report)) if !report.deferred.is_empty() => {
                    tracing::debug!(deferred = report.deferred.len(), "orphans awaiting a scrape");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(code = e.code().as_str(), error = %e, "orphan sweep failed")
                }
                Err(e) => tracing::warn!(error = %e, "orphan sweep task failed"),
            }
        }
    }))
}

/// Bind the exposition listener for `role`.
///
/// The api role must own its port. Worker and beat processes tolerate
/// `AddrInUse` (a sibling already serves the merged view) and get `None`.
pub async fn bind_listener(role: Role, listen: SocketAddr) -> Result<Option<TcpListener>> {
    match TcpListener::bind(listen).await {
        Ok(listener) => Ok(Some(listener)),
        Err(e) if e.kind() == io::ErrorKind::AddrInUse && role != Role::Api => {
            tracing::info!(%listen, %role, "metrics port taken by a sibling process; not serving");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}
