//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 when draining)
//! - `/metrics` : merged view of every process store, Prometheus text format

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use procmetrics_core::{expose, MetricsError, ScrapeTicket};

use crate::app_state::AppState;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

/// Scrape on the blocking pool, bounded by `server.scrape_timeout_ms`.
///
/// The deadline is enforced inside the scrape as well. When the wait times
/// out first, the scrape is abandoned and deletes no orphan; if it already
/// committed to deleting, its result is awaited and served instead, so a
/// crashed process's last values always reach a client.
pub async fn metrics(State(state): State<AppState>) -> Response {
    let timeout = state.scrape_timeout();
    let deadline = Instant::now() + timeout;
    let ticket = Arc::new(ScrapeTicket::new());

    let scraping = state.clone();
    let scrape_ticket = Arc::clone(&ticket);
    let mut task = tokio::task::spawn_blocking(move || {
        scraping
            .aggregator()
            .scrape_with(Some(deadline), &scrape_ticket)
    });

    let joined = match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) if ticket.abandon() => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "scrape timed out");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("SCRAPE_TIMEOUT: no result within {}ms\n", timeout.as_millis()),
            )
                .into_response();
        }
        // committed just in time; only orphan deletion is left
        Err(_) => task.await,
    };

    match joined {
        Ok(Ok(snapshot)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, expose::CONTENT_TYPE)],
            expose::render(&snapshot),
        )
            .into_response(),
        Ok(Err(e)) => error_response(&e),
        Err(join) => {
            tracing::error!(error = %join, "scrape task failed");
            error_response(&MetricsError::Internal(join.to_string()))
        }
    }
}

fn error_response(e: &MetricsError) -> Response {
    let status = match e {
        MetricsError::ScrapeTimeout { .. } | MetricsError::StorageUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(code = e.code().as_str(), error = %e, "scrape failed");
    (status, format!("{}: {e}\n", e.code().as_str())).into_response()
}
