//! Axum router wiring.
//!
//! Ops routes plus request-latency tracking. Hosts with their own routes can
//! pass them through [`with_request_metrics`] to get the same histogram.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};

use crate::{app_state::AppState, ops};

pub fn build_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(ops::healthz))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics));
    with_request_metrics(routes, state.clone()).with_state(state)
}

/// Record `{namespace}_api_requests_latency_seconds` for every matched route.
pub fn with_request_metrics<S>(router: Router<S>, state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(middleware::from_fn_with_state(state, track_latency))
}

async fn track_latency(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().as_str().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    state.metrics().record_request(
        state.store(),
        &path,
        &method,
        resp.status().as_u16(),
        started.elapsed(),
    );
    resp
}
