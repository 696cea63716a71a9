//! procmetrics gateway binary.
//!
//! Environment:
//! - `PROCMETRICS_CONFIG`: YAML config path (default `procmetrics.yaml`)
//! - `PROCMETRICS_ROLE`: `api` | `worker` | `beat` (default `api`)
//! - `PROCMETRICS_DIR`: overrides `storage.dir`
//! - `RUST_LOG`: tracing filter

use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use procmetrics_core::{Result, Role};
use procmetrics_gateway::{app_state::AppState, config, hooks, router};

const CONFIG_ENV: &str = "PROCMETRICS_CONFIG";
const ROLE_ENV: &str = "PROCMETRICS_ROLE";
const DIR_ENV: &str = "PROCMETRICS_DIR";
const DEFAULT_CONFIG_PATH: &str = "procmetrics.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.code().as_str(), fatal = e.is_fatal(), error = %e, "procmetrics-gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let cfg = config::load_from_file(&path)?;
    let dir = cfg.storage.resolve_dir(env::var(DIR_ENV).ok())?;
    let role = env::var(ROLE_ENV)
        .ok()
        .map(|r| r.parse::<Role>())
        .transpose()?
        .unwrap_or(Role::Api);
    let listen = cfg.server.listen_addr()?;

    let state = AppState::new(cfg, dir, role)?;
    let reaper = hooks::spawn_reaper(state.clone());

    let served = serve(&state, role, listen).await;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    hooks::on_process_stop(&state);
    served
}

async fn serve(state: &AppState, role: Role, listen: SocketAddr) -> Result<()> {
    let Some(listener) = hooks::bind_listener(role, listen).await? else {
        shutdown_signal(state.clone()).await;
        return Ok(());
    };

    tracing::info!(%listen, %role, "procmetrics-gateway starting");
    axum::serve(listener, router::build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    state.set_draining();
    tracing::info!("signal received, starting graceful shutdown");
}
