// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: routing, shared state, and the serve loop.
//!
//! All business responses ride HTTP 200 with the envelope carrying the
//! real status; the middleware chain is panic recovery → trace logging →
//! bearer auth (health endpoints exempt so liveness probes need no
//! credentials).

mod files;
mod health;
mod middleware;
mod process;
mod sessions;
mod ws;

pub use middleware::ApiJson;

use crate::config::AgentConfig;
use crate::files::FileService;
use crate::hub::{Hub, HubConfig};
use crate::ports::PortMonitor;
use crate::process::{ProcessConfig, ProcessRegistry};
use crate::sessions::{SessionConfig, SessionRegistry};
use crate::workspace::PathGuard;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::catch_panic::CatchPanicLayer;

/// Shared context for all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AgentConfig>,
    pub token: Arc<str>,
    pub started_at: Instant,
    pub guard: PathGuard,
    pub files: FileService,
    pub processes: Arc<ProcessRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub ports: Arc<PortMonitor>,
    pub hub: Arc<Hub>,
}

/// Wire the registries together from a resolved configuration.
pub fn build_state(cfg: AgentConfig, token: String) -> AppState {
    let guard = PathGuard::new(&cfg.workspace_path);
    let hub = Arc::new(Hub::new(HubConfig::default()));
    let files = FileService::new(guard.clone(), cfg.max_file_size);
    let processes = Arc::new(ProcessRegistry::new(
        guard.clone(),
        Arc::clone(&hub),
        ProcessConfig {
            ring_capacity: cfg.ring_capacity,
            kill_grace: cfg.kill_grace(),
            gc_grace: cfg.gc_grace(),
            default_sync_timeout: cfg.exec_timeout(),
        },
    ));
    let sessions = Arc::new(SessionRegistry::new(
        guard.clone(),
        Arc::clone(&hub),
        SessionConfig {
            shell: cfg.shell.clone(),
            exec_timeout: cfg.exec_timeout(),
            ring_capacity: cfg.ring_capacity,
            ..SessionConfig::default()
        },
    ));
    let ports = Arc::new(PortMonitor::new(cfg.excluded_ports.clone(), cfg.scan_interval()));

    AppState {
        token: token.into(),
        started_at: Instant::now(),
        guard,
        files,
        processes,
        sessions,
        ports,
        hub,
        cfg: Arc::new(cfg),
    }
}

/// The agent's full route table.
pub fn router(state: AppState) -> Router {
    let body_limit = (state.cfg.max_file_size as usize).saturating_mul(2).max(1 << 20);

    let api = Router::new()
        .route("/files/write", post(files::write))
        .route("/files/read", post(files::read))
        .route("/files/delete", post(files::delete))
        .route("/files/move", post(files::move_path))
        .route("/files/rename", post(files::rename))
        .route("/files/download", post(files::download))
        .route("/files/batch-upload", post(files::batch_upload))
        .route("/files/list", get(files::list))
        .route("/process/list", get(process::list))
        .route("/process/exec", post(process::exec))
        .route("/process/exec-sync", post(process::exec_sync))
        .route("/process/sync-stream", post(process::sync_stream))
        .route("/process/:id/status", get(process::status))
        .route("/process/:id/kill", post(process::kill))
        .route("/process/:id/logs", get(process::logs))
        .route("/sessions", get(sessions::list))
        .route("/sessions/create", post(sessions::create))
        .route("/sessions/:id", get(sessions::info))
        .route("/sessions/:id/env", post(sessions::update_env))
        .route("/sessions/:id/exec", post(sessions::exec))
        .route("/sessions/:id/cd", post(sessions::cd))
        .route("/sessions/:id/terminate", post(sessions::terminate))
        .route("/sessions/:id/logs", get(sessions::logs))
        .route("/ports", get(ports_snapshot));

    let protected = Router::new()
        .nest("/api/v1", api)
        .route("/ws", get(ws::upgrade))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_bearer,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .merge(protected)
        .fallback(middleware::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::trace))
        .layer(CatchPanicLayer::custom(middleware::panic_response))
        .with_state(state)
}

async fn ports_snapshot(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<cubby_proto::Envelope<cubby_proto::PortsBody>> {
    axum::Json(cubby_proto::Envelope::ok(state.ports.get()))
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serve an already-bound listener. The workspace specs use this to run a
/// real agent on an ephemeral loopback port.
pub async fn serve_with_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
) -> Result<(), ServeError> {
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Bind and serve until `shutdown` resolves, then terminate sessions and
/// kill remaining process groups.
pub async fn serve<F>(cfg: AgentConfig, shutdown: F) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    std::fs::create_dir_all(&cfg.workspace_path)?;
    let addr = cfg.listen_addr().map_err(ServeError::Config)?;
    let (token, generated) = cfg.resolve_token();
    if generated {
        // Printed exactly once; clients must present it as a bearer token.
        tracing::info!(%token, "generated agent token");
    }

    let state = build_state(cfg, token);
    Arc::clone(&state.processes).spawn_cleanup(state.cfg.cleanup_interval());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        workspace = %state.cfg.workspace_path.display(),
        "agent listening"
    );

    let app = router(state.clone());
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    tracing::info!("shutting down: terminating sessions and processes");
    state.sessions.shutdown_all();
    state.processes.kill_all();
    Ok(())
}

#[cfg(test)]
#[path = "../server_tests.rs"]
mod tests;
