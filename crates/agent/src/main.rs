// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `cubbyd`, the devbox agent binary.

use clap::Parser;
use cubby_agent::{serve, AgentConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(cfg: &AgentConfig) {
    let filter = EnvFilter::try_from_env("CUBBY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, "sigterm handler unavailable");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() {
    let cfg = AgentConfig::parse();
    init_tracing(&cfg);

    if let Err(e) = serve(cfg, shutdown_signal()).await {
        tracing::error!(error = %e, "agent failed");
        eprintln!("cubbyd: {e}");
        std::process::exit(1);
    }
}
