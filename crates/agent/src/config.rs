// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration.
//!
//! Precedence is flags over environment over defaults; clap's `env`
//! fallback gives exactly that ordering.

use clap::{Parser, ValueEnum};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevelArg {
    Debug,
    Info,
    Warn,
    Error,
    Silent,
}

impl LogLevelArg {
    /// Directive for the tracing env-filter.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevelArg::Debug => "debug",
            LogLevelArg::Info => "info",
            LogLevelArg::Warn => "warn",
            LogLevelArg::Error => "error",
            LogLevelArg::Silent => "off",
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "cubbyd", about = "Devbox agent server", version)]
pub struct AgentConfig {
    /// Listen address, either `host:port` or `:port`.
    #[arg(long, env = "CUBBY_ADDR", default_value = ":9757")]
    pub addr: String,

    /// Workspace root; every user-supplied path must resolve inside it.
    #[arg(long, env = "CUBBY_WORKSPACE_PATH", default_value = "/workspace")]
    pub workspace_path: PathBuf,

    /// Maximum accepted file size in bytes.
    #[arg(long, env = "CUBBY_MAX_FILE_SIZE", default_value_t = 100 * 1024 * 1024)]
    pub max_file_size: u64,

    /// Bearer token; auto-generated and printed once when absent.
    #[arg(long, env = "CUBBY_TOKEN")]
    pub token: Option<String>,

    #[arg(long, env = "CUBBY_LOG_LEVEL", value_enum, default_value = "info")]
    pub log_level: LogLevelArg,

    /// Ports the monitor must never report (e.g. the agent's own).
    #[arg(long, env = "CUBBY_EXCLUDED_PORTS", value_delimiter = ',')]
    pub excluded_ports: Vec<u16>,

    /// Shell used for new sessions.
    #[arg(long, env = "CUBBY_SHELL", default_value = "/bin/bash")]
    pub shell: String,

    // WebSocket parameters
    #[arg(long, env = "CUBBY_WS_PING_PERIOD_SECS", default_value_t = 30)]
    pub ping_period_secs: u64,

    #[arg(long, env = "CUBBY_WS_READ_TIMEOUT_SECS", default_value_t = 60)]
    pub read_timeout_secs: u64,

    #[arg(long, env = "CUBBY_WS_MAX_MESSAGE_SIZE", default_value_t = 512 * 1024)]
    pub max_message_size: usize,

    #[arg(long, env = "CUBBY_HEALTH_CHECK_INTERVAL_SECS", default_value_t = 30)]
    pub health_check_interval_secs: u64,

    /// How often terminal process records are swept.
    #[arg(long, env = "CUBBY_BUFFER_CLEANUP_INTERVAL_SECS", default_value_t = 60)]
    pub buffer_cleanup_interval_secs: u64,

    /// Grace between SIGTERM and SIGKILL escalation, milliseconds.
    #[arg(long, env = "CUBBY_KILL_GRACE_MS", default_value_t = 5_000)]
    pub kill_grace_ms: u64,

    /// How long terminal process records stay readable before reaping.
    #[arg(long, env = "CUBBY_GC_GRACE_SECS", default_value_t = 300)]
    pub gc_grace_secs: u64,

    /// Per-target log ring capacity, lines.
    #[arg(long, env = "CUBBY_RING_CAPACITY", default_value_t = 1_000)]
    pub ring_capacity: usize,

    /// Default deadline for sync execs and session commands, milliseconds.
    #[arg(long, env = "CUBBY_EXEC_TIMEOUT_MS", default_value_t = 30_000)]
    pub exec_timeout_ms: u64,

    /// Port monitor scan interval, milliseconds.
    #[arg(long, env = "CUBBY_SCAN_INTERVAL_MS", default_value_t = 1_000)]
    pub scan_interval_ms: u64,
}

impl AgentConfig {
    /// Programmatic construction with the documented defaults; embedders
    /// and the workspace specs use this instead of argv parsing.
    pub fn with_defaults(workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            addr: ":9757".to_string(),
            workspace_path: workspace_path.into(),
            max_file_size: 100 * 1024 * 1024,
            token: None,
            log_level: LogLevelArg::Info,
            excluded_ports: Vec::new(),
            shell: "/bin/bash".to_string(),
            ping_period_secs: 30,
            read_timeout_secs: 60,
            max_message_size: 512 * 1024,
            health_check_interval_secs: 30,
            buffer_cleanup_interval_secs: 60,
            kill_grace_ms: 5_000,
            gc_grace_secs: 300,
            ring_capacity: 1_000,
            exec_timeout_ms: 30_000,
            scan_interval_ms: 1_000,
        }
    }

    /// Parse `addr` into a socket address; a bare `:port` binds all
    /// interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        if let Some(port) = self.addr.strip_prefix(':') {
            let port: u16 =
                port.parse().map_err(|_| format!("invalid port in addr {:?}", self.addr))?;
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
        }
        self.addr.parse().map_err(|_| format!("invalid addr {:?}", self.addr))
    }

    /// The configured token, or a freshly generated one. The boolean is
    /// true when the token was generated and should be printed once.
    pub fn resolve_token(&self) -> (String, bool) {
        match &self.token {
            Some(t) if !t.is_empty() => (t.clone(), false),
            _ => (generate_token(), true),
        }
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn gc_grace(&self) -> Duration {
        Duration::from_secs(self.gc_grace_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.buffer_cleanup_interval_secs.max(1))
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.max(100))
    }
}

fn generate_token() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
