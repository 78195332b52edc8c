// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The devbox agent: an HTTP/WebSocket server that mediates all
//! container-local operations: files, processes, interactive shell
//! sessions, the port monitor, and the log fan-out hub.
//!
//! Exposed as a library so the end-to-end specs can boot a real agent on a
//! loopback port; the `cubbyd` binary is a thin wrapper around
//! [`server::serve`].

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod archive;
pub mod config;
pub mod error;
pub mod files;
pub mod hub;
pub mod ports;
pub mod process;
pub mod server;
pub mod sessions;
pub mod workspace;

pub use config::AgentConfig;
pub use error::ApiError;
pub use server::{build_state, router, serve, serve_with_listener, AppState};
pub use workspace::PathGuard;
