// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client runtime for the cubby control plane.
//!
//! [`CubbyClient`] talks to the upstream cluster API to manage devboxes;
//! [`Devbox`] is the per-devbox façade that resolves the agent endpoint
//! lazily, borrows pooled health-checked connections, and translates calls
//! into agent requests with retry/backoff over the shared error taxonomy.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod devbox;
pub mod error;
pub mod pool;
pub mod resolver;
pub mod retry;
pub mod stream;
pub mod upstream;

pub use config::{ClientConfig, PoolConfig};
pub use devbox::{
    CubbyClient, Devbox, ExecOptions, LogsOptions, ReadFileOptions, WriteFileOptions,
};
pub use error::ClientError;
pub use pool::{
    ConnectionPool, ConnectionStats, HandoutStrategy, HealthStatus, PoolManager, PooledConnection,
};
pub use resolver::{Endpoint, EndpointResolver};
pub use retry::{with_retry, RetryPolicy};
pub use stream::LogStream;
pub use upstream::{
    AgentServerInfo, ClusterApi, CreateDevboxRequest, DevboxDescriptor, DevboxPort,
    HttpClusterApi, LifecycleAction,
};
