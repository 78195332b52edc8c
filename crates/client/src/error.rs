// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed client errors.
//!
//! Every failure maps onto the shared code table so retry decisions come
//! from [`ErrorCode::retryable`], never from a transient-looking heuristic.

use cubby_proto::{ErrorBody, ErrorCode};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The agent answered with a non-zero envelope status.
    #[error("{0}")]
    Api(ErrorBody),

    /// Transport-level failure before any envelope arrived.
    #[error("connection failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A caller-provided or default deadline elapsed.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Pool at max size with no usable connection.
    #[error("connection pool exhausted for devbox {devbox}")]
    PoolExhausted { devbox: String },

    /// Devbox exists but its agent endpoint is not reachable yet; carries
    /// the current status so callers can poll.
    #[error("devbox {name} not ready (status: {status})")]
    NotReady { name: String, status: String },

    /// The upstream cluster API refused or failed the call.
    #[error("upstream api: {message}")]
    Upstream { message: String, code: ErrorCode },

    /// WebSocket failure while streaming logs.
    #[error("websocket: {0}")]
    Ws(String),

    /// The body was not a valid envelope.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The symbolic code backing this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Api(body) => body.code(),
            ClientError::Transport(e) if e.is_timeout() => ErrorCode::ConnectionTimeout,
            ClientError::Transport(_) => ErrorCode::ConnectionFailed,
            ClientError::Timeout(_) => ErrorCode::OperationTimeout,
            ClientError::PoolExhausted { .. } => ErrorCode::ConnectionPoolExhausted,
            ClientError::NotReady { .. } => ErrorCode::DevboxNotReady,
            ClientError::Upstream { code, .. } => *code,
            ClientError::Ws(_) => ErrorCode::ConnectionFailed,
            ClientError::Decode(_) => ErrorCode::InternalError,
        }
    }

    /// Context map attached to the error, when the agent sent one.
    pub fn context(&self) -> BTreeMap<String, String> {
        match self {
            ClientError::Api(body) => body.context.clone(),
            _ => BTreeMap::new(),
        }
    }

    /// Retry discipline consults the code table only.
    pub fn retryable(&self) -> bool {
        self.code().retryable()
    }
}

impl From<cubby_proto::WireError> for ClientError {
    fn from(e: cubby_proto::WireError) -> Self {
        match e {
            cubby_proto::WireError::Api(body) => ClientError::Api(body),
            cubby_proto::WireError::Malformed(detail) => ClientError::Decode(detail),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
