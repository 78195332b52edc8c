// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The uniform JSON response envelope.
//!
//! `{ "status": <int>, "message": <string?>, ...inline data fields }`
//!
//! Status 0 is success; non-zero values come from the code table. The HTTP
//! status line is 200 for business errors (500 only for panic recovery), so
//! success/failure is decided here and nowhere else.

use crate::code::ErrorCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Envelope status for success.
pub const STATUS_OK: u32 = 0;

/// Success envelope with inline data fields.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub status: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { status: STATUS_OK, message: None, data: Some(data) }
    }
}

impl Envelope<()> {
    /// A bare `{status: 0}` acknowledgement.
    pub fn ack() -> Self {
        Self { status: STATUS_OK, message: None, data: None }
    }
}

/// The error half of the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message} (status {status})")]
pub struct ErrorBody {
    pub status: u32,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorBody {
    /// Build an error body whose message leads with the symbolic code name.
    pub fn new(code: ErrorCode, detail: impl std::fmt::Display) -> Self {
        let detail = detail.to_string();
        let message = if detail.is_empty() {
            code.name().to_string()
        } else {
            format!("{}: {}", code.name(), detail)
        };
        Self { status: code.status(), message, context: BTreeMap::new() }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Recover the symbolic code: the leading message token when present,
    /// otherwise the class implied by the numeric status.
    pub fn code(&self) -> ErrorCode {
        let head = self.message.split(':').next().unwrap_or("").trim();
        ErrorCode::from_name(head)
            .or_else(|| ErrorCode::from_status(self.status))
            .unwrap_or(ErrorCode::InternalError)
    }
}

/// Failures while decoding an envelope.
#[derive(Debug, Error)]
pub enum WireError {
    /// The envelope carried a non-zero status.
    #[error(transparent)]
    Api(ErrorBody),

    /// The body was not a valid envelope at all.
    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Decode an envelope body into `T`, surfacing non-zero statuses as errors.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| WireError::Malformed(e.to_string()))?;
    let status = value
        .get("status")
        .and_then(|s| s.as_u64())
        .ok_or_else(|| WireError::Malformed("missing status".into()))? as u32;
    if status != STATUS_OK {
        let body = serde_json::from_value::<ErrorBody>(value.clone()).unwrap_or(ErrorBody {
            status,
            message: value.get("message").and_then(|m| m.as_str()).unwrap_or("").to_string(),
            context: BTreeMap::new(),
        });
        return Err(WireError::Api(body));
    }
    serde_json::from_slice(bytes).map_err(|e| WireError::Malformed(e.to_string()))
}

/// Decode a data-less acknowledgement envelope.
pub fn decode_ok(bytes: &[u8]) -> Result<(), WireError> {
    decode::<serde_json::Value>(bytes).map(|_| ())
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
