// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side error type.
//!
//! Handlers return [`ApiError`]; the response is always the envelope with
//! HTTP 200; the one exception is panic recovery, which replies 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cubby_proto::{ErrorBody, ErrorCode};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(transparent)]
pub struct ApiError(pub ErrorBody);

impl ApiError {
    pub fn new(code: ErrorCode, detail: impl std::fmt::Display) -> Self {
        Self(ErrorBody::new(code, detail))
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0 = self.0.with_context(key, value);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.0.code()
    }
}

impl From<ErrorBody> for ApiError {
    fn from(body: ErrorBody) -> Self {
        Self(body)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let http = if self.code() == ErrorCode::Panic {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        (http, Json(self.0)).into_response()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
