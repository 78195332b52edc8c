// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Middleware: trace-id logging, bearer auth, panic recovery, and the
//! envelope-aware JSON extractor.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{FromRequest, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use cubby_core::TraceId;
use cubby_proto::ErrorCode;
use serde::de::DeserializeOwned;
use std::time::Instant;

const TRACE_HEADER: &str = "x-trace-id";

/// Generate or propagate `X-Trace-ID`, log the request, and normalize bare
/// 405 responses into the envelope.
pub async fn trace(req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && HeaderValue::from_str(v).is_ok())
        .map(str::to_string)
        .unwrap_or_else(|| TraceId::new().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let mut response = next.run(req).await;

    // Axum answers method mismatches with a bare 405; translate it to the
    // envelope so parsers never need the HTTP status line.
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        response = ApiError::new(ErrorCode::MethodNotAllowed, &path).into_response();
    }

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    tracing::info!(
        %method,
        path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        trace_id,
        "request"
    );
    response
}

/// Bearer-token check for everything outside `/health`.
pub async fn require_bearer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == &*state.token => next.run(req).await,
        Some(_) => ApiError::new(ErrorCode::InvalidToken, "bearer token mismatch").into_response(),
        None => {
            ApiError::new(ErrorCode::Unauthorized, "missing bearer token").into_response()
        }
    }
}

/// Unknown route → `status: 1404` envelope.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::new(ErrorCode::NotFound, uri.path()).with_context("path", uri.path().to_string())
}

/// Uncaught handler panics become a `status: 500 panic` envelope, the only
/// case where the HTTP status line is not 200.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(detail, "handler panicked");
    ApiError::new(ErrorCode::Panic, "").into_response()
}

/// JSON extractor whose rejection is the `1422 invalid_request` envelope.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                Err(ApiError::new(ErrorCode::InvalidRequest, rejection.body_text()))
            }
        }
    }
}
