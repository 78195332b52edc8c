// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process handlers, including the SSE streaming exec.

use crate::error::ApiError;
use crate::process::{ProcessRegistry, StreamEvent};
use crate::server::{ApiJson, AppState};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use cubby_core::{LogLevel, ProcessId};
use cubby_proto::{
    Envelope, ErrorCode, ExecRequest, ExecStarted, ExecSyncResult, KillRequest, LogsBody,
    ProcessListBody, ProcessStatusBody,
};
use futures_util::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub async fn list(State(state): State<AppState>) -> ApiResult<ProcessListBody> {
    Ok(Json(Envelope::ok(ProcessListBody { processes: state.processes.list() })))
}

pub async fn exec(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ExecRequest>,
) -> ApiResult<ExecStarted> {
    Ok(Json(Envelope::ok(state.processes.exec(req)?)))
}

pub async fn exec_sync(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ExecRequest>,
) -> ApiResult<ExecSyncResult> {
    Ok(Json(Envelope::ok(state.processes.exec_sync(req).await?)))
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ProcessStatusBody> {
    Ok(Json(Envelope::ok(state.processes.status(&id)?)))
}

pub async fn kill(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<KillRequest>,
) -> ApiResult<()> {
    state.processes.kill(&id, req.signal.as_deref())?;
    Ok(Json(Envelope::ack()))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub(crate) lines: Option<usize>,
    /// Comma-separated level names.
    #[serde(default)]
    pub(crate) levels: Option<String>,
}

pub(crate) fn parse_levels(raw: Option<&str>) -> Result<Vec<LogLevel>, ApiError> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim().parse::<LogLevel>().map_err(|_| {
                ApiError::new(ErrorCode::ValidationError, format!("unknown level {s:?}"))
            })
        })
        .collect()
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<LogsBody> {
    let levels = parse_levels(query.levels.as_deref())?;
    let logs = state.processes.logs(&id, query.lines.unwrap_or(0), &levels)?;
    Ok(Json(Envelope::ok(LogsBody { logs })))
}

/// SSE stream wrapper that kills the process group when the client goes
/// away before the exit event.
pub struct ExecStream {
    rx: mpsc::Receiver<StreamEvent>,
    registry: Arc<ProcessRegistry>,
    id: ProcessId,
    finished: bool,
}

impl Stream for ExecStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let sse = match &event {
                    StreamEvent::Chunk { level, data } => Event::default()
                        .event(level.as_str())
                        .json_data(serde_json::json!({ "data": data })),
                    StreamEvent::Exit { exit_code, duration_ms } => {
                        this.finished = true;
                        Event::default().event("exit").json_data(serde_json::json!({
                            "exitCode": exit_code,
                            "durationMs": duration_ms,
                        }))
                    }
                };
                match sse {
                    Ok(sse) => Poll::Ready(Some(Ok(sse))),
                    // Serialization of these payloads cannot fail; skip if it
                    // ever does rather than tearing the stream down.
                    Err(_) => Poll::Ready(Some(Ok(Event::default().comment("encode error")))),
                }
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ExecStream {
    fn drop(&mut self) {
        if !self.finished {
            // Client cancelled mid-stream: the contract is to kill the group.
            self.registry.kill_silent(self.id.as_str());
        }
    }
}

pub async fn sync_stream(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ExecRequest>,
) -> Result<Sse<ExecStream>, ApiError> {
    let (id, rx) = state.processes.exec_stream(req)?;
    let stream =
        ExecStream { rx, registry: Arc::clone(&state.processes), id, finished: false };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
