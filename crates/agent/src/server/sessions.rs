// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session handlers.

use crate::error::ApiError;
use crate::server::process::{parse_levels, LogsQuery};
use crate::server::{ApiJson, AppState};
use axum::extract::{Path, Query, State};
use axum::Json;
use cubby_proto::{
    CdRequest, CreateSessionRequest, Envelope, EnvUpdateRequest, LogsBody, SessionCreated,
    SessionExecRequest, SessionExecResult, SessionInfoBody, SessionListBody,
};

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub async fn list(State(state): State<AppState>) -> ApiResult<SessionListBody> {
    Ok(Json(Envelope::ok(SessionListBody { sessions: state.sessions.list() })))
}

pub async fn create(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateSessionRequest>,
) -> ApiResult<SessionCreated> {
    let handle = state.sessions.create(&req)?;
    Ok(Json(Envelope::ok(SessionCreated { session_id: handle.id })))
}

pub async fn info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionInfoBody> {
    Ok(Json(Envelope::ok(state.sessions.info(&id)?)))
}

pub async fn exec(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SessionExecRequest>,
) -> ApiResult<SessionExecResult> {
    Ok(Json(Envelope::ok(state.sessions.exec(&id, &req.command).await?)))
}

pub async fn cd(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CdRequest>,
) -> ApiResult<()> {
    state.sessions.cd(&id, &req.path).await?;
    Ok(Json(Envelope::ack()))
}

pub async fn update_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<EnvUpdateRequest>,
) -> ApiResult<()> {
    state.sessions.update_env(&id, req.env).await?;
    Ok(Json(Envelope::ack()))
}

pub async fn terminate(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    state.sessions.terminate(&id)?;
    Ok(Json(Envelope::ack()))
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<LogsBody> {
    let levels = parse_levels(query.levels.as_deref())?;
    let logs = state.sessions.logs(&id, query.lines.unwrap_or(0), &levels)?;
    Ok(Json(Envelope::ok(LogsBody { logs })))
}
