// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File service handlers. Filesystem work runs on the blocking pool;
//! download streams a tar archive through a bounded channel so memory use
//! stays fixed.

use crate::archive;
use crate::error::ApiError;
use crate::files::WriteOptions;
use crate::server::{ApiJson, AppState};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::Response;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cubby_proto::{
    BatchUploadReport, DeleteFileRequest, DownloadRequest, Envelope, ErrorCode, ListFilesBody,
    MoveFileRequest, ReadFileRequest, ReadFileResult, RenameFileRequest, WriteFileRequest,
    WriteFileResult,
};
use serde::Deserialize;
use std::io::{self, Write};
use tokio::sync::mpsc;

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn join_err(e: tokio::task::JoinError) -> ApiError {
    ApiError::new(ErrorCode::InternalError, format!("blocking task failed: {e}"))
}

fn decode_content(req: &WriteFileRequest) -> Result<Vec<u8>, ApiError> {
    match req.encoding.as_deref() {
        None | Some("base64") => BASE64
            .decode(&req.content)
            .map_err(|e| ApiError::new(ErrorCode::ValidationError, format!("bad base64: {e}"))),
        Some("utf8") | Some("text") => Ok(req.content.clone().into_bytes()),
        Some(other) => Err(ApiError::new(
            ErrorCode::ValidationError,
            format!("unknown encoding {other:?}"),
        )),
    }
}

pub async fn write(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<WriteFileRequest>,
) -> ApiResult<WriteFileResult> {
    let bytes = decode_content(&req)?;
    let opts = WriteOptions { mode: req.mode, create_dirs: req.create_dirs };
    let svc = state.files.clone();
    let path = req.path.clone();
    let size = tokio::task::spawn_blocking(move || svc.write(&path, &bytes, &opts))
        .await
        .map_err(join_err)??;
    Ok(Json(Envelope::ok(WriteFileResult { path: req.path, size })))
}

pub async fn read(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ReadFileRequest>,
) -> ApiResult<ReadFileResult> {
    let svc = state.files.clone();
    let bytes =
        tokio::task::spawn_blocking(move || svc.read(&req.path, req.offset, req.length))
            .await
            .map_err(join_err)??;
    Ok(Json(Envelope::ok(ReadFileResult {
        size: bytes.len() as u64,
        content: BASE64.encode(bytes),
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteFileRequest>,
) -> ApiResult<()> {
    let svc = state.files.clone();
    tokio::task::spawn_blocking(move || svc.delete(&req.path, req.recursive))
        .await
        .map_err(join_err)??;
    Ok(Json(Envelope::ack()))
}

pub async fn move_path(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<MoveFileRequest>,
) -> ApiResult<()> {
    let svc = state.files.clone();
    tokio::task::spawn_blocking(move || svc.rename_path(&req.from, &req.to))
        .await
        .map_err(join_err)??;
    Ok(Json(Envelope::ack()))
}

pub async fn rename(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RenameFileRequest>,
) -> ApiResult<()> {
    let svc = state.files.clone();
    tokio::task::spawn_blocking(move || svc.rename_in_place(&req.path, &req.new_name))
        .await
        .map_err(join_err)??;
    Ok(Json(Envelope::ack()))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    path: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListFilesBody> {
    let path = query.path.unwrap_or_else(|| ".".to_string());
    let svc = state.files.clone();
    let listed = path.clone();
    let entries = tokio::task::spawn_blocking(move || svc.list(&listed))
        .await
        .map_err(join_err)??;
    Ok(Json(Envelope::ok(ListFilesBody { path, entries })))
}

/// Bridges the synchronous tar builder to the response body stream.
struct ChannelWriter {
    tx: mpsc::Sender<Result<Vec<u8>, io::Error>>,
    buf: Vec<u8>,
}

const CHUNK: usize = 64 * 1024;

impl ChannelWriter {
    fn new(tx: mpsc::Sender<Result<Vec<u8>, io::Error>>) -> Self {
        Self { tx, buf: Vec::with_capacity(CHUNK) }
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buf);
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "download aborted"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= CHUNK {
            self.flush_buf()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()
    }
}

pub async fn download(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DownloadRequest>,
) -> Result<Response, ApiError> {
    // Validate everything before the first byte streams, so bad requests
    // still get an envelope.
    let entries = archive::prepare_entries(&state.guard, &req.paths)?;

    let (tx, mut rx) = mpsc::channel::<Result<Vec<u8>, io::Error>>(8);
    tokio::task::spawn_blocking(move || {
        let error_tx = tx.clone();
        if let Err(e) = archive::build(&entries, ChannelWriter::new(tx)) {
            tracing::warn!(error = %e, "download archive aborted");
            let _ = error_tx.blocking_send(Err(e));
        }
    });

    let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-tar")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::new(ErrorCode::InternalError, e))
}

pub async fn batch_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<BatchUploadReport> {
    let guard = state.guard.clone();
    let limit = state.files.max_file_size();
    let report =
        tokio::task::spawn_blocking(move || archive::extract(&guard, &body, limit))
            .await
            .map_err(join_err)??;
    Ok(Json(Envelope::ok(report)))
}
