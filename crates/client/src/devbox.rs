// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-devbox client façade.
//!
//! Every agent call follows the same path: resolve the endpoint, borrow a
//! pooled connection, issue the request with the resolved bearer token,
//! decode the envelope, return a typed result or error. Lifecycle
//! operations are proxied to the upstream cluster API, not the agent.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::pool::PoolManager;
use crate::resolver::EndpointResolver;
use crate::retry::with_retry;
use crate::stream::LogStream;
use crate::upstream::{
    ClusterApi, CreateDevboxRequest, DevboxDescriptor, HttpClusterApi, LifecycleAction,
};
use cubby_core::{LogEntry, LogLevel, ProcessId, SessionId};
use cubby_proto::{
    BatchUploadReport, CdRequest, CreateSessionRequest, DeleteFileRequest, DownloadRequest,
    EnvUpdateRequest, ErrorCode, ExecRequest, ExecStarted, ExecSyncResult, FileEntry, KillRequest,
    ListFilesBody, LogsBody, MoveFileRequest, PortsBody, ProcessListBody, ProcessStatusBody,
    ReadFileRequest, ReadFileResult, RenameFileRequest, SessionCreated, SessionExecRequest,
    SessionExecResult, SessionInfoBody, SessionListBody, WriteFileRequest, WriteFileResult,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// SDK entry point: manages devboxes through the cluster API and hands out
/// per-devbox façades.
pub struct CubbyClient {
    cfg: Arc<ClientConfig>,
    api: Arc<dyn ClusterApi>,
    resolver: Arc<EndpointResolver>,
    pools: Arc<PoolManager>,
}

impl CubbyClient {
    pub fn new(cfg: ClientConfig) -> Result<Self, ClientError> {
        let api: Arc<dyn ClusterApi> =
            Arc::new(HttpClusterApi::new(&cfg.api_url, &cfg.api_token, cfg.http_timeout)?);
        Ok(Self::with_api(cfg, api))
    }

    /// Construct over a custom cluster API implementation (tests, embedded
    /// control planes).
    pub fn with_api(cfg: ClientConfig, api: Arc<dyn ClusterApi>) -> Self {
        let resolver = Arc::new(EndpointResolver::new(
            Arc::clone(&api),
            cfg.endpoint_ttl,
            cfg.agent_domain_template.clone(),
        ));
        let pools = Arc::new(PoolManager::new(cfg.pool.clone(), cfg.http_timeout));
        Self { cfg: Arc::new(cfg), api, resolver, pools }
    }

    pub fn devbox(&self, name: impl Into<String>) -> Devbox {
        Devbox {
            name: name.into(),
            cfg: Arc::clone(&self.cfg),
            api: Arc::clone(&self.api),
            resolver: Arc::clone(&self.resolver),
            pools: Arc::clone(&self.pools),
        }
    }

    pub async fn create_devbox(
        &self,
        name: impl Into<String>,
        runtime: Option<String>,
    ) -> Result<Devbox, ClientError> {
        let name = name.into();
        self.api
            .create_devbox(&CreateDevboxRequest { name: name.clone(), runtime })
            .await?;
        Ok(self.devbox(name))
    }

    pub async fn list_devboxes(&self) -> Result<Vec<DevboxDescriptor>, ClientError> {
        self.api.list_devboxes().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteFileOptions {
    pub mode: Option<u32>,
    pub create_dirs: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReadFileOptions {
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub lines: Option<usize>,
    pub levels: Vec<LogLevel>,
}

enum Payload {
    None,
    Json(serde_json::Value),
    Tar(Vec<u8>),
}

/// One devbox, addressed by name.
pub struct Devbox {
    name: String,
    cfg: Arc<ClientConfig>,
    api: Arc<dyn ClusterApi>,
    resolver: Arc<EndpointResolver>,
    pools: Arc<PoolManager>,
}

impl Devbox {
    pub fn name(&self) -> &str {
        &self.name
    }

    async fn try_request(
        &self,
        method: &Method,
        path: &str,
        payload: &Payload,
    ) -> Result<(String, Vec<u8>), ClientError> {
        let endpoint = self.resolver.resolve(&self.name).await?;
        let pool = self.pools.get(&self.name, &endpoint.base_url)?;
        let conn = pool.acquire().await?;

        let url = format!("{}{}", endpoint.base_url, path);
        let mut request = conn.client.request(method.clone(), &url).bearer_auth(&endpoint.token);
        match payload {
            Payload::None => {}
            Payload::Json(value) => request = request.json(value),
            Payload::Tar(bytes) => {
                request = request
                    .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
                    .body(bytes.clone())
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                // A dead transport often means the devbox moved; force a
                // re-resolve before the next attempt.
                self.resolver.forget(&self.name);
                return Err(e.into());
            }
        };
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?;
        Ok((content_type, bytes.to_vec()))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
    ) -> Result<(String, Vec<u8>), ClientError> {
        with_retry(&self.cfg.retry, || self.try_request(&method, path, &payload)).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
    ) -> Result<T, ClientError> {
        let (_, bytes) = self.request(method, path, payload).await?;
        Ok(cubby_proto::decode::<T>(&bytes)?)
    }

    async fn call_ok(
        &self,
        method: Method,
        path: &str,
        payload: Payload,
    ) -> Result<(), ClientError> {
        let (_, bytes) = self.request(method, path, payload).await?;
        cubby_proto::decode_ok(&bytes)?;
        Ok(())
    }

    fn json<T: serde::Serialize>(body: &T) -> Result<Payload, ClientError> {
        Ok(Payload::Json(
            serde_json::to_value(body).map_err(|e| ClientError::Decode(e.to_string()))?,
        ))
    }

    // --- files ---

    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<u64, ClientError> {
        self.write_file_with(path, bytes, &WriteFileOptions::default()).await
    }

    pub async fn write_file_with(
        &self,
        path: &str,
        bytes: &[u8],
        opts: &WriteFileOptions,
    ) -> Result<u64, ClientError> {
        let body = WriteFileRequest {
            path: path.to_string(),
            content: BASE64.encode(bytes),
            encoding: None,
            mode: opts.mode,
            create_dirs: opts.create_dirs,
        };
        let result: WriteFileResult =
            self.call(Method::POST, "/api/v1/files/write", Self::json(&body)?).await?;
        Ok(result.size)
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, ClientError> {
        self.read_file_with(path, &ReadFileOptions::default()).await
    }

    pub async fn read_file_with(
        &self,
        path: &str,
        opts: &ReadFileOptions,
    ) -> Result<Vec<u8>, ClientError> {
        let body = ReadFileRequest {
            path: path.to_string(),
            offset: opts.offset,
            length: opts.length,
        };
        let result: ReadFileResult =
            self.call(Method::POST, "/api/v1/files/read", Self::json(&body)?).await?;
        BASE64
            .decode(result.content)
            .map_err(|e| ClientError::Decode(format!("bad base64 content: {e}")))
    }

    pub async fn delete_file(&self, path: &str, recursive: bool) -> Result<(), ClientError> {
        let body = DeleteFileRequest { path: path.to_string(), recursive };
        self.call_ok(Method::POST, "/api/v1/files/delete", Self::json(&body)?).await
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>, ClientError> {
        let path_query = format!("/api/v1/files/list?path={}", urlencode(path));
        let body: ListFilesBody = self.call(Method::GET, &path_query, Payload::None).await?;
        Ok(body.entries)
    }

    pub async fn move_file(&self, from: &str, to: &str) -> Result<(), ClientError> {
        let body = MoveFileRequest { from: from.to_string(), to: to.to_string() };
        self.call_ok(Method::POST, "/api/v1/files/move", Self::json(&body)?).await
    }

    pub async fn rename_file(&self, path: &str, new_name: &str) -> Result<(), ClientError> {
        let body =
            RenameFileRequest { path: path.to_string(), new_name: new_name.to_string() };
        self.call_ok(Method::POST, "/api/v1/files/rename", Self::json(&body)?).await
    }

    /// Whether `path` exists, via a listing of its parent directory.
    pub async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        let trimmed = path.trim_end_matches('/');
        let (parent, name) = match trimmed.rsplit_once('/') {
            Some((parent, name)) => (if parent.is_empty() { "/" } else { parent }, name),
            None => (".", trimmed),
        };
        match self.list_dir(parent).await {
            Ok(entries) => Ok(entries.iter().any(|e| e.name == name)),
            Err(e)
                if matches!(
                    e.code(),
                    ErrorCode::DirectoryNotFound | ErrorCode::FileNotFound
                ) =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Download the given paths as a single tar stream.
    pub async fn download(&self, paths: &[&str]) -> Result<Vec<u8>, ClientError> {
        let body =
            DownloadRequest { paths: paths.iter().map(|p| p.to_string()).collect() };
        let (content_type, bytes) = self
            .request(Method::POST, "/api/v1/files/download", Self::json(&body)?)
            .await?;
        if content_type.starts_with("application/x-tar") {
            Ok(bytes)
        } else {
            // Validation failed before streaming began: an envelope error.
            cubby_proto::decode_ok(&bytes)?;
            Err(ClientError::Decode("expected tar stream".into()))
        }
    }

    /// Upload a tar archive to be extracted under the workspace root.
    pub async fn upload_archive(
        &self,
        tar_bytes: Vec<u8>,
    ) -> Result<BatchUploadReport, ClientError> {
        self.call(Method::POST, "/api/v1/files/batch-upload", Payload::Tar(tar_bytes)).await
    }

    // --- processes ---

    pub async fn exec(
        &self,
        command: &str,
        args: &[&str],
        opts: &ExecOptions,
    ) -> Result<ExecStarted, ClientError> {
        let body = exec_request(command, args, opts);
        self.call(Method::POST, "/api/v1/process/exec", Self::json(&body)?).await
    }

    pub async fn exec_sync(
        &self,
        command: &str,
        args: &[&str],
        opts: &ExecOptions,
    ) -> Result<ExecSyncResult, ClientError> {
        let body = exec_request(command, args, opts);
        self.call(Method::POST, "/api/v1/process/exec-sync", Self::json(&body)?).await
    }

    pub async fn process_status(&self, id: &ProcessId) -> Result<ProcessStatusBody, ClientError> {
        self.call(Method::GET, &format!("/api/v1/process/{id}/status"), Payload::None).await
    }

    pub async fn kill_process(
        &self,
        id: &ProcessId,
        signal: Option<&str>,
    ) -> Result<(), ClientError> {
        let body = KillRequest { signal: signal.map(str::to_string) };
        self.call_ok(Method::POST, &format!("/api/v1/process/{id}/kill"), Self::json(&body)?)
            .await
    }

    pub async fn process_logs(
        &self,
        id: &ProcessId,
        opts: &LogsOptions,
    ) -> Result<Vec<LogEntry>, ClientError> {
        let path = format!("/api/v1/process/{id}/logs{}", logs_query(opts));
        let body: LogsBody = self.call(Method::GET, &path, Payload::None).await?;
        Ok(body.logs)
    }

    pub async fn list_processes(&self) -> Result<Vec<ProcessStatusBody>, ClientError> {
        let body: ProcessListBody =
            self.call(Method::GET, "/api/v1/process/list", Payload::None).await?;
        Ok(body.processes)
    }

    // --- sessions ---

    pub async fn create_session(
        &self,
        req: &CreateSessionRequest,
    ) -> Result<SessionId, ClientError> {
        let created: SessionCreated =
            self.call(Method::POST, "/api/v1/sessions/create", Self::json(req)?).await?;
        Ok(created.session_id)
    }

    pub async fn session_exec(
        &self,
        id: &SessionId,
        command: &str,
    ) -> Result<SessionExecResult, ClientError> {
        let body = SessionExecRequest { command: command.to_string() };
        self.call(Method::POST, &format!("/api/v1/sessions/{id}/exec"), Self::json(&body)?)
            .await
    }

    pub async fn session_cd(&self, id: &SessionId, path: &str) -> Result<(), ClientError> {
        let body = CdRequest { path: path.to_string() };
        self.call_ok(Method::POST, &format!("/api/v1/sessions/{id}/cd"), Self::json(&body)?)
            .await
    }

    pub async fn session_env(
        &self,
        id: &SessionId,
        env: BTreeMap<String, String>,
    ) -> Result<(), ClientError> {
        let body = EnvUpdateRequest { env };
        self.call_ok(Method::POST, &format!("/api/v1/sessions/{id}/env"), Self::json(&body)?)
            .await
    }

    pub async fn terminate_session(&self, id: &SessionId) -> Result<(), ClientError> {
        self.call_ok(
            Method::POST,
            &format!("/api/v1/sessions/{id}/terminate"),
            Payload::None,
        )
        .await
    }

    pub async fn session_info(&self, id: &SessionId) -> Result<SessionInfoBody, ClientError> {
        self.call(Method::GET, &format!("/api/v1/sessions/{id}"), Payload::None).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfoBody>, ClientError> {
        let body: SessionListBody =
            self.call(Method::GET, "/api/v1/sessions", Payload::None).await?;
        Ok(body.sessions)
    }

    pub async fn session_logs(
        &self,
        id: &SessionId,
        opts: &LogsOptions,
    ) -> Result<Vec<LogEntry>, ClientError> {
        let path = format!("/api/v1/sessions/{id}/logs{}", logs_query(opts));
        let body: LogsBody = self.call(Method::GET, &path, Payload::None).await?;
        Ok(body.logs)
    }

    // --- ports ---

    pub async fn get_ports(&self) -> Result<PortsBody, ClientError> {
        self.call(Method::GET, "/api/v1/ports", Payload::None).await
    }

    // --- log streaming ---

    /// Open a WebSocket log stream against this devbox's agent.
    pub async fn stream_logs(&self) -> Result<LogStream, ClientError> {
        let endpoint = self.resolver.resolve(&self.name).await?;
        LogStream::connect(&endpoint.base_url, &endpoint.token).await
    }

    // --- lifecycle (proxied to the cluster API, not the agent) ---

    pub async fn info(&self) -> Result<DevboxDescriptor, ClientError> {
        self.api.get_devbox(&self.name).await
    }

    pub async fn start(&self) -> Result<(), ClientError> {
        self.api.lifecycle(&self.name, LifecycleAction::Start).await
    }

    pub async fn pause(&self) -> Result<(), ClientError> {
        self.api.lifecycle(&self.name, LifecycleAction::Pause).await
    }

    pub async fn restart(&self) -> Result<(), ClientError> {
        self.api.lifecycle(&self.name, LifecycleAction::Restart).await
    }

    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.api.lifecycle(&self.name, LifecycleAction::Shutdown).await
    }

    pub async fn delete(&self) -> Result<(), ClientError> {
        self.api.delete_devbox(&self.name).await
    }

    /// Poll until the agent endpoint resolves or the deadline passes.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.resolver.forget(&self.name);
            match self.resolver.resolve(&self.name).await {
                Ok(_) => return Ok(()),
                Err(e) if e.code() == ErrorCode::DevboxNotReady => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::Timeout(timeout));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn exec_request(command: &str, args: &[&str], opts: &ExecOptions) -> ExecRequest {
    ExecRequest {
        command: command.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: opts.cwd.clone(),
        env: opts.env.clone(),
        timeout_ms: opts.timeout.map(|t| t.as_millis() as u64),
    }
}

fn logs_query(opts: &LogsOptions) -> String {
    let mut parts = Vec::new();
    if let Some(lines) = opts.lines {
        parts.push(format!("lines={lines}"));
    }
    if !opts.levels.is_empty() {
        let levels: Vec<&str> = opts.levels.iter().map(|l| l.as_str()).collect();
        parts.push(format!("levels={}", levels.join(",")));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("?{}", parts.join("&"))
    }
}

/// Percent-encode the handful of characters that would break a query value.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[path = "devbox_tests.rs"]
mod tests;
