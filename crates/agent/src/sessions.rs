// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: persistent interactive shells.
//!
//! Each session owns a long-lived shell with piped stdin. Commands are
//! dispatched by writing them followed by a sentinel `echo` whose output
//! carries the exit status; the actor reads stdout until the sentinel
//! appears. A per-session actor task consumes a FIFO command queue, so
//! concurrent submissions serialize in submission order and never
//! interleave on the shell's stdin.

use crate::error::ApiError;
use crate::hub::Hub;
use crate::workspace::PathGuard;
use cubby_core::{Clock, LogEntry, LogLevel, LogRing, SessionId, SystemClock};
use cubby_proto::ws::TargetKind;
use cubby_proto::{
    CreateSessionRequest, ErrorBody, ErrorCode, SessionExecResult, SessionInfoBody, SessionState,
};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub shell: String,
    /// Per-command deadline.
    pub exec_timeout: Duration,
    /// Grace between SIGTERM and SIGKILL on terminate.
    pub term_grace: Duration,
    pub ring_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            exec_timeout: Duration::from_secs(30),
            term_grace: Duration::from_secs(3),
            ring_capacity: 1_000,
        }
    }
}

struct SessionMeta {
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    state: SessionState,
    last_active: u64,
}

enum SessionCmd {
    Exec {
        line: String,
        reply: oneshot::Sender<Result<SessionExecResult, ErrorBody>>,
    },
    Cd {
        resolved: PathBuf,
        reply: oneshot::Sender<Result<(), ErrorBody>>,
    },
    Env {
        map: BTreeMap<String, String>,
        reply: oneshot::Sender<Result<(), ErrorBody>>,
    },
}

pub struct SessionHandle {
    pub id: SessionId,
    pub shell: String,
    pub created_at: u64,
    pid: Option<u32>,
    meta: Mutex<SessionMeta>,
    cmd_tx: mpsc::Sender<SessionCmd>,
    ring: Arc<Mutex<LogRing>>,
}

impl SessionHandle {
    pub fn info(&self) -> SessionInfoBody {
        let meta = self.meta.lock();
        SessionInfoBody {
            id: self.id,
            shell: self.shell.clone(),
            cwd: meta.cwd.to_string_lossy().into_owned(),
            env: meta.env.clone(),
            state: meta.state,
            created_at: self.created_at,
            last_active: meta.last_active,
        }
    }

    pub fn state(&self) -> SessionState {
        self.meta.lock().state
    }

    pub fn cwd(&self) -> PathBuf {
        self.meta.lock().cwd.clone()
    }

    pub fn logs(&self, lines: usize, levels: &[LogLevel]) -> Vec<LogEntry> {
        self.ring.lock().tail(lines, levels)
    }

    fn guard_active(&self) -> Result<(), ApiError> {
        match self.state() {
            SessionState::Active => Ok(()),
            _ => Err(ApiError::new(ErrorCode::SessionTerminated, self.id.as_str())
                .with_context("id", self.id.as_str())),
        }
    }
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<SessionHandle>>>,
    guard: PathGuard,
    hub: Arc<Hub>,
    cfg: SessionConfig,
    clock: SystemClock,
}

impl SessionRegistry {
    pub fn new(guard: PathGuard, hub: Arc<Hub>, cfg: SessionConfig) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), guard, hub, cfg, clock: SystemClock }
    }

    fn get(&self, id: &str) -> Result<Arc<SessionHandle>, ApiError> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::new(ErrorCode::SessionNotFound, id).with_context("id", id))
    }

    /// Spawn a shell and start its actor.
    pub fn create(&self, req: &CreateSessionRequest) -> Result<Arc<SessionHandle>, ApiError> {
        let shell = req.shell.clone().unwrap_or_else(|| self.cfg.shell.clone());
        let cwd = match &req.working_dir {
            Some(p) => self.guard.resolve(p)?,
            None => self.guard.root().to_path_buf(),
        };
        let env = req.env.clone().unwrap_or_default();

        let mut cmd = Command::new(&shell);
        cmd.current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        for (key, value) in &env {
            cmd.env(key, value);
        }
        let mut child = cmd.spawn().map_err(|e| {
            ApiError::new(ErrorCode::InternalError, format!("shell spawn failed: {e}"))
                .with_context("shell", &shell)
        })?;

        let id = SessionId::new();
        let now = self.clock.epoch_ms();
        let stdin = child.stdin.take().ok_or_else(|| {
            ApiError::new(ErrorCode::InternalError, "shell stdin unavailable")
        })?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let ring = Arc::new(Mutex::new(LogRing::new(self.cfg.ring_capacity)));
        let handle = Arc::new(SessionHandle {
            id,
            shell,
            created_at: now,
            pid: child.id(),
            meta: Mutex::new(SessionMeta {
                cwd,
                env,
                state: SessionState::Active,
                last_active: now,
            }),
            cmd_tx,
            ring: Arc::clone(&ring),
        });

        self.sessions.lock().insert(id, Arc::clone(&handle));
        tokio::spawn(run_actor(
            Arc::clone(&handle),
            child,
            stdin,
            cmd_rx,
            Arc::clone(&self.hub),
            self.cfg.clone(),
        ));
        Ok(handle)
    }

    /// Execute a command in the session's shell context. Concurrent callers
    /// queue FIFO per session.
    pub async fn exec(&self, id: &str, command: &str) -> Result<SessionExecResult, ApiError> {
        let handle = self.get(id)?;
        handle.guard_active()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .cmd_tx
            .send(SessionCmd::Exec { line: command.to_string(), reply: reply_tx })
            .await
            .map_err(|_| terminated(id))?;
        reply_rx.await.map_err(|_| terminated(id))?.map_err(ApiError::from)
    }

    /// Change the session's working directory; resolved against the current
    /// cwd and the workspace root, then applied to the live shell.
    pub async fn cd(&self, id: &str, path: &str) -> Result<(), ApiError> {
        let handle = self.get(id)?;
        handle.guard_active()?;
        let resolved = self.guard.resolve_at(&handle.cwd(), path)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .cmd_tx
            .send(SessionCmd::Cd { resolved, reply: reply_tx })
            .await
            .map_err(|_| terminated(id))?;
        reply_rx.await.map_err(|_| terminated(id))?.map_err(ApiError::from)
    }

    /// Merge the map into the session env and export into the shell.
    pub async fn update_env(
        &self,
        id: &str,
        map: BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let handle = self.get(id)?;
        handle.guard_active()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .cmd_tx
            .send(SessionCmd::Env { map, reply: reply_tx })
            .await
            .map_err(|_| terminated(id))?;
        reply_rx.await.map_err(|_| terminated(id))?.map_err(ApiError::from)
    }

    /// Terminate: SIGTERM the shell's group, escalate to SIGKILL after the
    /// grace. The record and its logs stay readable.
    pub fn terminate(&self, id: &str) -> Result<(), ApiError> {
        let handle = self.get(id)?;
        {
            let mut meta = handle.meta.lock();
            if meta.state == SessionState::Terminated {
                return Ok(());
            }
            meta.state = SessionState::Terminating;
        }
        let Some(pid) = handle.pid else { return Ok(()) };
        signal_session(pid, Signal::SIGTERM);

        let grace = self.cfg.term_grace;
        let watched = Arc::clone(&handle);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if watched.state() != SessionState::Terminated {
                signal_session(pid, Signal::SIGKILL);
            }
        });
        Ok(())
    }

    pub fn info(&self, id: &str) -> Result<SessionInfoBody, ApiError> {
        Ok(self.get(id)?.info())
    }

    pub fn list(&self) -> Vec<SessionInfoBody> {
        let mut out: Vec<SessionInfoBody> =
            self.sessions.lock().values().map(|s| s.info()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.as_str().cmp(b.id.as_str())));
        out
    }

    pub fn logs(
        &self,
        id: &str,
        lines: usize,
        levels: &[LogLevel],
    ) -> Result<Vec<LogEntry>, ApiError> {
        Ok(self.get(id)?.logs(lines, levels))
    }

    /// Terminate every active session. Shutdown path.
    pub fn shutdown_all(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().keys().copied().collect();
        for id in ids {
            let _ = self.terminate(id.as_str());
        }
    }
}

fn terminated(id: &str) -> ApiError {
    ApiError::new(ErrorCode::SessionTerminated, id).with_context("id", id)
}

fn signal_session(pid: u32, sig: Signal) {
    if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(pid, %sig, error = %e, "session killpg failed");
        }
    }
}

/// Single-quote a value for the shell.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Per-session actor: owns the shell's stdin and serializes commands.
async fn run_actor(
    handle: Arc<SessionHandle>,
    mut child: Child,
    mut stdin: ChildStdin,
    mut cmd_rx: mpsc::Receiver<SessionCmd>,
    hub: Arc<Hub>,
    cfg: SessionConfig,
) {
    let clock = SystemClock;

    // Stdout lines flow to the actor for sentinel scanning; stderr drains in
    // parallel into the ring and the current command's capture buffer.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    let stderr_capture: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, line_tx));
    }
    if let Some(stderr) = child.stderr.take() {
        let handle = Arc::clone(&handle);
        let hub = Arc::clone(&hub);
        let capture = Arc::clone(&stderr_capture);
        tokio::spawn(async move {
            let clock = SystemClock;
            let (tx, mut rx) = mpsc::channel::<String>(256);
            tokio::spawn(pump_lines(stderr, tx));
            while let Some(line) = rx.recv().await {
                capture.lock().push(line.clone());
                let mut ring = handle.ring.lock();
                let entry = ring.push(LogLevel::Stderr, line, clock.epoch_ms());
                hub.publish(TargetKind::Session, handle.id.as_str(), &entry);
            }
        });
    }

    // Reap the shell in the background; the actor observes EOF on stdout.
    let reaper = tokio::spawn(async move { child.wait().await });

    loop {
        let cmd = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
            line = line_rx.recv() => match line {
                // Unsolicited output between commands (background jobs).
                Some(line) => {
                    push_stdout(&handle, &hub, line, clock.epoch_ms());
                    continue;
                }
                // Shell exited while idle.
                None => break,
            },
        };
        handle.meta.lock().last_active = clock.epoch_ms();
        match cmd {
            SessionCmd::Exec { line, reply } => {
                let result = run_command(
                    &handle,
                    &hub,
                    &mut stdin,
                    &mut line_rx,
                    &stderr_capture,
                    &line,
                    cfg.exec_timeout,
                )
                .await;
                let ended = matches!(&result, Err(e) if e.code() == ErrorCode::SessionTerminated);
                let _ = reply.send(result);
                if ended {
                    break;
                }
            }
            SessionCmd::Cd { resolved, reply } => {
                let line = format!("cd {}", sh_quote(&resolved.to_string_lossy()));
                let result = run_command(
                    &handle,
                    &hub,
                    &mut stdin,
                    &mut line_rx,
                    &stderr_capture,
                    &line,
                    cfg.exec_timeout,
                )
                .await;
                let outcome = match result {
                    Ok(res) if res.exit_code == 0 => {
                        handle.meta.lock().cwd = resolved;
                        Ok(())
                    }
                    Ok(res) => Err(ErrorBody::new(
                        ErrorCode::FileOperationError,
                        format!("cd failed: {}", res.stderr.trim()),
                    )),
                    Err(e) => Err(e),
                };
                let ended =
                    matches!(&outcome, Err(e) if e.code() == ErrorCode::SessionTerminated);
                let _ = reply.send(outcome);
                if ended {
                    break;
                }
            }
            SessionCmd::Env { map, reply } => {
                let mut line = String::new();
                for (key, value) in &map {
                    line.push_str(&format!("export {}={}\n", key, sh_quote(value)));
                }
                // Trailing newline is added by run_command.
                let line = line.trim_end().to_string();
                let result = run_command(
                    &handle,
                    &hub,
                    &mut stdin,
                    &mut line_rx,
                    &stderr_capture,
                    &line,
                    cfg.exec_timeout,
                )
                .await;
                let outcome = match result {
                    Ok(_) => {
                        handle.meta.lock().env.extend(map);
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let ended =
                    matches!(&outcome, Err(e) if e.code() == ErrorCode::SessionTerminated);
                let _ = reply.send(outcome);
                if ended {
                    break;
                }
            }
        }
    }

    // Shell gone or registry dropped: mark terminated and log it.
    {
        let mut meta = handle.meta.lock();
        meta.state = SessionState::Terminated;
        meta.last_active = clock.epoch_ms();
    }
    {
        let mut ring = handle.ring.lock();
        let entry = ring.push(LogLevel::System, "session terminated".to_string(), clock.epoch_ms());
        hub.publish(TargetKind::Session, handle.id.as_str(), &entry);
    }
    let _ = reaper.await;
}

/// Write one command plus the sentinel echo, then read stdout until the
/// sentinel line reports the exit status.
async fn run_command(
    handle: &Arc<SessionHandle>,
    hub: &Hub,
    stdin: &mut ChildStdin,
    line_rx: &mut mpsc::Receiver<String>,
    stderr_capture: &Arc<Mutex<Vec<String>>>,
    command: &str,
    timeout: Duration,
) -> Result<SessionExecResult, ErrorBody> {
    let clock = SystemClock;
    let marker = format!("__CUBBY_DONE_{}_", nanoid::nanoid!(10));
    stderr_capture.lock().clear();

    let payload = format!("{command}\necho \"{marker}$?\"\n");
    if stdin.write_all(payload.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
        return Err(ErrorBody::new(ErrorCode::SessionTerminated, handle.id.as_str()));
    }

    let mut stdout_lines: Vec<String> = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    let exit_code = loop {
        let line = match tokio::time::timeout_at(deadline, line_rx.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(ErrorBody::new(ErrorCode::SessionTerminated, handle.id.as_str())),
            Err(_) => {
                return Err(ErrorBody::new(
                    ErrorCode::SessionTimeout,
                    format!("command exceeded {}ms", timeout.as_millis()),
                ))
            }
        };

        if let Some(idx) = line.find(&marker) {
            // Output without a trailing newline lands on the sentinel line.
            let prefix = &line[..idx];
            if !prefix.is_empty() {
                push_stdout(handle, hub, prefix.to_string(), clock.epoch_ms());
                stdout_lines.push(prefix.to_string());
            }
            break line[idx + marker.len()..].trim().parse::<i32>().unwrap_or(-1);
        }

        push_stdout(handle, hub, line.clone(), clock.epoch_ms());
        stdout_lines.push(line);
    };

    // Stderr is drained by a parallel task; a short settle keeps fast
    // commands' stderr attached to their result (best effort).
    tokio::time::sleep(Duration::from_millis(10)).await;
    let stderr_lines = stderr_capture.lock().clone();

    Ok(SessionExecResult {
        stdout: join_lines(&stdout_lines),
        stderr: join_lines(&stderr_lines),
        exit_code,
    })
}

fn push_stdout(handle: &Arc<SessionHandle>, hub: &Hub, line: String, now: u64) {
    let mut ring = handle.ring.lock();
    let entry = ring.push(LogLevel::Stdout, line, now);
    hub.publish(TargetKind::Session, handle.id.as_str(), &entry);
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// Read raw bytes and forward complete lines; the trailing partial flushes
/// on EOF.
async fn pump_lines<R: tokio::io::AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut partial: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        for byte in &buf[..n] {
            if *byte == b'\n' {
                let line = String::from_utf8_lossy(&std::mem::take(&mut partial)).into_owned();
                if tx.send(line).await.is_err() {
                    return;
                }
            } else {
                partial.push(*byte);
            }
        }
    }
    if !partial.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&partial).into_owned()).await;
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
