// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process registry: spawning, tracking, and killing child processes.
//!
//! Children run in their own process group so kill and cancellation reach
//! the whole tree. Stdout/stderr are pumped line-by-line into the record's
//! ring (which assigns sequences) and fanned out through the hub; the ring
//! lock is held across the hub publish so per-target delivery order matches
//! sequence order.

use crate::error::ApiError;
use crate::hub::Hub;
use crate::workspace::PathGuard;
use cubby_core::{Clock, LogEntry, LogLevel, LogRing, ProcessId, SystemClock};
use cubby_proto::ws::TargetKind;
use cubby_proto::{
    ErrorCode, ExecRequest, ExecStarted, ExecSyncResult, ProcessState, ProcessStatusBody,
    ResourceUsage, TIMEOUT_EXIT_CODE,
};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub ring_capacity: usize,
    /// Grace between a requested signal and SIGKILL escalation.
    pub kill_grace: Duration,
    /// How long terminal records stay readable before reaping.
    pub gc_grace: Duration,
    pub default_sync_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1_000,
            kill_grace: Duration::from_secs(5),
            gc_grace: Duration::from_secs(300),
            default_sync_timeout: Duration::from_secs(30),
        }
    }
}

struct StateCell {
    state: ProcessState,
    pid: Option<u32>,
    exit_code: Option<i32>,
    terminal_at: Option<Instant>,
    kill_requested: bool,
}

pub struct ProcessRecord {
    pub id: ProcessId,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub started_at: u64,
    state: Mutex<StateCell>,
    ring: Mutex<LogRing>,
    last_active: AtomicU64,
}

impl ProcessRecord {
    fn new(id: ProcessId, req: &ExecRequest, cwd: PathBuf, now: u64, ring_capacity: usize) -> Self {
        Self {
            id,
            command: req.command.clone(),
            args: req.args.clone(),
            cwd,
            started_at: now,
            state: Mutex::new(StateCell {
                state: ProcessState::Running,
                pid: None,
                exit_code: None,
                terminal_at: None,
                kill_requested: false,
            }),
            ring: Mutex::new(LogRing::new(ring_capacity)),
            last_active: AtomicU64::new(now),
        }
    }

    /// Append a line and fan it out. The ring lock is held across the
    /// publish so subscribers observe sequence order.
    fn push_line(&self, hub: &Hub, level: LogLevel, content: String, now: u64) {
        self.last_active.store(now, Ordering::Relaxed);
        let mut ring = self.ring.lock();
        let entry = ring.push(level, content, now);
        hub.publish(TargetKind::Process, self.id.as_str(), &entry);
    }

    fn finish(&self, state: ProcessState, exit_code: Option<i32>, now: u64) {
        let mut cell = self.state.lock();
        if cell.state.is_terminal() {
            return;
        }
        cell.state = state;
        cell.exit_code = exit_code;
        cell.terminal_at = Some(Instant::now());
        self.last_active.store(now, Ordering::Relaxed);
    }

    pub fn state(&self) -> ProcessState {
        self.state.lock().state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.lock().exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.lock().pid
    }

    pub fn status_body(&self) -> ProcessStatusBody {
        let cell = self.state.lock();
        let resources = match (cell.state, cell.pid) {
            (ProcessState::Running, Some(pid)) => read_resources(pid),
            _ => None,
        };
        ProcessStatusBody {
            id: self.id,
            pid: cell.pid,
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.to_string_lossy().into_owned(),
            state: cell.state,
            exit_code: cell.exit_code,
            started_at: self.started_at,
            last_active: self.last_active.load(Ordering::Relaxed),
            resources,
        }
    }

    pub fn logs(&self, lines: usize, levels: &[LogLevel]) -> Vec<LogEntry> {
        self.ring.lock().tail(lines, levels)
    }
}

/// Incremental output of a streaming exec.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk { level: LogLevel, data: String },
    Exit { exit_code: i32, duration_ms: u64 },
}

pub struct ProcessRegistry {
    procs: Mutex<HashMap<ProcessId, Arc<ProcessRecord>>>,
    guard: PathGuard,
    hub: Arc<Hub>,
    cfg: ProcessConfig,
    clock: SystemClock,
}

impl ProcessRegistry {
    pub fn new(guard: PathGuard, hub: Arc<Hub>, cfg: ProcessConfig) -> Self {
        Self { procs: Mutex::new(HashMap::new()), guard, hub, cfg, clock: SystemClock }
    }

    fn get(&self, id: &str) -> Result<Arc<ProcessRecord>, ApiError> {
        self.procs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::new(ErrorCode::ProcessNotFound, id).with_context("id", id))
    }

    /// Spawn the child and insert its record. On spawn failure the record
    /// still lands (state `failed-to-start`) so the failure is observable
    /// via `list`/`status`.
    fn spawn(&self, req: &ExecRequest) -> Result<(Arc<ProcessRecord>, Child), ApiError> {
        if req.command.is_empty() {
            return Err(ApiError::new(ErrorCode::ValidationError, "empty command"));
        }
        let cwd = match &req.cwd {
            Some(p) => self.guard.resolve(p)?,
            None => self.guard.root().to_path_buf(),
        };
        let now = self.clock.epoch_ms();
        let id = ProcessId::new();
        let record = Arc::new(ProcessRecord::new(id, req, cwd.clone(), now, self.cfg.ring_capacity));

        let mut cmd = Command::new(&req.command);
        cmd.args(&req.args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(env) = &req.env {
            cmd.envs(env.clone());
        }

        match cmd.spawn() {
            Ok(child) => {
                record.state.lock().pid = child.id();
                self.procs.lock().insert(id, Arc::clone(&record));
                Ok((record, child))
            }
            Err(e) => {
                record.finish(ProcessState::FailedToStart, None, now);
                record.push_line(&self.hub, LogLevel::System, format!("spawn failed: {e}"), now);
                self.procs.lock().insert(id, Arc::clone(&record));
                Err(spawn_error(&req.command, &e))
            }
        }
    }

    fn attach_pumps(
        &self,
        record: &Arc<ProcessRecord>,
        child: &mut Child,
        capture: Option<(Arc<Mutex<Vec<u8>>>, Arc<Mutex<Vec<u8>>>)>,
        chunks: Option<mpsc::Sender<StreamEvent>>,
    ) -> Vec<JoinHandle<()>> {
        let (out_cap, err_cap) = match capture {
            Some((o, e)) => (Some(o), Some(e)),
            None => (None, None),
        };
        let mut handles = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            handles.push(tokio::spawn(pump(
                stdout,
                LogLevel::Stdout,
                Arc::clone(record),
                Arc::clone(&self.hub),
                out_cap,
                chunks.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            handles.push(tokio::spawn(pump(
                stderr,
                LogLevel::Stderr,
                Arc::clone(record),
                Arc::clone(&self.hub),
                err_cap,
                chunks,
            )));
        }
        handles
    }

    /// Async exec: spawn and return immediately.
    pub fn exec(&self, req: ExecRequest) -> Result<ExecStarted, ApiError> {
        let (record, mut child) = self.spawn(&req)?;
        let pid = record.pid().unwrap_or(0);
        let pumps = self.attach_pumps(&record, &mut child, None, None);

        let hub = Arc::clone(&self.hub);
        let monitored = Arc::clone(&record);
        tokio::spawn(async move {
            let status = child.wait().await;
            for pump in pumps {
                let _ = pump.await;
            }
            observe_exit(&monitored, &hub, status);
        });

        Ok(ExecStarted { id: record.id, pid })
    }

    /// Sync exec: spawn, wait until exit or deadline, return captured
    /// output. On timeout the process group is killed, the record is marked
    /// `killed`, and the exit code is the timeout sentinel.
    pub async fn exec_sync(&self, req: ExecRequest) -> Result<ExecSyncResult, ApiError> {
        let deadline =
            req.timeout_ms.map(Duration::from_millis).unwrap_or(self.cfg.default_sync_timeout);
        let (record, mut child) = self.spawn(&req)?;
        let pid = record.pid().unwrap_or(0);
        let out_cap = Arc::new(Mutex::new(Vec::new()));
        let err_cap = Arc::new(Mutex::new(Vec::new()));
        let pumps = self.attach_pumps(
            &record,
            &mut child,
            Some((Arc::clone(&out_cap), Arc::clone(&err_cap))),
            None,
        );

        let start = Instant::now();
        let exit_code = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => {
                for pump in pumps {
                    let _ = pump.await;
                }
                observe_exit(&record, &self.hub, status)
            }
            Err(_) => {
                signal_group(pid, Signal::SIGKILL);
                let _ = child.wait().await;
                for pump in pumps {
                    let _ = pump.await;
                }
                record.finish(
                    ProcessState::Killed,
                    Some(TIMEOUT_EXIT_CODE),
                    self.clock.epoch_ms(),
                );
                TIMEOUT_EXIT_CODE
            }
        };

        let stdout = String::from_utf8_lossy(&out_cap.lock()).into_owned();
        let stderr = String::from_utf8_lossy(&err_cap.lock()).into_owned();
        Ok(ExecSyncResult {
            exit_code,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
            pid,
        })
    }

    /// Streaming exec: spawn and emit incremental chunks, terminated by an
    /// exit event. Dropping the receiver does not kill the child; callers
    /// cancel via [`ProcessRegistry::kill_silent`].
    pub fn exec_stream(
        &self,
        req: ExecRequest,
    ) -> Result<(ProcessId, mpsc::Receiver<StreamEvent>), ApiError> {
        let deadline =
            req.timeout_ms.map(Duration::from_millis).unwrap_or(self.cfg.default_sync_timeout);
        let (record, mut child) = self.spawn(&req)?;
        let pid = record.pid().unwrap_or(0);
        let (tx, rx) = mpsc::channel(64);
        let pumps = self.attach_pumps(&record, &mut child, None, Some(tx.clone()));

        let hub = Arc::clone(&self.hub);
        let clock = self.clock.clone();
        let monitored = Arc::clone(&record);
        tokio::spawn(async move {
            let start = Instant::now();
            let exit_code = match tokio::time::timeout(deadline, child.wait()).await {
                Ok(status) => {
                    for pump in pumps {
                        let _ = pump.await;
                    }
                    observe_exit(&monitored, &hub, status)
                }
                Err(_) => {
                    signal_group(pid, Signal::SIGKILL);
                    let _ = child.wait().await;
                    for pump in pumps {
                        let _ = pump.await;
                    }
                    monitored.finish(
                        ProcessState::Killed,
                        Some(TIMEOUT_EXIT_CODE),
                        clock.epoch_ms(),
                    );
                    TIMEOUT_EXIT_CODE
                }
            };
            let _ = tx
                .send(StreamEvent::Exit {
                    exit_code,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
                .await;
        });

        Ok((record.id, rx))
    }

    pub fn status(&self, id: &str) -> Result<ProcessStatusBody, ApiError> {
        Ok(self.get(id)?.status_body())
    }

    pub fn list(&self) -> Vec<ProcessStatusBody> {
        let mut out: Vec<ProcessStatusBody> =
            self.procs.lock().values().map(|r| r.status_body()).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.as_str().cmp(b.id.as_str())));
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

    /// Send `signal` (default SIGTERM) to the process group, escalating to
    /// SIGKILL after the configured grace if it is still running. Killing
    /// an already-terminal process is a no-op.
    pub fn kill(&self, id: &str, signal: Option<&str>) -> Result<(), ApiError> {
        let record = self.get(id)?;
        let sig = parse_signal(signal.unwrap_or("SIGTERM"))?;
        let pid = {
            let mut cell = record.state.lock();
            if cell.state.is_terminal() {
                return Ok(());
            }
            cell.kill_requested = true;
            cell.pid
        };
        let Some(pid) = pid else { return Ok(()) };
        signal_group(pid, sig);

        if sig != Signal::SIGKILL {
            let grace = self.cfg.kill_grace;
            let escalate = Arc::clone(&record);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if !escalate.state().is_terminal() {
                    tracing::debug!(id = %escalate.id, "kill grace elapsed, escalating to SIGKILL");
                    signal_group(pid, Signal::SIGKILL);
                }
            });
        }
        Ok(())
    }

    /// SIGKILL the group without surfacing errors; used by stream
    /// cancellation and shutdown.
    pub fn kill_silent(&self, id: &str) {
        if let Ok(record) = self.get(id) {
            let pid = {
                let mut cell = record.state.lock();
                if cell.state.is_terminal() {
                    return;
                }
                cell.kill_requested = true;
                cell.pid
            };
            if let Some(pid) = pid {
                signal_group(pid, Signal::SIGKILL);
            }
        }
    }

    /// Kill every running process group. Shutdown path.
    pub fn kill_all(&self) {
        let ids: Vec<ProcessId> = self.procs.lock().keys().copied().collect();
        for id in ids {
            self.kill_silent(id.as_str());
        }
    }

    /// Reap terminal records older than the gc grace. Running records are
    /// never removed.
    pub fn sweep(&self) {
        let grace = self.cfg.gc_grace;
        self.procs.lock().retain(|_, record| {
            let cell = record.state.lock();
            match cell.terminal_at {
                Some(at) if cell.state.is_terminal() => at.elapsed() < grace,
                _ => true,
            }
        });
    }

    /// Periodic sweep task.
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                registry.sweep();
            }
        })
    }
}

/// Record the child's exit and return the reported exit code
/// (128 + signal for signal deaths, by convention).
fn observe_exit(
    record: &Arc<ProcessRecord>,
    hub: &Hub,
    status: io::Result<std::process::ExitStatus>,
) -> i32 {
    let now = SystemClock.epoch_ms();
    match status {
        Ok(status) => {
            use std::os::unix::process::ExitStatusExt;
            let (state, code) = match (status.code(), status.signal()) {
                (Some(code), _) => {
                    let killed = record.state.lock().kill_requested;
                    (if killed { ProcessState::Killed } else { ProcessState::Exited }, code)
                }
                (None, Some(sig)) => (ProcessState::Killed, 128 + sig),
                (None, None) => (ProcessState::Exited, -1),
            };
            record.finish(state, Some(code), now);
            code
        }
        Err(e) => {
            record.push_line(hub, LogLevel::System, format!("wait failed: {e}"), now);
            record.finish(ProcessState::Exited, Some(-1), now);
            -1
        }
    }
}

/// Split raw output into lines; partial trailing bytes flush on EOF.
struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    fn new() -> Self {
        Self { partial: Vec::new() }
    }

    fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for byte in data {
            if *byte == b'\n' {
                let line = std::mem::take(&mut self.partial);
                lines.push(String::from_utf8_lossy(&line).into_owned());
            } else {
                self.partial.push(*byte);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            let line = std::mem::take(&mut self.partial);
            Some(String::from_utf8_lossy(&line).into_owned())
        }
    }
}

async fn pump<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    level: LogLevel,
    record: Arc<ProcessRecord>,
    hub: Arc<Hub>,
    capture: Option<Arc<Mutex<Vec<u8>>>>,
    chunks: Option<mpsc::Sender<StreamEvent>>,
) {
    let clock = SystemClock;
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        if let Some(capture) = &capture {
            capture.lock().extend_from_slice(&buf[..n]);
        }
        if let Some(chunks) = &chunks {
            let data = String::from_utf8_lossy(&buf[..n]).into_owned();
            if chunks.send(StreamEvent::Chunk { level, data }).await.is_err() {
                // Receiver gone; keep draining so the ring stays complete.
            }
        }
        for line in splitter.feed(&buf[..n]) {
            record.push_line(&hub, level, line, clock.epoch_ms());
        }
    }
    if let Some(line) = splitter.finish() {
        record.push_line(&hub, level, line, clock.epoch_ms());
    }
}

fn spawn_error(command: &str, e: &io::Error) -> ApiError {
    let code = match e.kind() {
        io::ErrorKind::NotFound => ErrorCode::ValidationError,
        _ => ErrorCode::InternalError,
    };
    ApiError::new(code, format!("spawn failed: {e}")).with_context("command", command)
}

/// Parse a signal name ("SIGTERM", "TERM") or number.
pub fn parse_signal(s: &str) -> Result<Signal, ApiError> {
    if let Ok(num) = s.parse::<i32>() {
        return Signal::try_from(num)
            .map_err(|_| ApiError::new(ErrorCode::InvalidSignal, s).with_context("signal", s));
    }
    let name = if s.starts_with("SIG") { s.to_string() } else { format!("SIG{s}") };
    name.parse::<Signal>()
        .map_err(|_| ApiError::new(ErrorCode::InvalidSignal, s).with_context("signal", s))
}

fn signal_group(pid: u32, sig: Signal) {
    if pid == 0 {
        return;
    }
    if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
        if e != nix::errno::Errno::ESRCH {
            tracing::warn!(pid, %sig, error = %e, "killpg failed");
        }
    }
}

/// Best-effort CPU/RSS counters from procfs.
#[cfg(target_os = "linux")]
fn read_resources(pid: u32) -> Option<ResourceUsage> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // utime and stime are fields 14 and 15 (1-indexed), after the comm
    // field which may itself contain spaces, so skip past the closing paren.
    let rest = stat.rsplit_once(')').map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let cpu_time_ms = (utime + stime) * 10;

    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(ResourceUsage { cpu_time_ms: Some(cpu_time_ms), rss_bytes: Some(rss_pages * 4096) })
}

#[cfg(not(target_os = "linux"))]
fn read_resources(_pid: u32) -> Option<ResourceUsage> {
    None
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
