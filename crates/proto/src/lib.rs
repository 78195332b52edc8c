// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire contract between the devbox agent and its clients.
//!
//! Every HTTP response shares the envelope of [`envelope`]: `status: 0` is
//! success, non-zero values come from the [`code`] table. Clients parse the
//! envelope, never the HTTP status line. The WebSocket subscription protocol
//! lives in [`ws`].

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod code;
mod envelope;
mod files;
mod ports;
mod process;
mod sessions;
pub mod ws;

pub use code::ErrorCode;
pub use envelope::{decode, decode_ok, Envelope, ErrorBody, WireError, STATUS_OK};
pub use files::{
    BatchUploadReport, DeleteFileRequest, DownloadRequest, FileEntry, FileKind, ListFilesBody,
    MoveFileRequest, ReadFileRequest, ReadFileResult, RejectedEntry, RenameFileRequest,
    WriteFileRequest, WriteFileResult,
};
pub use ports::PortsBody;
pub use process::{
    ExecRequest, ExecStarted, ExecSyncResult, KillRequest, LogsBody, ProcessListBody,
    ProcessState, ProcessStatusBody, ResourceUsage, TIMEOUT_EXIT_CODE,
};
pub use sessions::{
    CdRequest, CreateSessionRequest, EnvUpdateRequest, SessionCreated, SessionExecRequest,
    SessionExecResult, SessionInfoBody, SessionListBody, SessionState,
};
