// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The error-code table shared by agent and client.
//!
//! Symbolic codes are the public API; each belongs to a class with a numeric
//! wire status. The envelope message always leads with the symbolic name
//! (`"invalid_path: .."`), so clients can recover the symbolic code even
//! when several codes share a class numeric.

use serde::{Deserialize, Serialize};

/// Every error the system can put on the wire or raise client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Auth
    Unauthorized,
    InvalidToken,
    TokenExpired,
    // Client request
    ValidationError,
    InvalidRequest,
    NotFound,
    MethodNotAllowed,
    FileNotFound,
    DirectoryNotFound,
    ProcessNotFound,
    SessionNotFound,
    DevboxNotFound,
    // Conflict
    Conflict,
    SessionTerminated,
    // File I/O
    FileTooLarge,
    DirectoryNotEmpty,
    DiskFull,
    FileLocked,
    FileOperationError,
    NotADirectory,
    // Path safety
    InvalidPath,
    PathTraversalDetected,
    // Signals
    InvalidSignal,
    // Timeouts
    OperationTimeout,
    SessionTimeout,
    ConnectionTimeout,
    // Server
    InternalError,
    Panic,
    ServiceUnavailable,
    ServerUnavailable,
    ConnectionFailed,
    // Devbox lifecycle
    DevboxNotReady,
    // Client-side capacity
    ConnectionPoolExhausted,
}

impl ErrorCode {
    /// Numeric wire status for the envelope's `status` field.
    pub fn status(&self) -> u32 {
        use ErrorCode::*;
        match self {
            Unauthorized | InvalidToken | TokenExpired => 1401,
            ValidationError | InvalidPath | PathTraversalDetected | NotADirectory
            | InvalidSignal => 1400,
            InvalidRequest => 1422,
            NotFound | FileNotFound | DirectoryNotFound | ProcessNotFound | SessionNotFound
            | DevboxNotFound => 1404,
            MethodNotAllowed => 405,
            Conflict | SessionTerminated => 1409,
            FileTooLarge | DirectoryNotEmpty | DiskFull | FileLocked | FileOperationError => 1460,
            OperationTimeout | SessionTimeout | ConnectionTimeout => 1408,
            InternalError | ServiceUnavailable | ServerUnavailable | ConnectionFailed => 1500,
            Panic => 500,
            DevboxNotReady => 1503,
            ConnectionPoolExhausted => 1429,
        }
    }

    /// Stable symbolic name, as written on the wire.
    pub fn name(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            Unauthorized => "unauthorized",
            InvalidToken => "invalid_token",
            TokenExpired => "token_expired",
            ValidationError => "validation_error",
            InvalidRequest => "invalid_request",
            NotFound => "not_found",
            MethodNotAllowed => "method_not_allowed",
            FileNotFound => "file_not_found",
            DirectoryNotFound => "directory_not_found",
            ProcessNotFound => "process_not_found",
            SessionNotFound => "session_not_found",
            DevboxNotFound => "devbox_not_found",
            Conflict => "conflict",
            SessionTerminated => "session_terminated",
            FileTooLarge => "file_too_large",
            DirectoryNotEmpty => "directory_not_empty",
            DiskFull => "disk_full",
            FileLocked => "file_locked",
            FileOperationError => "file_operation_error",
            NotADirectory => "not_a_directory",
            InvalidPath => "invalid_path",
            PathTraversalDetected => "path_traversal_detected",
            InvalidSignal => "invalid_signal",
            OperationTimeout => "operation_timeout",
            SessionTimeout => "session_timeout",
            ConnectionTimeout => "connection_timeout",
            InternalError => "internal_error",
            Panic => "panic",
            ServiceUnavailable => "service_unavailable",
            ServerUnavailable => "server_unavailable",
            ConnectionFailed => "connection_failed",
            DevboxNotReady => "devbox_not_ready",
            ConnectionPoolExhausted => "connection_pool_exhausted",
        }
    }

    /// Look up a code by its symbolic name.
    pub fn from_name(name: &str) -> Option<Self> {
        use ErrorCode::*;
        let code = match name {
            "unauthorized" => Unauthorized,
            "invalid_token" => InvalidToken,
            "token_expired" => TokenExpired,
            "validation_error" => ValidationError,
            "invalid_request" => InvalidRequest,
            "not_found" => NotFound,
            "method_not_allowed" => MethodNotAllowed,
            "file_not_found" => FileNotFound,
            "directory_not_found" => DirectoryNotFound,
            "process_not_found" => ProcessNotFound,
            "session_not_found" => SessionNotFound,
            "devbox_not_found" => DevboxNotFound,
            "conflict" => Conflict,
            "session_terminated" => SessionTerminated,
            "file_too_large" => FileTooLarge,
            "directory_not_empty" => DirectoryNotEmpty,
            "disk_full" => DiskFull,
            "file_locked" => FileLocked,
            "file_operation_error" => FileOperationError,
            "not_a_directory" => NotADirectory,
            "invalid_path" => InvalidPath,
            "path_traversal_detected" => PathTraversalDetected,
            "invalid_signal" => InvalidSignal,
            "operation_timeout" => OperationTimeout,
            "session_timeout" => SessionTimeout,
            "connection_timeout" => ConnectionTimeout,
            "internal_error" => InternalError,
            "panic" => Panic,
            "service_unavailable" => ServiceUnavailable,
            "server_unavailable" => ServerUnavailable,
            "connection_failed" => ConnectionFailed,
            "devbox_not_ready" => DevboxNotReady,
            "connection_pool_exhausted" => ConnectionPoolExhausted,
            _ => return None,
        };
        Some(code)
    }

    /// Whether retry logic may re-attempt an operation that failed with this
    /// code. Retry decisions consult this table, never a heuristic.
    pub fn retryable(&self) -> bool {
        use ErrorCode::*;
        matches!(
            self,
            OperationTimeout
                | SessionTimeout
                | ConnectionTimeout
                | InternalError
                | Panic
                | ServiceUnavailable
                | ServerUnavailable
                | ConnectionFailed
                | DevboxNotReady
                | ConnectionPoolExhausted
        )
    }

    /// Best-effort class recovery from a bare numeric status, for envelopes
    /// whose message does not lead with a symbolic name.
    pub fn from_status(status: u32) -> Option<Self> {
        use ErrorCode::*;
        let code = match status {
            1401 => Unauthorized,
            1400 => ValidationError,
            1422 => InvalidRequest,
            1404 => NotFound,
            405 => MethodNotAllowed,
            1409 => Conflict,
            1460 => FileOperationError,
            1408 => OperationTimeout,
            1500 => InternalError,
            500 => Panic,
            1503 => DevboxNotReady,
            1429 => ConnectionPoolExhausted,
            _ => return None,
        };
        Some(code)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[path = "code_tests.rs"]
mod tests;
