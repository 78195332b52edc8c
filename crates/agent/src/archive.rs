// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tar packaging for download and batch upload.
//!
//! Download streams a tar archive whose entries follow the request order;
//! directories are appended with their recursive contents. Batch upload
//! extracts under the workspace root, re-validating every entry path
//! through the guard and reporting rejects individually.

use crate::error::ApiError;
use crate::workspace::PathGuard;
use cubby_proto::{BatchUploadReport, ErrorCode, RejectedEntry};
use std::io::{self, Cursor, Write};
use std::path::PathBuf;

/// A download entry: guard-resolved absolute path plus the name it takes
/// inside the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub abs: PathBuf,
    pub name: String,
}

/// Resolve and stat the requested paths before any bytes are streamed, so
/// invalid requests still get an envelope error.
pub fn prepare_entries(guard: &PathGuard, paths: &[String]) -> Result<Vec<ArchiveEntry>, ApiError> {
    if paths.is_empty() {
        return Err(ApiError::new(ErrorCode::ValidationError, "no paths given"));
    }
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let abs = guard.resolve(path)?;
        if !abs.exists() {
            return Err(ApiError::new(ErrorCode::FileNotFound, path).with_context("path", path));
        }
        let name = guard.relative(&abs);
        let name = if name.is_empty() { ".".to_string() } else { name };
        entries.push(ArchiveEntry { abs, name });
    }
    Ok(entries)
}

/// Write the archive to `out`, preserving entry order. Memory use is
/// bounded by the writer's own buffer; file bytes stream straight from
/// disk into it.
pub fn build<W: Write>(entries: &[ArchiveEntry], out: W) -> io::Result<()> {
    let mut builder = tar::Builder::new(out);
    builder.follow_symlinks(false);
    for entry in entries {
        let meta = std::fs::symlink_metadata(&entry.abs)?;
        if meta.is_dir() {
            builder.append_dir_all(&entry.name, &entry.abs)?;
        } else {
            builder.append_path_with_name(&entry.abs, &entry.name)?;
        }
    }
    let mut out = builder.into_inner()?;
    out.flush()
}

/// Extract a tar archive under the workspace root.
///
/// Entries are validated through the guard before unpacking; failures are
/// reported per entry and do not roll back siblings that already landed.
pub fn extract(guard: &PathGuard, bytes: &[u8], max_total: u64) -> Result<BatchUploadReport, ApiError> {
    if bytes.len() as u64 > max_total {
        return Err(ApiError::new(
            ErrorCode::FileTooLarge,
            format!("archive of {} bytes exceeds limit {}", bytes.len(), max_total),
        ));
    }

    let mut archive = tar::Archive::new(Cursor::new(bytes));
    let mut report = BatchUploadReport { extracted: Vec::new(), rejected: Vec::new() };

    let entries = archive
        .entries()
        .map_err(|e| ApiError::new(ErrorCode::InvalidRequest, format!("bad archive: {e}")))?;
    for entry in entries {
        let mut entry = match entry {
            Ok(e) => e,
            Err(e) => {
                return Err(ApiError::new(
                    ErrorCode::InvalidRequest,
                    format!("bad archive entry: {e}"),
                ))
            }
        };
        let raw_path = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(e) => {
                report
                    .rejected
                    .push(RejectedEntry { path: String::new(), message: format!("bad path: {e}") });
                continue;
            }
        };

        if guard.resolve(&raw_path).is_err() {
            report.rejected.push(RejectedEntry {
                path: raw_path,
                message: ErrorCode::PathTraversalDetected.name().to_string(),
            });
            continue;
        }

        // unpack_in re-checks containment on the filesystem side (symlink
        // chains the lexical guard cannot see).
        match entry.unpack_in(guard.root()) {
            Ok(true) => report.extracted.push(raw_path),
            Ok(false) => report.rejected.push(RejectedEntry {
                path: raw_path,
                message: ErrorCode::PathTraversalDetected.name().to_string(),
            }),
            Err(e) => report
                .rejected
                .push(RejectedEntry { path: raw_path, message: format!("unpack failed: {e}") }),
        }
    }

    Ok(report)
}

#[cfg(test)]
#[path = "archive_tests.rs"]
mod tests;
