// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File service: all filesystem operations beneath the workspace root.
//!
//! Every public operation takes a workspace-relative (or absolute-inside-
//! workspace) path and applies the path guard first. Methods are
//! synchronous; handlers run them on the blocking pool.

use crate::error::ApiError;
use crate::workspace::PathGuard;
use cubby_proto::{ErrorCode, FileEntry, FileKind};
use nix::errno::Errno;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub mode: Option<u32>,
    pub create_dirs: bool,
}

#[derive(Debug, Clone)]
pub struct FileService {
    guard: PathGuard,
    max_file_size: u64,
}

impl FileService {
    pub fn new(guard: PathGuard, max_file_size: u64) -> Self {
        Self { guard, max_file_size }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Write `bytes` to `path`, atomically where the filesystem allows:
    /// the content lands in a temp file in the target directory and is
    /// renamed into place.
    pub fn write(&self, path: &str, bytes: &[u8], opts: &WriteOptions) -> Result<u64, ApiError> {
        if bytes.len() as u64 > self.max_file_size {
            return Err(ApiError::new(
                ErrorCode::FileTooLarge,
                format!("{} bytes exceeds limit {}", bytes.len(), self.max_file_size),
            )
            .with_context("path", path));
        }
        let abs = self.guard.resolve(path)?;
        let parent = abs
            .parent()
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidPath, path).with_context("path", path))?;

        if !parent.exists() {
            if opts.create_dirs {
                fs::create_dir_all(parent).map_err(|e| io_error("write", path, e))?;
            } else {
                return Err(ApiError::new(ErrorCode::DirectoryNotFound, parent.display())
                    .with_context("path", path));
            }
        }

        let tmp = parent.join(format!(".{}.tmp-{}", file_name(&abs), nanoid::nanoid!(8)));
        let result = (|| -> io::Result<()> {
            fs::write(&tmp, bytes)?;
            if let Some(mode) = opts.mode {
                fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
            }
            fs::rename(&tmp, &abs)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(io_error("write", path, e));
        }
        Ok(bytes.len() as u64)
    }

    /// Read `path`, optionally a byte range.
    pub fn read(
        &self,
        path: &str,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> Result<Vec<u8>, ApiError> {
        let abs = self.guard.resolve(path)?;
        let meta = fs::metadata(&abs).map_err(|e| io_error("read", path, e))?;
        if meta.is_dir() {
            return Err(ApiError::new(ErrorCode::FileOperationError, "is a directory")
                .with_context("path", path));
        }
        let mut file = fs::File::open(&abs).map_err(|e| io_error("read", path, e))?;
        let offset = offset.unwrap_or(0);
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).map_err(|e| io_error("read", path, e))?;
        }
        let remaining = meta.len().saturating_sub(offset);
        let want = length.unwrap_or(remaining).min(remaining);
        let mut buf = Vec::with_capacity(want.min(1 << 20) as usize);
        file.take(want).read_to_end(&mut buf).map_err(|e| io_error("read", path, e))?;
        Ok(buf)
    }

    pub fn delete(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        let abs = self.guard.resolve(path)?;
        let meta = fs::symlink_metadata(&abs).map_err(|e| io_error("delete", path, e))?;
        let result = if meta.is_dir() {
            if recursive {
                fs::remove_dir_all(&abs)
            } else {
                fs::remove_dir(&abs)
            }
        } else {
            fs::remove_file(&abs)
        };
        result.map_err(|e| io_error("delete", path, e))
    }

    /// Directory entries of `path`, no recursion.
    pub fn list(&self, path: &str) -> Result<Vec<FileEntry>, ApiError> {
        let abs = self.guard.resolve(path)?;
        let meta = fs::metadata(&abs).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ApiError::new(ErrorCode::DirectoryNotFound, path).with_context("path", path)
            }
            _ => io_error("list", path, e),
        })?;
        if !meta.is_dir() {
            return Err(ApiError::new(ErrorCode::NotADirectory, path).with_context("path", path));
        }

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&abs).map_err(|e| io_error("list", path, e))? {
            let dirent = dirent.map_err(|e| io_error("list", path, e))?;
            let meta = match dirent.metadata() {
                Ok(m) => m,
                // Entry vanished between readdir and stat
                Err(_) => continue,
            };
            let link = dirent.path().symlink_metadata().map(|m| m.is_symlink()).unwrap_or(false);
            let kind = if link {
                FileKind::Symlink
            } else if meta.is_dir() {
                FileKind::Directory
            } else {
                FileKind::File
            };
            entries.push(FileEntry {
                name: dirent.file_name().to_string_lossy().into_owned(),
                kind,
                size: meta.len(),
                mtime: meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0),
                mode: meta.permissions().mode(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Move `from` to `to`: a rename within one filesystem, copy-then-delete
    /// across devices.
    pub fn rename_path(&self, from: &str, to: &str) -> Result<(), ApiError> {
        let src = self.guard.resolve(from)?;
        let dst = self.guard.resolve(to)?;
        self.relocate(&src, &dst, from)
    }

    /// Rename `path` to `new_name` within its directory.
    pub fn rename_in_place(&self, path: &str, new_name: &str) -> Result<(), ApiError> {
        if new_name.is_empty() || new_name.contains('/') || new_name.contains('\0') {
            return Err(ApiError::new(ErrorCode::ValidationError, "invalid new name")
                .with_context("newName", new_name));
        }
        let src = self.guard.resolve(path)?;
        let parent = src
            .parent()
            .ok_or_else(|| ApiError::new(ErrorCode::InvalidPath, path).with_context("path", path))?;
        let dst = parent.join(new_name);
        // The destination stays in the source's directory, which the guard
        // already validated.
        self.relocate(&src, &dst, path)
    }

    fn relocate(&self, src: &Path, dst: &Path, display: &str) -> Result<(), ApiError> {
        if !src.exists() {
            return Err(
                ApiError::new(ErrorCode::FileNotFound, display).with_context("path", display)
            );
        }
        match fs::rename(src, dst) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
                copy_then_delete(src, dst).map_err(|e| {
                    io_error("move", display, e).with_context("fallback", "copy-then-delete")
                })
            }
            Err(e) => Err(io_error("move", display, e)),
        }
    }
}

/// Cross-device fallback for rename: copy recursively, then delete source.
fn copy_then_delete(src: &Path, dst: &Path) -> io::Result<()> {
    copy_recursive(src, dst)?;
    let meta = fs::symlink_metadata(src)?;
    if meta.is_dir() {
        fs::remove_dir_all(src)
    } else {
        fs::remove_file(src)
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Map an I/O failure onto the error-code table.
pub(crate) fn io_error(op: &str, path: &str, e: io::Error) -> ApiError {
    let code = match e.raw_os_error() {
        Some(errno) if errno == Errno::ENOSPC as i32 => ErrorCode::DiskFull,
        Some(errno) if errno == Errno::ENOTEMPTY as i32 => ErrorCode::DirectoryNotEmpty,
        Some(errno) if errno == Errno::ENOTDIR as i32 => ErrorCode::NotADirectory,
        _ => match e.kind() {
            io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            _ => ErrorCode::FileOperationError,
        },
    };
    ApiError::new(code, format!("{op}: {e}")).with_context("path", path)
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
