// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path guard: lexical resolution of user-supplied paths against the
//! workspace root.
//!
//! `resolve` never touches the filesystem. Every accepted path normalizes
//! to an absolute path with the workspace root as a directory prefix.

use crate::error::ApiError;
use cubby_proto::ErrorCode;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// `root` must be absolute; it is normalized lexically once here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: normalize(&root.into()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user path against the workspace root.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, ApiError> {
        self.resolve_at(&self.root, user_path)
    }

    /// Resolve a user path against `base` (itself inside the root). Used by
    /// sessions, whose cwd moves around beneath the workspace root.
    pub fn resolve_at(&self, base: &Path, user_path: &str) -> Result<PathBuf, ApiError> {
        if user_path.is_empty() {
            return Err(invalid(user_path, "empty path"));
        }
        if user_path.contains('\0') {
            return Err(invalid(user_path, "embedded NUL"));
        }

        let raw = Path::new(user_path);
        let candidate = if raw.is_absolute() { raw.to_path_buf() } else { base.join(raw) };
        let resolved = normalize(&candidate);

        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(resolved)
        } else if user_path.split('/').any(|c| c == "..") {
            Err(invalid(user_path, "path traversal detected"))
        } else {
            Err(invalid(user_path, "outside workspace"))
        }
    }

    /// Workspace-relative display form of a resolved path.
    pub fn relative(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| abs.to_string_lossy().into_owned())
    }
}

fn invalid(path: &str, detail: &str) -> ApiError {
    ApiError::new(ErrorCode::InvalidPath, detail).with_context("path", path)
}

/// Lexical normalization: strips `.`, folds `..` into its parent, and
/// clamps `..` at the filesystem root.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::RootDir.as_os_str());
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(Component::RootDir.as_os_str());
    }
    out
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
