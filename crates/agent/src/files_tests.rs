// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cubby_proto::FileKind;
use tempfile::TempDir;

fn service() -> (TempDir, FileService) {
    let dir = TempDir::new().unwrap();
    let guard = PathGuard::new(dir.path());
    (dir, FileService::new(guard, 1024))
}

#[test]
fn write_then_read_round_trips() {
    let (_dir, svc) = service();
    svc.write("hello.txt", b"hi\n", &WriteOptions::default()).unwrap();
    assert_eq!(svc.read("hello.txt", None, None).unwrap(), b"hi\n");
}

#[test]
fn write_overwrites_in_place() {
    let (_dir, svc) = service();
    svc.write("f", b"old", &WriteOptions::default()).unwrap();
    svc.write("f", b"new", &WriteOptions::default()).unwrap();
    assert_eq!(svc.read("f", None, None).unwrap(), b"new");
}

#[test]
fn write_without_parent_fails_unless_create_dirs() {
    let (_dir, svc) = service();
    let err = svc.write("a/b/f", b"x", &WriteOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DirectoryNotFound);

    svc.write("a/b/f", b"x", &WriteOptions { create_dirs: true, mode: None }).unwrap();
    assert_eq!(svc.read("a/b/f", None, None).unwrap(), b"x");
}

#[test]
fn write_rejects_oversized_content() {
    let (_dir, svc) = service();
    let err = svc.write("big", &[0u8; 2048], &WriteOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileTooLarge);
}

#[test]
fn write_sets_mode_bits() {
    let (_dir, svc) = service();
    svc.write("x.sh", b"#!/bin/sh\n", &WriteOptions { mode: Some(0o755), create_dirs: false })
        .unwrap();
    let entries = svc.list(".").unwrap();
    let entry = entries.iter().find(|e| e.name == "x.sh").unwrap();
    assert_eq!(entry.mode & 0o777, 0o755);
}

#[test]
fn read_supports_byte_range() {
    let (_dir, svc) = service();
    svc.write("r", b"0123456789", &WriteOptions::default()).unwrap();
    assert_eq!(svc.read("r", Some(2), Some(3)).unwrap(), b"234");
    assert_eq!(svc.read("r", Some(8), Some(100)).unwrap(), b"89");
    assert_eq!(svc.read("r", Some(50), None).unwrap(), b"");
}

#[test]
fn read_missing_file_is_not_found() {
    let (_dir, svc) = service();
    assert_eq!(svc.read("nope", None, None).unwrap_err().code(), ErrorCode::FileNotFound);
}

#[test]
fn delete_file_and_directories() {
    let (dir, svc) = service();
    svc.write("d/f", b"x", &WriteOptions { create_dirs: true, mode: None }).unwrap();

    // Non-recursive delete of a non-empty directory fails.
    let err = svc.delete("d", false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DirectoryNotEmpty);

    svc.delete("d/f", false).unwrap();
    svc.delete("d", false).unwrap();
    assert!(!dir.path().join("d").exists());

    svc.write("e/f", b"x", &WriteOptions { create_dirs: true, mode: None }).unwrap();
    svc.delete("e", true).unwrap();
    assert!(!dir.path().join("e").exists());
}

#[test]
fn list_reports_kinds_and_rejects_files() {
    let (_dir, svc) = service();
    svc.write("dir/inner", b"x", &WriteOptions { create_dirs: true, mode: None }).unwrap();
    svc.write("plain", b"abc", &WriteOptions::default()).unwrap();

    let entries = svc.list(".").unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["dir", "plain"]);
    assert_eq!(entries[0].kind, FileKind::Directory);
    assert_eq!(entries[1].kind, FileKind::File);
    assert_eq!(entries[1].size, 3);

    assert_eq!(svc.list("plain").unwrap_err().code(), ErrorCode::NotADirectory);
    assert_eq!(svc.list("ghost").unwrap_err().code(), ErrorCode::DirectoryNotFound);
}

#[test]
fn move_and_rename() {
    let (_dir, svc) = service();
    svc.write("src.txt", b"payload", &WriteOptions::default()).unwrap();
    svc.rename_path("src.txt", "dst.txt").unwrap();
    assert_eq!(svc.read("dst.txt", None, None).unwrap(), b"payload");
    assert_eq!(svc.read("src.txt", None, None).unwrap_err().code(), ErrorCode::FileNotFound);

    svc.rename_in_place("dst.txt", "renamed.txt").unwrap();
    assert_eq!(svc.read("renamed.txt", None, None).unwrap(), b"payload");
}

#[test]
fn rename_rejects_separators_in_new_name() {
    let (_dir, svc) = service();
    svc.write("f", b"x", &WriteOptions::default()).unwrap();
    let err = svc.rename_in_place("f", "a/b").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);
}

#[test]
fn move_missing_source_is_not_found() {
    let (_dir, svc) = service();
    assert_eq!(
        svc.rename_path("ghost", "dst").unwrap_err().code(),
        ErrorCode::FileNotFound
    );
}

#[test]
fn traversal_is_rejected_before_io() {
    let (dir, svc) = service();
    let err = svc.write("../escape", b"x", &WriteOptions::default()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);
    assert!(!dir.path().parent().unwrap().join("escape").exists());
}
