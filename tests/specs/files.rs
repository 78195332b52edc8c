// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File service scenarios: round trips, traversal rejection, archives.

use crate::prelude::*;
use cubby_client::devbox::{ReadFileOptions, WriteFileOptions};
use cubby_proto::{ErrorCode, FileKind};
use serde_json::json;
use std::io::Cursor;

/// Write then read returns byte-identical content.
#[tokio::test]
async fn file_round_trip() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    devbox.write_file("hello.txt", b"hi\n").await.unwrap();
    assert_eq!(devbox.read_file("hello.txt").await.unwrap(), b"hi\n");
}

/// Binary content survives the base64 wire encoding.
#[tokio::test]
async fn binary_round_trip() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    devbox.write_file("blob.bin", &payload).await.unwrap();
    assert_eq!(devbox.read_file("blob.bin").await.unwrap(), payload);

    let slice = devbox
        .read_file_with(
            "blob.bin",
            &ReadFileOptions { offset: Some(256), length: Some(16) },
        )
        .await
        .unwrap();
    assert_eq!(slice, payload[256..272]);
}

/// Traversal is rejected with the 1400 envelope and nothing escapes the
/// workspace.
#[tokio::test]
async fn traversal_rejected_on_the_wire() {
    let agent = TestAgent::start().await;

    let body = agent
        .raw_post(
            "/api/v1/files/write",
            json!({"path": "../etc/passwd", "content": "eA=="}),
        )
        .await;
    assert_eq!(body["status"], 1400);
    assert!(body["message"].as_str().unwrap().contains("invalid_path"));
    assert!(!agent.workspace.path().parent().unwrap().join("etc/passwd").exists());

    // The typed client surfaces the same code.
    let err = agent.devbox().read_file("../secret").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);
}

#[tokio::test]
async fn create_dirs_list_move_rename() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let err = devbox.write_file("deep/nested/f.txt", b"x").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DirectoryNotFound);

    devbox
        .write_file_with(
            "deep/nested/f.txt",
            b"x",
            &WriteFileOptions { create_dirs: true, mode: None },
        )
        .await
        .unwrap();

    let entries = devbox.list_dir("deep").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "nested");
    assert_eq!(entries[0].kind, FileKind::Directory);

    devbox.move_file("deep/nested/f.txt", "moved.txt").await.unwrap();
    devbox.rename_file("moved.txt", "final.txt").await.unwrap();
    assert_eq!(devbox.read_file("final.txt").await.unwrap(), b"x");
    assert!(devbox.exists("final.txt").await.unwrap());
    assert!(!devbox.exists("moved.txt").await.unwrap());

    let err = devbox.delete_file("deep", false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DirectoryNotEmpty);
    devbox.delete_file("deep", true).await.unwrap();
}

/// Batch upload reproduces the archive exactly; download round-trips it.
#[tokio::test]
async fn archive_upload_then_download() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in [("dir/a.txt", "alpha"), ("dir/sub/b.txt", "beta"), ("top.txt", "top")]
    {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, content.as_bytes()).unwrap();
    }
    let archive = builder.into_inner().unwrap();

    let report = devbox.upload_archive(archive).await.unwrap();
    assert_eq!(report.rejected.len(), 0);
    assert_eq!(report.extracted.len(), 3);

    assert_eq!(devbox.read_file("dir/a.txt").await.unwrap(), b"alpha");
    assert_eq!(devbox.read_file("dir/sub/b.txt").await.unwrap(), b"beta");
    let names: Vec<String> =
        devbox.list_dir("dir").await.unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["a.txt", "sub"]);

    // Download the directory and the top file; entry order follows the
    // request, directories recurse.
    let tar_bytes = devbox.download(&["top.txt", "dir"]).await.unwrap();
    let mut archive = tar::Archive::new(Cursor::new(tar_bytes));
    let mut seen = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = String::new();
        use std::io::Read;
        entry.read_to_string(&mut content).unwrap();
        seen.push((path, content));
    }
    assert_eq!(seen[0].0, "top.txt");
    assert_eq!(seen[0].1, "top");
    assert!(seen.iter().any(|(p, c)| p == "dir/sub/b.txt" && c == "beta"));
}

#[tokio::test]
async fn download_of_missing_path_is_an_envelope_error() {
    let agent = TestAgent::start().await;
    let err = agent.devbox().download(&["ghost"]).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileNotFound);
}
