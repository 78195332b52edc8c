// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process scenarios: sync exec, async exec + kill, logs.

use crate::prelude::*;
use cubby_client::{ExecOptions, LogsOptions};
use cubby_proto::{ErrorCode, ProcessState, TIMEOUT_EXIT_CODE};
use std::time::{Duration, Instant};

/// `exec-sync` of `echo world` returns the captured output.
#[tokio::test]
async fn sync_exec() {
    let agent = TestAgent::start().await;
    let result =
        agent.devbox().exec_sync("echo", &["world"], &ExecOptions::default()).await.unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "world\n");
    assert_eq!(result.stderr, "");
    assert!(result.pid > 0);
}

/// Async exec, observe `running`, kill, observe `killed` within a second.
#[tokio::test]
async fn async_exec_then_kill() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let started = devbox.exec("sleep", &["60"], &ExecOptions::default()).await.unwrap();
    assert!(started.pid > 0);

    let status = devbox.process_status(&started.id).await.unwrap();
    assert_eq!(status.state, ProcessState::Running);

    devbox.kill_process(&started.id, Some("SIGTERM")).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        let status = devbox.process_status(&started.id).await.unwrap();
        if status.state == ProcessState::Killed {
            assert!(status.exit_code.is_some());
            break;
        }
        assert!(Instant::now() < deadline, "process not killed within 1s: {status:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn sync_exec_deadline_returns_sentinel() {
    let agent = TestAgent::start().await;
    let result = agent
        .devbox()
        .exec_sync(
            "sleep",
            &["30"],
            &ExecOptions { timeout: Some(Duration::from_millis(300)), ..ExecOptions::default() },
        )
        .await
        .unwrap();
    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
}

#[tokio::test]
async fn process_logs_filter_by_level() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let started = devbox
        .exec("sh", &["-c", "echo out1; echo err1 >&2; echo out2"], &ExecOptions::default())
        .await
        .unwrap();

    // Wait for exit so all lines are buffered.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = devbox.process_status(&started.id).await.unwrap();
        if status.state == ProcessState::Exited {
            break;
        }
        assert!(Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stdout_only = devbox
        .process_logs(
            &started.id,
            &LogsOptions { lines: None, levels: vec![cubby_core::LogLevel::Stdout] },
        )
        .await
        .unwrap();
    let contents: Vec<&str> = stdout_only.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(contents, vec!["out1", "out2"]);

    // Sequences are strictly increasing with no reorder.
    let all = devbox.process_logs(&started.id, &LogsOptions::default()).await.unwrap();
    let seqs: Vec<u64> = all.iter().map(|e| e.sequence).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);

    let listed = devbox.list_processes().await.unwrap();
    assert!(listed.iter().any(|p| p.id == started.id));
}

#[tokio::test]
async fn unknown_process_is_typed_not_found() {
    let agent = TestAgent::start().await;
    let err = agent
        .devbox()
        .process_status(&cubby_core::ProcessId::from_string("proc-ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProcessNotFound);
}
