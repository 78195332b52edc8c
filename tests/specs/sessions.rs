// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session scenarios: persistent cwd/env, FIFO serialization, terminate.

use crate::prelude::*;
use cubby_proto::{CreateSessionRequest, ErrorCode, SessionState};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// `pwd` tracks `cd`, and the stored descriptor follows.
#[tokio::test]
async fn cd_and_pwd() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();
    std::fs::create_dir(agent.workspace.path().join("subdir")).unwrap();

    let id = devbox.create_session(&CreateSessionRequest::default()).await.unwrap();

    let pwd = devbox.session_exec(&id, "pwd").await.unwrap();
    assert_eq!(pwd.stdout.trim(), agent.workspace.path().to_string_lossy());

    devbox.session_cd(&id, "subdir").await.unwrap();
    let pwd = devbox.session_exec(&id, "pwd").await.unwrap();
    assert_eq!(
        pwd.stdout.trim(),
        agent.workspace.path().join("subdir").to_string_lossy()
    );

    let info = devbox.session_info(&id).await.unwrap();
    assert_eq!(info.state, SessionState::Active);
    assert!(info.cwd.ends_with("subdir"));
}

/// Concurrent submissions serialize FIFO: the second command observes the
/// first's side effect.
#[tokio::test]
async fn concurrent_commands_serialize() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();
    let id = devbox.create_session(&CreateSessionRequest::default()).await.unwrap();

    let d1 = agent.devbox();
    let d2 = agent.devbox();
    let first =
        tokio::spawn(async move { d1.session_exec(&id, "sleep 0.2; FLAG=set").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = tokio::spawn(async move { d2.session_exec(&id, "echo $FLAG").await });

    first.await.unwrap().unwrap();
    let result = second.await.unwrap().unwrap();
    assert_eq!(result.stdout, "set\n");
}

#[tokio::test]
async fn env_updates_are_exported() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();
    let id = devbox.create_session(&CreateSessionRequest::default()).await.unwrap();

    let mut env = BTreeMap::new();
    env.insert("SPEC_VALUE".to_string(), "forty two".to_string());
    devbox.session_env(&id, env).await.unwrap();

    let result = devbox.session_exec(&id, "echo $SPEC_VALUE").await.unwrap();
    assert_eq!(result.stdout, "forty two\n");
}

#[tokio::test]
async fn terminate_rejects_further_commands_but_keeps_logs() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();
    let id = devbox.create_session(&CreateSessionRequest::default()).await.unwrap();

    devbox.session_exec(&id, "echo remembered").await.unwrap();
    devbox.terminate_session(&id).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let info = devbox.session_info(&id).await.unwrap();
        if info.state == SessionState::Terminated {
            break;
        }
        assert!(Instant::now() < deadline, "session did not terminate");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let err = devbox.session_exec(&id, "echo more").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionTerminated);

    let logs = devbox
        .session_logs(&id, &cubby_client::LogsOptions::default())
        .await
        .unwrap();
    assert!(logs.iter().any(|e| e.content == "remembered"));

    let sessions = devbox.list_sessions().await.unwrap();
    assert!(sessions.iter().any(|s| s.id == id));
}

#[tokio::test]
async fn session_cd_cannot_escape_workspace() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();
    let id = devbox.create_session(&CreateSessionRequest::default()).await.unwrap();

    let err = devbox.session_cd(&id, "../../../etc").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);
}
