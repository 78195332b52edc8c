// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::hub::HubConfig;
use cubby_proto::CreateSessionRequest;
use std::time::Instant;
use tempfile::TempDir;

fn registry() -> (TempDir, Arc<SessionRegistry>) {
    let dir = TempDir::new().unwrap();
    let guard = PathGuard::new(dir.path());
    let hub = Arc::new(Hub::new(HubConfig::default()));
    let cfg = SessionConfig { term_grace: Duration::from_millis(300), ..SessionConfig::default() };
    (dir, Arc::new(SessionRegistry::new(guard, hub, cfg)))
}

fn create_req() -> CreateSessionRequest {
    CreateSessionRequest { shell: Some("/bin/bash".into()), working_dir: None, env: None }
}

async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn exec_returns_output_and_exit_code() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();

    let result = reg.exec(session.id.as_str(), "echo hello").await.unwrap();
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.exit_code, 0);

    let result = reg.exec(session.id.as_str(), "false").await.unwrap();
    assert_eq!(result.exit_code, 1);
}

#[tokio::test]
async fn state_persists_across_commands() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    reg.exec(id.as_str(), "MARKER=42").await.unwrap();
    let result = reg.exec(id.as_str(), "echo $MARKER").await.unwrap();
    assert_eq!(result.stdout, "42\n");
}

#[tokio::test]
async fn cd_updates_cwd_and_shell() {
    let (dir, reg) = registry();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    let pwd = reg.exec(id.as_str(), "pwd").await.unwrap();
    assert_eq!(pwd.stdout.trim(), dir.path().to_string_lossy());

    reg.cd(id.as_str(), "subdir").await.unwrap();
    assert_eq!(reg.info(id.as_str()).unwrap().cwd, dir.path().join("subdir").to_string_lossy());

    let pwd = reg.exec(id.as_str(), "pwd").await.unwrap();
    assert_eq!(pwd.stdout.trim(), dir.path().join("subdir").to_string_lossy());
}

#[tokio::test]
async fn cd_rejects_escape_and_missing_dir() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    let err = reg.cd(id.as_str(), "../../..").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPath);

    let err = reg.cd(id.as_str(), "ghost").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileOperationError);
    // Failed cd leaves the stored cwd untouched.
    assert_eq!(reg.info(id.as_str()).unwrap().cwd, session.cwd().to_string_lossy());
}

#[tokio::test]
async fn update_env_exports_into_shell() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    let mut map = BTreeMap::new();
    map.insert("CUBBY_TEST".to_string(), "va'lue".to_string());
    reg.update_env(id.as_str(), map).await.unwrap();

    let result = reg.exec(id.as_str(), "echo $CUBBY_TEST").await.unwrap();
    assert_eq!(result.stdout, "va'lue\n");
    assert_eq!(
        reg.info(id.as_str()).unwrap().env.get("CUBBY_TEST").map(String::as_str),
        Some("va'lue")
    );
}

#[tokio::test]
async fn commands_serialize_fifo_per_session() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    // Submit a slow write then a fast read concurrently; FIFO ordering
    // guarantees the second command observes the first's effect.
    let reg1 = Arc::clone(&reg);
    let reg2 = Arc::clone(&reg);
    let first = tokio::spawn(async move {
        reg1.exec(id.as_str(), "sleep 0.2; ORDER=first").await
    });
    // Give the first submission a moment to enqueue ahead.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = tokio::spawn(async move { reg2.exec(id.as_str(), "echo $ORDER").await });

    first.await.unwrap().unwrap();
    let result = second.await.unwrap().unwrap();
    assert_eq!(result.stdout, "first\n");
}

#[tokio::test]
async fn exec_timeout_reports_session_timeout() {
    let dir = TempDir::new().unwrap();
    let hub = Arc::new(Hub::new(HubConfig::default()));
    let cfg = SessionConfig { exec_timeout: Duration::from_millis(200), ..SessionConfig::default() };
    let reg = Arc::new(SessionRegistry::new(PathGuard::new(dir.path()), hub, cfg));
    let session = reg.create(&create_req()).unwrap();

    let err = reg.exec(session.id.as_str(), "sleep 5").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionTimeout);
}

#[tokio::test]
async fn terminate_freezes_session_but_keeps_logs() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    reg.exec(id.as_str(), "echo before").await.unwrap();
    reg.terminate(id.as_str()).unwrap();

    let reg2 = Arc::clone(&reg);
    assert!(
        wait_for(
            || reg2.info(id.as_str()).map(|i| i.state == SessionState::Terminated).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await
    );

    let err = reg.exec(id.as_str(), "echo after").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SessionTerminated);

    let logs = reg.logs(id.as_str(), 0, &[]).unwrap();
    assert!(logs.iter().any(|e| e.content == "before"));
}

#[tokio::test]
async fn session_logs_carry_increasing_sequences() {
    let (_dir, reg) = registry();
    let session = reg.create(&create_req()).unwrap();
    let id = session.id;

    reg.exec(id.as_str(), "echo one; echo two").await.unwrap();
    let logs = reg.logs(id.as_str(), 0, &[LogLevel::Stdout]).unwrap();
    let seqs: Vec<u64> = logs.iter().map(|e| e.sequence).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(seqs, sorted);
    assert_eq!(logs.iter().map(|e| e.content.as_str()).collect::<Vec<_>>(), vec!["one", "two"]);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (_dir, reg) = registry();
    assert_eq!(
        reg.exec("sess-ghost", "true").await.unwrap_err().code(),
        ErrorCode::SessionNotFound
    );
    assert_eq!(reg.info("sess-ghost").unwrap_err().code(), ErrorCode::SessionNotFound);
}

#[test]
fn sh_quote_escapes_single_quotes() {
    assert_eq!(sh_quote("plain"), "'plain'");
    assert_eq!(sh_quote("a'b"), "'a'\\''b'");
}
