// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log fan-out scenarios over the WebSocket subscription protocol.

use crate::prelude::*;
use cubby_client::ExecOptions;
use cubby_core::LogLevel;
use cubby_proto::ws::{HubFrame, SubscribeOptions, TargetKind};
use cubby_proto::ProcessState;
use std::time::{Duration, Instant};

async fn wait_for_exit(agent: &TestAgent, id: &cubby_core::ProcessId) {
    let devbox = agent.devbox();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = devbox.process_status(id).await.unwrap();
        if status.state == ProcessState::Exited {
            return;
        }
        assert!(Instant::now() < deadline, "process did not exit");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Tail replay after the fact: exactly the last 5 lines, flagged history,
/// in order.
#[tokio::test]
async fn tail_replay_returns_recent_history() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let script = "for i in 1 2 3 4 5 6 7 8 9 10; do echo L$i; done";
    let started = devbox.exec("sh", &["-c", script], &ExecOptions::default()).await.unwrap();
    wait_for_exit(&agent, &started.id).await;

    let mut stream = devbox.stream_logs().await.unwrap();
    stream
        .subscribe(
            TargetKind::Process,
            started.id.as_str(),
            SubscribeOptions { levels: vec![LogLevel::Stdout], tail: 5 },
        )
        .await
        .unwrap();

    // Ack first, then history L6..L10 in ascending order.
    match stream.next_frame().await.unwrap() {
        Some(HubFrame::Subscribed { target_id, .. }) => {
            assert_eq!(target_id, started.id.as_str())
        }
        other => panic!("expected subscribed ack, got {other:?}"),
    }
    for expected in ["L6", "L7", "L8", "L9", "L10"] {
        match stream.next_frame().await.unwrap() {
            Some(HubFrame::Log { log, is_history, .. }) => {
                assert!(is_history, "history must precede live");
                assert_eq!(log.content, expected);
            }
            other => panic!("expected history log, got {other:?}"),
        }
    }
    stream.close().await;
}

/// History hands off to live delivery on the same subscription.
#[tokio::test]
async fn history_then_live_on_one_subscription() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let script = "echo early; sleep 1; echo late";
    let started = devbox.exec("sh", &["-c", script], &ExecOptions::default()).await.unwrap();

    // Let the first line land in the ring.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut stream = devbox.stream_logs().await.unwrap();
    stream
        .subscribe(
            TargetKind::Process,
            started.id.as_str(),
            SubscribeOptions { levels: vec![LogLevel::Stdout], tail: 10 },
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 2 {
        assert!(Instant::now() < deadline, "timed out with {seen:?}");
        match tokio::time::timeout(Duration::from_secs(5), stream.next_frame())
            .await
            .expect("frame deadline")
            .unwrap()
        {
            Some(HubFrame::Log { log, is_history, .. }) => {
                seen.push((log.content, is_history))
            }
            Some(_) => {}
            None => break,
        }
    }
    assert_eq!(seen[0], ("early".to_string(), true));
    assert_eq!(seen[1], ("late".to_string(), false));
    stream.close().await;
}

/// Re-subscribing to the same target is a no-op; `list` shows one
/// subscription.
#[tokio::test]
async fn duplicate_subscription_is_single() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let started =
        devbox.exec("sleep", &["10"], &ExecOptions::default()).await.unwrap();

    let mut stream = devbox.stream_logs().await.unwrap();
    for _ in 0..2 {
        stream
            .subscribe(
                TargetKind::Process,
                started.id.as_str(),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();
    }
    // Two acks, then the listing.
    let mut subs = None;
    stream.request_list().await.unwrap();
    for _ in 0..3 {
        match stream.next_frame().await.unwrap() {
            Some(HubFrame::Subscriptions { subscriptions }) => {
                subs = Some(subscriptions);
                break;
            }
            Some(_) => {}
            None => break,
        }
    }
    let subs = subs.expect("subscriptions frame");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].target_id, started.id.as_str());

    devbox.kill_process(&started.id, None).await.unwrap();
    stream.close().await;
}

/// Subscribing to a missing target is an enveloped error frame.
#[tokio::test]
async fn subscribe_unknown_target_errors() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();

    let mut stream = devbox.stream_logs().await.unwrap();
    stream
        .subscribe(TargetKind::Process, "proc-ghost", SubscribeOptions::default())
        .await
        .unwrap();
    match stream.next_frame().await.unwrap() {
        Some(HubFrame::Error { status, message }) => {
            assert_eq!(status, 1404);
            assert!(message.contains("process_not_found"));
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    stream.close().await;
}

/// Session output flows through the same hub.
#[tokio::test]
async fn session_logs_stream_live() {
    let agent = TestAgent::start().await;
    let devbox = agent.devbox();
    let id = devbox
        .create_session(&cubby_proto::CreateSessionRequest::default())
        .await
        .unwrap();

    let mut stream = devbox.stream_logs().await.unwrap();
    stream
        .subscribe(
            TargetKind::Session,
            id.as_str(),
            SubscribeOptions { levels: vec![LogLevel::Stdout], tail: 0 },
        )
        .await
        .unwrap();
    match stream.next_frame().await.unwrap() {
        Some(HubFrame::Subscribed { .. }) => {}
        other => panic!("expected ack, got {other:?}"),
    }

    devbox.session_exec(&id, "echo streamed").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "no live session frame");
        match tokio::time::timeout(Duration::from_secs(5), stream.next_frame())
            .await
            .expect("frame deadline")
            .unwrap()
        {
            Some(HubFrame::Log { data_type, log, is_history, .. }) => {
                assert_eq!(data_type, TargetKind::Session);
                assert!(!is_history);
                assert_eq!(log.content, "streamed");
                break;
            }
            Some(_) => {}
            None => panic!("stream closed early"),
        }
    }
    stream.close().await;
}
