// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn descriptor_deserializes_with_sparse_fields() {
    let json = r#"{"name": "dev1", "status": "Pending"}"#;
    let descriptor: DevboxDescriptor = serde_json::from_str(json).unwrap();
    assert_eq!(descriptor.name, "dev1");
    assert!(descriptor.ports.is_empty());
    assert!(descriptor.agent_server.is_none());
    assert!(descriptor.pod_ip.is_none());
}

#[test]
fn descriptor_deserializes_full_shape() {
    let json = r#"{
        "name": "dev1",
        "status": "Running",
        "podIp": "10.0.0.7",
        "ports": [{"port": 3000, "publicAddress": "https://dev1.example.com"}],
        "agentServer": {"url": "dev1-agent", "token": "tok"}
    }"#;
    let descriptor: DevboxDescriptor = serde_json::from_str(json).unwrap();
    assert_eq!(descriptor.pod_ip.as_deref(), Some("10.0.0.7"));
    assert_eq!(descriptor.ports[0].public_address.as_deref(), Some("https://dev1.example.com"));
    let agent = descriptor.agent_server.unwrap();
    assert_eq!(agent.url, "dev1-agent");
    assert_eq!(agent.token, "tok");
}

#[yare::parameterized(
    start = { LifecycleAction::Start, "start" },
    pause = { LifecycleAction::Pause, "pause" },
    restart = { LifecycleAction::Restart, "restart" },
    shutdown = { LifecycleAction::Shutdown, "shutdown" },
)]
fn lifecycle_action_paths(action: LifecycleAction, expected: &str) {
    assert_eq!(action.as_str(), expected);
}

#[test]
fn base_url_trailing_slash_is_trimmed() {
    let api =
        HttpClusterApi::new("http://api.example.com///", "t", std::time::Duration::from_secs(5))
            .unwrap();
    assert_eq!(api.url("/api/v1/devboxes"), "http://api.example.com/api/v1/devboxes");
}
