// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ws_url_rewrites_scheme() {
    assert_eq!(to_ws_url("http://10.0.0.1:9757").unwrap(), "ws://10.0.0.1:9757/ws");
    assert_eq!(
        to_ws_url("https://agent.example.com").unwrap(),
        "wss://agent.example.com/ws"
    );
    assert!(to_ws_url("ftp://nope").is_err());
}
