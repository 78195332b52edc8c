// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use cubby_core::LogLevel;

#[test]
fn logs_query_builds_expected_strings() {
    assert_eq!(logs_query(&LogsOptions::default()), "");
    assert_eq!(
        logs_query(&LogsOptions { lines: Some(10), levels: vec![] }),
        "?lines=10"
    );
    assert_eq!(
        logs_query(&LogsOptions {
            lines: Some(5),
            levels: vec![LogLevel::Stdout, LogLevel::Stderr]
        }),
        "?lines=5&levels=stdout,stderr"
    );
}

#[test]
fn urlencode_escapes_query_breakers() {
    assert_eq!(urlencode("a/b/c.txt"), "a/b/c.txt");
    assert_eq!(urlencode("with space&more"), "with%20space%26more");
}

#[test]
fn exec_request_carries_options() {
    let opts = ExecOptions {
        cwd: Some("sub".into()),
        env: None,
        timeout: Some(Duration::from_secs(2)),
    };
    let req = exec_request("echo", &["hi"], &opts);
    assert_eq!(req.command, "echo");
    assert_eq!(req.args, vec!["hi"]);
    assert_eq!(req.cwd.as_deref(), Some("sub"));
    assert_eq!(req.timeout_ms, Some(2_000));
}
