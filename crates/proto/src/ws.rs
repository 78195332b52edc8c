// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket subscription protocol between clients and the log fan-out hub.
//!
//! Clients send [`ClientAction`] frames; the hub replies with [`HubFrame`]s.
//! History replay entries are flagged `isHistory: true` and always precede
//! live entries for their subscription.

use cubby_core::{LogEntry, LogLevel};
use serde::{Deserialize, Serialize};

/// What a subscription is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Process,
    Session,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Process => "process",
            TargetKind::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOptions {
    /// Levels to deliver; empty means all.
    #[serde(default)]
    pub levels: Vec<LogLevel>,
    /// Number of most recent entries to replay before going live.
    #[serde(default)]
    pub tail: u64,
}

/// Client → hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientAction {
    Subscribe {
        #[serde(rename = "type")]
        kind: TargetKind,
        #[serde(rename = "targetId")]
        target_id: String,
        #[serde(default)]
        options: SubscribeOptions,
    },
    Unsubscribe {
        #[serde(rename = "type")]
        kind: TargetKind,
        #[serde(rename = "targetId")]
        target_id: String,
    },
    List,
}

/// One active subscription, as reported by `list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub target_id: String,
    pub levels: Vec<LogLevel>,
    /// Unix epoch milliseconds.
    pub created_at: u64,
}

/// Hub → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubFrame {
    #[serde(rename_all = "camelCase")]
    Log {
        data_type: TargetKind,
        target_id: String,
        log: LogEntry,
        is_history: bool,
    },
    #[serde(rename_all = "camelCase")]
    Subscribed {
        data_type: TargetKind,
        target_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribed {
        data_type: TargetKind,
        target_id: String,
    },
    Subscriptions {
        subscriptions: Vec<SubscriptionInfo>,
    },
    Error {
        status: u32,
        message: String,
    },
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
