// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log fan-out hub: multiplexes per-target log streams to WebSocket
//! clients.
//!
//! Producers call [`Hub::publish`] on every emitted line; the hub fans the
//! entry out to matching subscriptions. Each client owns a bounded frame
//! queue; a slow consumer is disconnected rather than allowed to back up
//! the producer. Subscriptions replaying history buffer live entries and
//! flush them after the last history sequence, so history always precedes
//! live and nothing is delivered twice.

use cubby_core::{LogEntry, LogLevel};
use cubby_proto::ws::{HubFrame, SubscriptionInfo, TargetKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Identifies one WebSocket connection.
pub type ClientId = u64;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-client outbound queue capacity, frames.
    pub queue_capacity: usize,
    /// History entries per replay batch.
    pub history_batch: usize,
    /// Interleave delay between replay batches.
    pub history_delay: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            history_batch: 100,
            history_delay: Duration::from_millis(10),
        }
    }
}

type SubKey = (ClientId, TargetKind, String);

enum SubMode {
    /// History is draining; live entries park here until the flush.
    Replaying { buffered: Vec<LogEntry> },
    Live,
}

struct Subscription {
    levels: Vec<LogLevel>,
    created_at: u64,
    mode: SubMode,
}

struct HubInner {
    clients: HashMap<ClientId, mpsc::Sender<HubFrame>>,
    subs: HashMap<SubKey, Subscription>,
}

pub struct Hub {
    inner: Mutex<HubInner>,
    next_client: AtomicU64,
    cfg: HubConfig,
}

/// Outcome of a subscribe call; duplicates return the existing binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    AlreadySubscribed,
}

impl Hub {
    pub fn new(cfg: HubConfig) -> Self {
        Self {
            inner: Mutex::new(HubInner { clients: HashMap::new(), subs: HashMap::new() }),
            next_client: AtomicU64::new(1),
            cfg,
        }
    }

    /// Register a connection; the receiver feeds the socket writer task.
    pub fn register_client(&self) -> (ClientId, mpsc::Receiver<HubFrame>) {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.cfg.queue_capacity);
        self.inner.lock().clients.insert(id, tx);
        (id, rx)
    }

    /// Drop a connection and every subscription it holds.
    pub fn disconnect(&self, client: ClientId) {
        let mut inner = self.inner.lock();
        inner.clients.remove(&client);
        inner.subs.retain(|(owner, _, _), _| *owner != client);
    }

    /// Push a frame to one client. Returns false when the client is gone
    /// or its queue is full (the caller should treat it as disconnected).
    pub fn send_to(&self, client: ClientId, frame: HubFrame) -> bool {
        let sender = { self.inner.lock().clients.get(&client).cloned() };
        match sender {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Create a subscription in replaying state. One subscription may exist
    /// per (client, kind, target); re-subscribing is a no-op.
    pub fn subscribe(
        &self,
        client: ClientId,
        kind: TargetKind,
        target_id: &str,
        levels: Vec<LogLevel>,
        created_at: u64,
    ) -> SubscribeOutcome {
        let mut inner = self.inner.lock();
        let key = (client, kind, target_id.to_string());
        if inner.subs.contains_key(&key) {
            return SubscribeOutcome::AlreadySubscribed;
        }
        inner.subs.insert(
            key,
            Subscription {
                levels,
                created_at,
                mode: SubMode::Replaying { buffered: Vec::new() },
            },
        );
        SubscribeOutcome::Created
    }

    /// Drain `history` to the subscriber in bounded batches, then flush any
    /// live entries that arrived during the drain and switch to live mode.
    ///
    /// `history` must already be level-filtered and in ascending sequence
    /// order (it comes straight from the target's ring).
    pub async fn finish_replay(
        &self,
        client: ClientId,
        kind: TargetKind,
        target_id: &str,
        history: Vec<LogEntry>,
    ) {
        let last_history_seq = history.last().map(|e| e.sequence).unwrap_or(0);

        for batch in history.chunks(self.cfg.history_batch.max(1)) {
            for entry in batch {
                let frame = HubFrame::Log {
                    data_type: kind,
                    target_id: target_id.to_string(),
                    log: entry.clone(),
                    is_history: true,
                };
                if !self.send_to(client, frame) {
                    self.disconnect(client);
                    return;
                }
            }
            if history.len() > self.cfg.history_batch {
                tokio::time::sleep(self.cfg.history_delay).await;
            }
        }

        // Flush buffered live entries past the history boundary and go
        // live. The flush happens under the table lock so publish() cannot
        // interleave a newer entry ahead of a buffered one; try_send keeps
        // the critical section non-blocking.
        let mut overflowed = false;
        {
            let mut inner = self.inner.lock();
            let HubInner { clients, subs } = &mut *inner;
            let key = (client, kind, target_id.to_string());
            let Some(sub) = subs.get_mut(&key) else { return };
            let buffered = match &mut sub.mode {
                SubMode::Replaying { buffered } => std::mem::take(buffered),
                SubMode::Live => return,
            };
            sub.mode = SubMode::Live;
            if let Some(sender) = clients.get(&client) {
                for entry in buffered {
                    if entry.sequence <= last_history_seq {
                        continue;
                    }
                    let frame = HubFrame::Log {
                        data_type: kind,
                        target_id: target_id.to_string(),
                        log: entry,
                        is_history: false,
                    };
                    if sender.try_send(frame).is_err() {
                        overflowed = true;
                        break;
                    }
                }
            }
        }
        if overflowed {
            self.disconnect(client);
        }
    }

    /// Remove one subscription. Returns false when it did not exist.
    pub fn unsubscribe(&self, client: ClientId, kind: TargetKind, target_id: &str) -> bool {
        self.inner.lock().subs.remove(&(client, kind, target_id.to_string())).is_some()
    }

    /// Active subscriptions of one client.
    pub fn list(&self, client: ClientId) -> Vec<SubscriptionInfo> {
        let inner = self.inner.lock();
        let mut subs: Vec<SubscriptionInfo> = inner
            .subs
            .iter()
            .filter(|((owner, _, _), _)| *owner == client)
            .map(|((_, kind, target_id), sub)| SubscriptionInfo {
                kind: *kind,
                target_id: target_id.clone(),
                levels: sub.levels.clone(),
                created_at: sub.created_at,
            })
            .collect();
        subs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.target_id.cmp(&b.target_id)));
        subs
    }

    /// Fan one log entry out to every matching subscription. Non-blocking:
    /// sends happen outside the table lock, and a full queue costs the
    /// subscriber its connection, never the producer.
    pub fn publish(&self, kind: TargetKind, target_id: &str, entry: &LogEntry) {
        let mut ready: Vec<(ClientId, mpsc::Sender<HubFrame>)> = Vec::new();
        {
            let mut inner = self.inner.lock();
            let HubInner { clients, subs } = &mut *inner;
            for ((owner, sub_kind, sub_target), sub) in subs.iter_mut() {
                if *sub_kind != kind || sub_target != target_id {
                    continue;
                }
                if !sub.levels.is_empty() && !sub.levels.contains(&entry.level) {
                    continue;
                }
                match &mut sub.mode {
                    SubMode::Replaying { buffered } => buffered.push(entry.clone()),
                    SubMode::Live => {
                        if let Some(tx) = clients.get(owner) {
                            ready.push((*owner, tx.clone()));
                        }
                    }
                }
            }
        }

        for (client, tx) in ready {
            let frame = HubFrame::Log {
                data_type: kind,
                target_id: target_id.to_string(),
                log: entry.clone(),
                is_history: false,
            };
            if tx.try_send(frame).is_err() {
                tracing::debug!(client, target_id, "slow subscriber dropped");
                self.disconnect(client);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn subscription_count(&self) -> usize {
        self.inner.lock().subs.len()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
