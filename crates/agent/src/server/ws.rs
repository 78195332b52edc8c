// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint: bridges sockets to the log fan-out hub.
//!
//! The writer task drains the client's hub queue and keeps the ping
//! schedule; the reader loop parses subscription actions and enforces the
//! read timeout. Disconnect reaps the client's subscriptions synchronously.

use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use cubby_core::{Clock, SystemClock};
use cubby_proto::ws::{ClientAction, HubFrame, TargetKind};
use cubby_proto::{ErrorBody, ErrorCode};
use futures_util::{SinkExt, StreamExt};

pub async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let ws = ws.max_message_size(state.cfg.max_message_size);
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (client_id, mut frames) = state.hub.register_client();
    let (mut sink, mut stream) = socket.split();

    let ping_period = state.cfg.ping_period();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    // Hub disconnected this client (slow consumer or reap).
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let read_timeout = state.cfg.read_timeout();
    loop {
        match tokio::time::timeout(read_timeout, stream.next()).await {
            // Missed reads past the deadline: drop the client.
            Err(_) => {
                tracing::debug!(client_id, "ws read timeout");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(Message::Text(text)))) => handle_action(&state, client_id, &text),
            Ok(Some(Ok(Message::Close(_)))) => break,
            // Pings are answered by axum; pongs just reset the deadline.
            Ok(Some(Ok(_))) => {}
        }
    }

    state.hub.disconnect(client_id);
    writer.abort();
}

fn send_error(state: &AppState, client_id: u64, code: ErrorCode, detail: &str) {
    let body = ErrorBody::new(code, detail);
    state.hub.send_to(
        client_id,
        HubFrame::Error { status: body.status, message: body.message },
    );
}

fn handle_action(state: &AppState, client_id: u64, text: &str) {
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            send_error(state, client_id, ErrorCode::InvalidRequest, &e.to_string());
            return;
        }
    };

    match action {
        ClientAction::Subscribe { kind, target_id, options } => {
            let exists = match kind {
                TargetKind::Process => state.processes.status(&target_id).is_ok(),
                TargetKind::Session => state.sessions.info(&target_id).is_ok(),
            };
            if !exists {
                let code = match kind {
                    TargetKind::Process => ErrorCode::ProcessNotFound,
                    TargetKind::Session => ErrorCode::SessionNotFound,
                };
                send_error(state, client_id, code, &target_id);
                return;
            }

            let outcome = state.hub.subscribe(
                client_id,
                kind,
                &target_id,
                options.levels.clone(),
                SystemClock.epoch_ms(),
            );
            state
                .hub
                .send_to(client_id, HubFrame::Subscribed { data_type: kind, target_id: target_id.clone() });

            if outcome == crate::hub::SubscribeOutcome::Created {
                let tail = options.tail as usize;
                let history = if tail > 0 {
                    let fetched = match kind {
                        TargetKind::Process => {
                            state.processes.logs(&target_id, tail, &options.levels)
                        }
                        TargetKind::Session => {
                            state.sessions.logs(&target_id, tail, &options.levels)
                        }
                    };
                    fetched.unwrap_or_default()
                } else {
                    Vec::new()
                };
                let hub = std::sync::Arc::clone(&state.hub);
                tokio::spawn(async move {
                    hub.finish_replay(client_id, kind, &target_id, history).await;
                });
            }
        }
        ClientAction::Unsubscribe { kind, target_id } => {
            if state.hub.unsubscribe(client_id, kind, &target_id) {
                state
                    .hub
                    .send_to(client_id, HubFrame::Unsubscribed { data_type: kind, target_id });
            } else {
                send_error(state, client_id, ErrorCode::NotFound, "no such subscription");
            }
        }
        ClientAction::List => {
            state.hub.send_to(
                client_id,
                HubFrame::Subscriptions { subscriptions: state.hub.list(client_id) },
            );
        }
    }
}
