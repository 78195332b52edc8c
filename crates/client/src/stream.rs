// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket log streaming: the client half of the log fan-out hub.

use crate::error::ClientError;
use cubby_proto::ws::{ClientAction, HubFrame, SubscribeOptions, TargetKind};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One live subscription socket against an agent's `/ws` endpoint.
pub struct LogStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

fn ws_error(e: impl std::fmt::Display) -> ClientError {
    ClientError::Ws(e.to_string())
}

/// `http(s)://…` → `ws(s)://…`.
fn to_ws_url(base_url: &str) -> Result<String, ClientError> {
    if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws"))
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws"))
    } else {
        Err(ClientError::Ws(format!("unsupported base url {base_url:?}")))
    }
}

impl LogStream {
    pub(crate) async fn connect(base_url: &str, token: &str) -> Result<Self, ClientError> {
        let mut request = to_ws_url(base_url)?.into_client_request().map_err(ws_error)?;
        let bearer =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(ws_error)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        let (ws, _) = connect_async(request).await.map_err(ws_error)?;
        Ok(Self { ws })
    }

    async fn send_action(&mut self, action: &ClientAction) -> Result<(), ClientError> {
        let text = serde_json::to_string(action).map_err(ws_error)?;
        self.ws.send(Message::Text(text.into())).await.map_err(ws_error)
    }

    /// Subscribe to one target's log stream. History (when `tail` is set)
    /// arrives flagged `isHistory: true` before any live entry.
    pub async fn subscribe(
        &mut self,
        kind: TargetKind,
        target_id: impl Into<String>,
        options: SubscribeOptions,
    ) -> Result<(), ClientError> {
        self.send_action(&ClientAction::Subscribe {
            kind,
            target_id: target_id.into(),
            options,
        })
        .await
    }

    pub async fn unsubscribe(
        &mut self,
        kind: TargetKind,
        target_id: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send_action(&ClientAction::Unsubscribe { kind, target_id: target_id.into() }).await
    }

    /// Ask the hub for this connection's active subscriptions; the answer
    /// arrives as a `subscriptions` frame.
    pub async fn request_list(&mut self) -> Result<(), ClientError> {
        self.send_action(&ClientAction::List).await
    }

    /// Next hub frame; `None` when the hub closed the connection.
    pub async fn next_frame(&mut self) -> Result<Option<HubFrame>, ClientError> {
        loop {
            match self.ws.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(ws_error(e)),
                Some(Ok(Message::Text(text))) => {
                    let frame =
                        serde_json::from_str::<HubFrame>(&text).map_err(ws_error)?;
                    return Ok(Some(frame));
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Ping(payload))) => {
                    self.ws.send(Message::Pong(payload)).await.map_err(ws_error)?;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
