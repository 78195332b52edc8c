// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use cubby_proto::Envelope;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthBody {
    version: &'static str,
    uptime_secs: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<Envelope<HealthBody>> {
    Json(Envelope::ok(HealthBody {
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

pub async fn ready() -> Json<Envelope<()>> {
    Json(Envelope::ack())
}

pub async fn live() -> Json<Envelope<()>> {
    Json(Envelope::ack())
}
