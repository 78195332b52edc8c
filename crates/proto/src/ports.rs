// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};

/// Snapshot of listening TCP ports with its freshness timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortsBody {
    pub ports: Vec<u16>,
    /// Unix epoch milliseconds of the scan that produced this snapshot;
    /// zero when no scan has completed yet.
    pub last_updated_at: u64,
}
