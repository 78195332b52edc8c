// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port monitor: a periodically refreshed snapshot of listening TCP ports.
//!
//! The scan loop does not start until the first `get` so idle agents stay
//! cheap; once started it keeps running. Scan failures are logged and the
//! last known snapshot keeps being served.

use cubby_core::{Clock, SystemClock};
use cubby_proto::PortsBody;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Socket state code for LISTEN in /proc/net/tcp.
const TCP_LISTEN: &str = "0A";

struct MonitorInner {
    snapshot: RwLock<PortsBody>,
    started: AtomicBool,
    excluded: Vec<u16>,
    interval: Duration,
    clock: SystemClock,
}

pub struct PortMonitor {
    inner: Arc<MonitorInner>,
}

impl PortMonitor {
    pub fn new(excluded: Vec<u16>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                snapshot: RwLock::new(PortsBody { ports: Vec::new(), last_updated_at: 0 }),
                started: AtomicBool::new(false),
                excluded,
                interval,
                clock: SystemClock,
            }),
        }
    }

    /// Latest snapshot; the first call performs a synchronous scan and
    /// starts the background loop.
    pub fn get(&self) -> PortsBody {
        if !self.inner.started.swap(true, Ordering::SeqCst) {
            self.inner.scan_once();
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(inner.interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The immediate first tick duplicates the synchronous scan.
                tick.tick().await;
                loop {
                    tick.tick().await;
                    inner.scan_once();
                }
            });
        }
        self.inner.snapshot.read().clone()
    }

    #[cfg(test)]
    pub(crate) fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }
}

impl MonitorInner {
    fn scan_once(&self) {
        match scan_listening_ports() {
            Ok(mut ports) => {
                ports.retain(|p| !self.excluded.contains(p));
                ports.sort_unstable();
                ports.dedup();
                let mut snapshot = self.snapshot.write();
                snapshot.ports = ports;
                snapshot.last_updated_at = self.clock.epoch_ms();
            }
            Err(e) => {
                tracing::warn!(error = %e, "port scan failed, serving last snapshot");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn scan_listening_ports() -> std::io::Result<Vec<u16>> {
    let mut ports = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(table) {
            Ok(content) => ports.extend(parse_proc_net_tcp(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(ports)
}

#[cfg(not(target_os = "linux"))]
fn scan_listening_ports() -> std::io::Result<Vec<u16>> {
    Ok(Vec::new())
}

/// Parse the kernel's tcp/tcp6 table: local address is field 1
/// (`hexip:hexport`), socket state is field 3.
fn parse_proc_net_tcp(content: &str) -> Vec<u16> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _slot = fields.next()?;
            let local = fields.next()?;
            let _remote = fields.next()?;
            let state = fields.next()?;
            if state != TCP_LISTEN {
                return None;
            }
            let port_hex = local.rsplit(':').next()?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
