// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health-checked connection pool.
//!
//! One pool per (devbox, base URL). A connection is handed out only while
//! healthy: fresh probes are skipped inside the keep-alive window, stale
//! slots are re-probed on handout, unhealthy ones dropped. Health probes
//! use a dedicated out-of-pool transport so checking never consumes the
//! pool itself.

use crate::config::PoolConfig;
use crate::error::ClientError;
use cubby_core::{Clock, SystemClock};
use cubby_proto::{ErrorBody, ErrorCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoutStrategy {
    LeastUsed,
    Random,
    RoundRobin,
}

impl FromStr for HandoutStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least-used" | "least_used" => Ok(HandoutStrategy::LeastUsed),
            "random" => Ok(HandoutStrategy::Random),
            "round-robin" | "round_robin" => Ok(HandoutStrategy::RoundRobin),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Diagnostic snapshot of one pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub id: u64,
    pub created_at: u64,
    pub last_used: u64,
    pub use_count: u64,
    pub health: HealthStatus,
    pub active: bool,
}

struct Slot {
    id: u64,
    client: reqwest::Client,
    created_at: u64,
    last_used: u64,
    last_probe: u64,
    use_count: u64,
    health: HealthStatus,
    active: bool,
}

struct PoolInner<C: Clock> {
    devbox: String,
    base_url: String,
    cfg: PoolConfig,
    http_timeout: Duration,
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
    rr: AtomicUsize,
    /// Dedicated probe transport, never handed out.
    probe: reqwest::Client,
    clock: C,
}

pub struct ConnectionPool<C: Clock = SystemClock> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Clock> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// A borrowed connection; dropping it returns the slot to the pool.
pub struct PooledConnection<C: Clock = SystemClock> {
    pool: ConnectionPool<C>,
    slot_id: u64,
    pub client: reqwest::Client,
}

impl<C: Clock> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.release(self.slot_id);
    }
}

impl<C: Clock> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("slot_id", &self.slot_id).finish()
    }
}

enum Next {
    Fresh(u64, reqwest::Client),
    Probe(u64, reqwest::Client),
    Create,
    Exhausted,
}

impl ConnectionPool<SystemClock> {
    pub fn new(
        devbox: impl Into<String>,
        base_url: impl Into<String>,
        cfg: PoolConfig,
        http_timeout: Duration,
    ) -> Result<Self, ClientError> {
        Self::with_clock(devbox, base_url, cfg, http_timeout, SystemClock)
    }
}

impl<C: Clock> ConnectionPool<C> {
    pub fn with_clock(
        devbox: impl Into<String>,
        base_url: impl Into<String>,
        cfg: PoolConfig,
        http_timeout: Duration,
        clock: C,
    ) -> Result<Self, ClientError> {
        let probe = reqwest::Client::builder().timeout(cfg.probe_timeout).build()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                devbox: devbox.into(),
                base_url: base_url.into(),
                cfg,
                http_timeout,
                slots: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                rr: AtomicUsize::new(0),
                probe,
                clock,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Borrow a connection, probing stale slots and growing the pool up to
    /// `max_size`. Errors with `connection_pool_exhausted` when the pool is
    /// full and nothing is usable.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, ClientError> {
        let inner = &self.inner;
        loop {
            match self.pick() {
                Next::Fresh(slot_id, client) => {
                    return Ok(PooledConnection { pool: self.clone(), slot_id, client })
                }
                Next::Probe(slot_id, client) => {
                    let healthy = self.probe_health().await;
                    let now = inner.clock.epoch_ms();
                    let mut slots = inner.slots.lock();
                    let Some(idx) = slots.iter().position(|s| s.id == slot_id) else { continue };
                    if healthy {
                        let slot = &mut slots[idx];
                        slot.health = HealthStatus::Healthy;
                        slot.last_probe = now;
                        slot.active = true;
                        slot.use_count += 1;
                        slot.last_used = now;
                        drop(slots);
                        return Ok(PooledConnection { pool: self.clone(), slot_id, client });
                    }
                    tracing::debug!(
                        devbox = %inner.devbox,
                        slot_id,
                        "dropping unhealthy connection"
                    );
                    slots.remove(idx);
                }
                Next::Create => {
                    if !self.probe_health().await {
                        return Err(ClientError::Api(
                            ErrorBody::new(
                                ErrorCode::ConnectionFailed,
                                format!("health probe failed for {}", inner.base_url),
                            )
                            .with_context("devbox", &inner.devbox),
                        ));
                    }
                    let client = reqwest::Client::builder()
                        .timeout(inner.http_timeout)
                        .pool_max_idle_per_host(1)
                        .build()?;
                    let now = inner.clock.epoch_ms();
                    let mut slots = inner.slots.lock();
                    if slots.len() >= inner.cfg.max_size {
                        // Lost a race while probing; try the pick again.
                        continue;
                    }
                    let slot_id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                    slots.push(Slot {
                        id: slot_id,
                        client: client.clone(),
                        created_at: now,
                        last_used: now,
                        last_probe: now,
                        use_count: 1,
                        health: HealthStatus::Healthy,
                        active: true,
                    });
                    drop(slots);
                    return Ok(PooledConnection { pool: self.clone(), slot_id, client });
                }
                Next::Exhausted => {
                    return Err(ClientError::PoolExhausted { devbox: inner.devbox.clone() })
                }
            }
        }
    }

    fn pick(&self) -> Next {
        let inner = &self.inner;
        let mut slots = inner.slots.lock();
        let now = inner.clock.epoch_ms();
        let inactive: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.active)
            .map(|(i, _)| i)
            .collect();

        if inactive.is_empty() {
            return if slots.len() < inner.cfg.max_size { Next::Create } else { Next::Exhausted };
        }

        let idx = match inner.cfg.strategy {
            HandoutStrategy::LeastUsed => inactive
                .iter()
                .copied()
                .min_by_key(|i| slots[*i].use_count)
                .unwrap_or(inactive[0]),
            HandoutStrategy::RoundRobin => {
                inactive[inner.rr.fetch_add(1, Ordering::Relaxed) % inactive.len()]
            }
            HandoutStrategy::Random => {
                use rand::Rng;
                inactive[rand::thread_rng().gen_range(0..inactive.len())]
            }
        };

        let slot = &mut slots[idx];
        let fresh = slot.health == HealthStatus::Healthy
            && now.saturating_sub(slot.last_probe) < inner.cfg.keep_alive.as_millis() as u64;
        if fresh {
            slot.active = true;
            slot.use_count += 1;
            slot.last_used = now;
            Next::Fresh(slot.id, slot.client.clone())
        } else {
            Next::Probe(slot.id, slot.client.clone())
        }
    }

    fn release(&self, slot_id: u64) {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == slot_id) {
            slot.active = false;
            slot.last_used = self.inner.clock.epoch_ms();
        }
    }

    async fn probe_health(&self) -> bool {
        let url = format!("{}/health", self.inner.base_url);
        match self.inner.probe.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(devbox = %self.inner.devbox, error = %e, "health probe failed");
                false
            }
        }
    }

    /// One maintenance pass: refresh inactive slots' health and reap those
    /// idle past `max_idle`.
    pub async fn maintain(&self) {
        let healthy = self.probe_health().await;
        let inner = &self.inner;
        let now = inner.clock.epoch_ms();
        let max_idle = inner.cfg.max_idle.as_millis() as u64;
        let mut slots = inner.slots.lock();
        for slot in slots.iter_mut().filter(|s| !s.active) {
            slot.health = if healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy };
            slot.last_probe = now;
        }
        slots.retain(|s| {
            s.active
                || (s.health == HealthStatus::Healthy
                    && now.saturating_sub(s.last_used) < max_idle)
        });
    }

    /// Background maintenance loop at `health_check_interval`.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.inner.cfg.health_check_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                pool.maintain().await;
            }
        })
    }

    /// Point-in-time view of every slot, for diagnostics.
    pub fn stats(&self) -> Vec<ConnectionStats> {
        self.inner
            .slots
            .lock()
            .iter()
            .map(|s| ConnectionStats {
                id: s.id,
                created_at: s.created_at,
                last_used: s.last_used,
                use_count: s.use_count,
                health: s.health,
                active: s.active,
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn use_counts(&self) -> Vec<u64> {
        self.inner.slots.lock().iter().map(|s| s.use_count).collect()
    }
}

/// Pools keyed by (devbox, base URL); creation spawns the maintenance loop.
pub struct PoolManager {
    pools: Mutex<HashMap<(String, String), ConnectionPool>>,
    cfg: PoolConfig,
    http_timeout: Duration,
}

impl PoolManager {
    pub fn new(cfg: PoolConfig, http_timeout: Duration) -> Self {
        Self { pools: Mutex::new(HashMap::new()), cfg, http_timeout }
    }

    pub fn get(&self, devbox: &str, base_url: &str) -> Result<ConnectionPool, ClientError> {
        let key = (devbox.to_string(), base_url.to_string());
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }
        let pool =
            ConnectionPool::new(devbox, base_url, self.cfg.clone(), self.http_timeout)?;
        pool.spawn_maintenance();
        pools.insert(key, pool.clone());
        Ok(pool)
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
