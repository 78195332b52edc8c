// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client configuration.
//!
//! The SDK reads the environment first and falls back to coded defaults;
//! callers can still override any field on the struct before building the
//! client.

use crate::pool::HandoutStrategy;
use crate::retry::RetryPolicy;
use std::time::Duration;

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis)
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse::<usize>().ok())
}

/// Connection pool tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub strategy: HandoutStrategy,
    /// A healthy connection younger than this is handed out without a
    /// fresh probe.
    pub keep_alive: Duration,
    /// Idle connections older than this are reaped.
    pub max_idle: Duration,
    pub health_check_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 15,
            strategy: HandoutStrategy::LeastUsed,
            keep_alive: Duration::from_secs(30),
            max_idle: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream cluster API base URL.
    pub api_url: String,
    /// Bearer token for the upstream API (agent tokens come from the
    /// endpoint resolver, never from here).
    pub api_token: String,
    /// Template for service-name agent URLs, e.g.
    /// `https://{service}.devbox.example.com`.
    pub agent_domain_template: Option<String>,
    /// Endpoint cache TTL.
    pub endpoint_ttl: Duration,
    /// Per-request deadline.
    pub http_timeout: Duration,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            api_token: String::new(),
            agent_domain_template: None,
            endpoint_ttl: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Environment-first construction: every field falls back to the coded
    /// default when its variable is absent.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut pool = PoolConfig::default();
        if let Some(size) = env_usize("CUBBY_POOL_MAX_SIZE") {
            pool.max_size = size.max(1);
        }
        if let Some(strategy) = env_string("CUBBY_POOL_STRATEGY") {
            if let Ok(parsed) = strategy.parse() {
                pool.strategy = parsed;
            }
        }
        if let Some(keep_alive) = env_ms("CUBBY_POOL_KEEP_ALIVE_MS") {
            pool.keep_alive = keep_alive;
        }
        if let Some(max_idle) = env_ms("CUBBY_POOL_MAX_IDLE_MS") {
            pool.max_idle = max_idle;
        }

        Self {
            api_url: env_string("CUBBY_API_URL").unwrap_or(defaults.api_url),
            api_token: env_string("CUBBY_API_TOKEN").unwrap_or_default(),
            agent_domain_template: env_string("CUBBY_AGENT_DOMAIN"),
            endpoint_ttl: env_ms("CUBBY_ENDPOINT_TTL_MS").unwrap_or(defaults.endpoint_ttl),
            http_timeout: env_ms("CUBBY_HTTP_TIMEOUT_MS").unwrap_or(defaults.http_timeout),
            pool,
            retry: RetryPolicy::default(),
        }
    }
}
