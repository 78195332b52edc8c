// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Endpoint resolver: maps a devbox name to its agent base URL and bearer
//! token, with a TTL cache over the upstream API.
//!
//! Base URL priority: `agentServer.url` (service-name form combined with
//! the cluster's agent domain template) → first port's public address →
//! private address → `http://podIP:3000`. A devbox with neither a base URL
//! nor a token raises `devbox_not_ready` carrying the current status so
//! callers can poll.

use crate::error::ClientError;
use crate::upstream::{ClusterApi, DevboxDescriptor};
use cubby_core::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Agent fallback port when only a pod IP is known.
const DEFAULT_AGENT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub token: String,
}

struct Cached {
    endpoint: Endpoint,
    cached_at: u64,
}

pub struct EndpointResolver<C: Clock = SystemClock> {
    api: Arc<dyn ClusterApi>,
    cache: Mutex<HashMap<String, Cached>>,
    ttl: Duration,
    domain_template: Option<String>,
    clock: C,
}

impl EndpointResolver<SystemClock> {
    pub fn new(api: Arc<dyn ClusterApi>, ttl: Duration, domain_template: Option<String>) -> Self {
        Self::with_clock(api, ttl, domain_template, SystemClock)
    }
}

impl<C: Clock> EndpointResolver<C> {
    pub fn with_clock(
        api: Arc<dyn ClusterApi>,
        ttl: Duration,
        domain_template: Option<String>,
        clock: C,
    ) -> Self {
        Self { api, cache: Mutex::new(HashMap::new()), ttl, domain_template, clock }
    }

    /// Resolve, using the cache while fresh.
    pub async fn resolve(&self, name: &str) -> Result<Endpoint, ClientError> {
        let now = self.clock.epoch_ms();
        if let Some(cached) = self.cache.lock().get(name) {
            if now.saturating_sub(cached.cached_at) < self.ttl.as_millis() as u64 {
                return Ok(cached.endpoint.clone());
            }
        }

        let descriptor = self.api.get_devbox(name).await?;
        let endpoint = select_endpoint(&descriptor, self.domain_template.as_deref())?;
        self.cache
            .lock()
            .insert(name.to_string(), Cached { endpoint: endpoint.clone(), cached_at: now });
        Ok(endpoint)
    }

    /// Drop a cached entry (connection failures force a re-resolve).
    pub fn forget(&self, name: &str) {
        self.cache.lock().remove(name);
    }
}

/// Pick the agent base URL and token from a descriptor.
fn select_endpoint(
    descriptor: &DevboxDescriptor,
    domain_template: Option<&str>,
) -> Result<Endpoint, ClientError> {
    let not_ready = || ClientError::NotReady {
        name: descriptor.name.clone(),
        status: descriptor.status.clone(),
    };

    let token = descriptor
        .agent_server
        .as_ref()
        .map(|a| a.token.clone())
        .filter(|t| !t.is_empty())
        .ok_or_else(not_ready)?;

    // 1. agentServer.url: full URL, or service name + domain template.
    if let Some(agent) = &descriptor.agent_server {
        if !agent.url.is_empty() {
            if agent.url.starts_with("http://") || agent.url.starts_with("https://") {
                return Ok(Endpoint { base_url: trim_slash(&agent.url), token });
            }
            if let Some(template) = domain_template {
                let base_url = template.replace("{service}", &agent.url);
                return Ok(Endpoint { base_url: trim_slash(&base_url), token });
            }
        }
    }

    // 2. Port addresses, public before private.
    for port in &descriptor.ports {
        for address in [&port.public_address, &port.private_address].into_iter().flatten() {
            if !address.is_empty() {
                return Ok(Endpoint { base_url: trim_slash(&with_scheme(address)), token });
            }
        }
    }

    // 3. Pod IP fallback.
    if let Some(pod_ip) = descriptor.pod_ip.as_deref().filter(|ip| !ip.is_empty()) {
        return Ok(Endpoint {
            base_url: format!("http://{pod_ip}:{DEFAULT_AGENT_PORT}"),
            token,
        });
    }

    Err(not_ready())
}

fn with_scheme(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

fn trim_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
