// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec harness: a real agent on a loopback port plus a client
//! wired to it through a static cluster API.

use async_trait::async_trait;
use cubby_agent::{build_state, serve_with_listener, AgentConfig};
use cubby_client::{
    AgentServerInfo, ClientConfig, ClusterApi, CreateDevboxRequest, CubbyClient,
    DevboxDescriptor, LifecycleAction,
};
use cubby_client::{ClientError, Devbox};
use std::sync::Arc;
use tempfile::TempDir;

pub const SPEC_TOKEN: &str = "spec-token";
pub const DEVBOX: &str = "spec-devbox";

pub struct TestAgent {
    pub base_url: String,
    pub workspace: TempDir,
    client: CubbyClient,
}

/// Cluster API stub that always resolves to the local test agent.
struct StaticClusterApi {
    descriptor: DevboxDescriptor,
}

#[async_trait]
impl ClusterApi for StaticClusterApi {
    async fn get_devbox(&self, _name: &str) -> Result<DevboxDescriptor, ClientError> {
        Ok(self.descriptor.clone())
    }

    async fn list_devboxes(&self) -> Result<Vec<DevboxDescriptor>, ClientError> {
        Ok(vec![self.descriptor.clone()])
    }

    async fn create_devbox(
        &self,
        _req: &CreateDevboxRequest,
    ) -> Result<DevboxDescriptor, ClientError> {
        Ok(self.descriptor.clone())
    }

    async fn lifecycle(
        &self,
        _name: &str,
        _action: LifecycleAction,
    ) -> Result<(), ClientError> {
        Ok(())
    }

    async fn delete_devbox(&self, _name: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

impl TestAgent {
    /// Boot an agent with a fresh workspace and a short kill grace.
    pub async fn start() -> Self {
        let workspace = TempDir::new().expect("workspace tempdir");
        let mut cfg = AgentConfig::with_defaults(workspace.path());
        cfg.token = Some(SPEC_TOKEN.to_string());
        cfg.kill_grace_ms = 500;
        cfg.exec_timeout_ms = 10_000;

        let state = build_state(cfg, SPEC_TOKEN.to_string());
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = serve_with_listener(listener, state).await;
        });

        let base_url = format!("http://{addr}");
        let descriptor = DevboxDescriptor {
            name: DEVBOX.to_string(),
            status: "Running".to_string(),
            pod_ip: None,
            ports: Vec::new(),
            agent_server: Some(AgentServerInfo {
                url: base_url.clone(),
                token: SPEC_TOKEN.to_string(),
            }),
            created_at: None,
        };
        let client = CubbyClient::with_api(
            ClientConfig::default(),
            Arc::new(StaticClusterApi { descriptor }),
        );

        Self { base_url, workspace, client }
    }

    pub fn devbox(&self) -> Devbox {
        self.client.devbox(DEVBOX)
    }

    /// Raw request helper for specs that assert on the wire shape itself.
    pub async fn raw_post(&self, path: &str, body: serde_json::Value) -> serde_json::Value {
        let response = reqwest::Client::new()
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(SPEC_TOKEN)
            .json(&body)
            .send()
            .await
            .expect("raw request");
        response.json().await.expect("json body")
    }
}
