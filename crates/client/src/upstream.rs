// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream cluster API: the small read/lifecycle interface the SDK
//! consumes. The API itself is an external collaborator; everything here
//! is the client's view of it.

use crate::error::ClientError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cubby_proto::ErrorCode;
use serde::{Deserialize, Serialize};

/// Devbox descriptor as returned by the cluster API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevboxDescriptor {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub pod_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<DevboxPort>,
    #[serde(default)]
    pub agent_server: Option<AgentServerInfo>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevboxPort {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub private_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentServerInfo {
    /// Either a full URL or a bare service name combined with the cluster's
    /// agent domain template.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDevboxRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Pause,
    Restart,
    Shutdown,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Pause => "pause",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Shutdown => "shutdown",
        }
    }
}

/// What the SDK needs from the cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_devbox(&self, name: &str) -> Result<DevboxDescriptor, ClientError>;
    async fn list_devboxes(&self) -> Result<Vec<DevboxDescriptor>, ClientError>;
    async fn create_devbox(&self, req: &CreateDevboxRequest)
        -> Result<DevboxDescriptor, ClientError>;
    async fn lifecycle(&self, name: &str, action: LifecycleAction) -> Result<(), ClientError>;
    async fn delete_devbox(&self, name: &str) -> Result<(), ClientError>;
}

/// HTTP implementation against the cluster management API.
pub struct HttpClusterApi {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl HttpClusterApi {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url: trim_slash(base_url.into()), token: token.into(), http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(
        &self,
        response: reqwest::Response,
        name: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        let code = match status.as_u16() {
            404 => ErrorCode::DevboxNotFound,
            401 | 403 => ErrorCode::Unauthorized,
            409 => ErrorCode::Conflict,
            500..=599 => ErrorCode::ServerUnavailable,
            _ => ErrorCode::InternalError,
        };
        Err(ClientError::Upstream {
            message: format!("{name}: http {status}: {}", message.trim()),
            code,
        })
    }
}

fn trim_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn get_devbox(&self, name: &str) -> Result<DevboxDescriptor, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/devboxes/{name}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = self.check(response, "get devbox").await?;
        Ok(response.json().await?)
    }

    async fn list_devboxes(&self) -> Result<Vec<DevboxDescriptor>, ClientError> {
        let response = self
            .http
            .get(self.url("/api/v1/devboxes"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = self.check(response, "list devboxes").await?;
        Ok(response.json().await?)
    }

    async fn create_devbox(
        &self,
        req: &CreateDevboxRequest,
    ) -> Result<DevboxDescriptor, ClientError> {
        let response = self
            .http
            .post(self.url("/api/v1/devboxes"))
            .bearer_auth(&self.token)
            .json(req)
            .send()
            .await?;
        let response = self.check(response, "create devbox").await?;
        Ok(response.json().await?)
    }

    async fn lifecycle(&self, name: &str, action: LifecycleAction) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/devboxes/{name}/{}", action.as_str())))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response, action.as_str()).await.map(|_| ())
    }

    async fn delete_devbox(&self, name: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/devboxes/{name}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response, "delete devbox").await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "upstream_tests.rs"]
mod tests;
