//! HTTP client for the Xelon HQ API

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::ApiError;
use crate::models::{
    ClusterControlPlane, ClusterPool, ForwardingRule, ForwardingRuleUpdate, LoadBalancerCluster,
    Tenant, VirtualIp,
};

/// Production HQ endpoint.
pub const DEFAULT_BASE_URL: &str = "https://hq.xelon.ch/api/service/";

const CLIENT_ID_HEADER: &str = "x-user-id";

/// Optional client settings.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Overrides [`DEFAULT_BASE_URL`].
    pub base_url: Option<String>,
    /// Sent as `X-User-Id` when present.
    pub client_id: Option<String>,
    pub user_agent: Option<String>,
    /// Per-request timeout. None leaves deadlines to the caller.
    pub timeout: Option<Duration>,
}

/// Stateless Xelon API client. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    pub fn new(token: &str, options: ClientOptions) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ApiError::Config("token contains invalid characters".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        if let Some(client_id) = options.client_id.as_deref().filter(|id| !id.is_empty()) {
            let value = HeaderValue::from_str(client_id)
                .map_err(|_| ApiError::Config("client id contains invalid characters".to_string()))?;
            headers.insert(CLIENT_ID_HEADER, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(user_agent) = &options.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        let base_url = options
            .base_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            http,
            base_url: normalize_base_url(&base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Tenant the token belongs to.
    pub async fn current_tenant(&self) -> Result<Tenant, ApiError> {
        self.get("tenants/current").await
    }

    /// Control plane (and its nodes) of a managed Kubernetes cluster.
    pub async fn control_plane(&self, cluster_id: &str) -> Result<ClusterControlPlane, ApiError> {
        self.get(&format!("kubernetes/{cluster_id}/controlPlane"))
            .await
    }

    /// Worker pools (and their nodes) of a managed Kubernetes cluster.
    pub async fn cluster_pools(&self, cluster_id: &str) -> Result<Vec<ClusterPool>, ApiError> {
        self.get(&format!("kubernetes/{cluster_id}/pools")).await
    }

    pub async fn load_balancer_clusters(&self) -> Result<Vec<LoadBalancerCluster>, ApiError> {
        self.get("loadBalancerClusters").await
    }

    pub async fn load_balancer_cluster(&self, id: &str) -> Result<LoadBalancerCluster, ApiError> {
        self.get(&format!("loadBalancerClusters/{id}")).await
    }

    pub async fn virtual_ips(&self, cluster_id: &str) -> Result<Vec<VirtualIp>, ApiError> {
        self.get(&format!("loadBalancerClusters/{cluster_id}/virtualIps"))
            .await
    }

    pub async fn virtual_ip(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<VirtualIp, ApiError> {
        self.get(&format!(
            "loadBalancerClusters/{cluster_id}/virtualIps/{virtual_ip_id}"
        ))
        .await
    }

    pub async fn forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        self.get(&rules_path(cluster_id, virtual_ip_id)).await
    }

    /// Create rules in one batch. Returns the created rules with cloud-assigned ids.
    pub async fn create_forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        rules: &[ForwardingRule],
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        self.post(&rules_path(cluster_id, virtual_ip_id), rules)
            .await
    }

    /// Update the backend side of a rule, addressed by its backend id.
    pub async fn update_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        backend_id: &str,
        update: &ForwardingRuleUpdate,
    ) -> Result<(), ApiError> {
        let path = format!("{}/{backend_id}", rules_path(cluster_id, virtual_ip_id));
        let url = self.url(&path);
        debug!(url = %url, "PUT");
        self.send(self.http.put(url).json(update)).await?;
        Ok(())
    }

    /// Delete a rule, addressed by its frontend id.
    pub async fn delete_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        frontend_id: &str,
    ) -> Result<(), ApiError> {
        let path = format!("{}/{frontend_id}", rules_path(cluster_id, virtual_ip_id));
        let url = self.url(&path);
        debug!(url = %url, "DELETE");
        self.send(self.http.delete(url)).await?;
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.send(self.http.get(url)).await?;
        response.json().await.map_err(ApiError::Decode)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self.send(self.http.post(url).json(body)).await?;
        response.json().await.map_err(ApiError::Decode)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(ApiError::Transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status,
            message: error_message(&body),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn rules_path(cluster_id: &str, virtual_ip_id: &str) -> String {
    format!("loadBalancerClusters/{cluster_id}/virtualIps/{virtual_ip_id}/forwardingRules")
}

fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

/// Prefer the `message`/`error` field of a JSON error body over the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
