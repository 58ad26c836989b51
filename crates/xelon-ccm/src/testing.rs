//! In-memory stand-ins for the Xelon API and the Kubernetes service store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use xelon_api::{
    ApiError, BackendConfig, ClusterControlPlane, ClusterPool, ForwardingRule,
    ForwardingRuleUpdate, FrontendConfig, LoadBalancerCluster, LoadBalancerClusterStatus,
    VirtualIp, VirtualIpState,
};

use crate::cloud::CloudApi;
use crate::error::Result;
use crate::patcher::ServiceStore;

#[derive(Default)]
struct FakeState {
    clusters: Vec<LoadBalancerCluster>,
    virtual_ips: HashMap<String, Vec<VirtualIp>>,
    rules: HashMap<(String, String), Vec<ForwardingRule>>,
    next_id: u32,
    mutations: Vec<String>,
}

/// Load balancer side of the Xelon API kept in memory.
///
/// Mutating calls are recorded as `create:<port>`, `update:<backend id>` and
/// `delete:<frontend id>`. Creation yields to the scheduler before it runs.
#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster(self, id: &str, kubernetes_cluster_id: &str, status: &str) -> Self {
        self.state.lock().unwrap().clusters.push(LoadBalancerCluster {
            id: id.to_string(),
            name: format!("{id}-name"),
            status: LoadBalancerClusterStatus::from(status.to_string()),
            kubernetes_cluster_id: kubernetes_cluster_id.to_string(),
        });
        self
    }

    pub fn with_virtual_ip(self, cluster_id: &str, id: &str, address: &str, state: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .virtual_ips
            .entry(cluster_id.to_string())
            .or_default()
            .push(VirtualIp {
                id: id.to_string(),
                ip_address: address.to_string(),
                state: VirtualIpState::from(state.to_string()),
            });
        self
    }

    /// Existing rule with frontend id `<id>` and backend id `<id>-back`.
    pub fn with_rule(
        self,
        cluster_id: &str,
        virtual_ip_id: &str,
        id: &str,
        frontend_port: i32,
        backend_port: i32,
    ) -> Self {
        self.state
            .lock()
            .unwrap()
            .rules
            .entry((cluster_id.to_string(), virtual_ip_id.to_string()))
            .or_default()
            .push(ForwardingRule {
                frontend: Some(FrontendConfig {
                    id: id.to_string(),
                    port: frontend_port,
                }),
                backend: Some(BackendConfig {
                    id: format!("{id}-back"),
                    port: backend_port,
                    proxy_protocol: 0,
                }),
            });
        self
    }

    pub fn rules(&self, cluster_id: &str, virtual_ip_id: &str) -> Vec<ForwardingRule> {
        self.state
            .lock()
            .unwrap()
            .rules
            .get(&(cluster_id.to_string(), virtual_ip_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn control_plane(&self, cluster_id: &str) -> Result<ClusterControlPlane, ApiError> {
        Err(ApiError::not_found(format!("kubernetes cluster {cluster_id}")))
    }

    async fn cluster_pools(&self, cluster_id: &str) -> Result<Vec<ClusterPool>, ApiError> {
        Err(ApiError::not_found(format!("kubernetes cluster {cluster_id}")))
    }

    async fn load_balancer_clusters(&self) -> Result<Vec<LoadBalancerCluster>, ApiError> {
        Ok(self.state.lock().unwrap().clusters.clone())
    }

    async fn load_balancer_cluster(&self, id: &str) -> Result<LoadBalancerCluster, ApiError> {
        self.state
            .lock()
            .unwrap()
            .clusters
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("load balancer cluster {id}")))
    }

    async fn virtual_ips(&self, cluster_id: &str) -> Result<Vec<VirtualIp>, ApiError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .virtual_ips
            .get(cluster_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn virtual_ip(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<VirtualIp, ApiError> {
        self.state
            .lock()
            .unwrap()
            .virtual_ips
            .get(cluster_id)
            .and_then(|vips| vips.iter().find(|v| v.id == virtual_ip_id))
            .cloned()
            .ok_or_else(|| ApiError::not_found(format!("virtual ip {virtual_ip_id}")))
    }

    async fn forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        Ok(self.rules(cluster_id, virtual_ip_id))
    }

    async fn create_forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        rules: &[ForwardingRule],
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        // Suspend like a real request so concurrent callers get a chance to run.
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        let mut created = Vec::with_capacity(rules.len());
        for rule in rules {
            state.next_id += 1;
            let n = state.next_id;
            let mut rule = rule.clone();
            if let Some(frontend) = rule.frontend.as_mut() {
                frontend.id = format!("fr-{n}");
                state.mutations.push(format!("create:{}", frontend.port));
            }
            if let Some(backend) = rule.backend.as_mut() {
                backend.id = format!("fr-{n}-back");
            }
            created.push(rule);
        }
        state
            .rules
            .entry((cluster_id.to_string(), virtual_ip_id.to_string()))
            .or_default()
            .extend(created.iter().cloned());
        Ok(created)
    }

    async fn update_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        backend_id: &str,
        update: &ForwardingRuleUpdate,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("update:{backend_id}"));
        let backend = state
            .rules
            .get_mut(&(cluster_id.to_string(), virtual_ip_id.to_string()))
            .and_then(|rules| {
                rules
                    .iter_mut()
                    .filter_map(|r| r.backend.as_mut())
                    .find(|b| b.id == backend_id)
            })
            .ok_or_else(|| ApiError::not_found(format!("backend {backend_id}")))?;
        backend.port = update.port;
        backend.proxy_protocol = update.proxy_protocol;
        Ok(())
    }

    async fn delete_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        frontend_id: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.mutations.push(format!("delete:{frontend_id}"));
        let rules = state
            .rules
            .entry((cluster_id.to_string(), virtual_ip_id.to_string()))
            .or_default();
        let before = rules.len();
        rules.retain(|r| r.frontend_id() != Some(frontend_id));
        if rules.len() == before {
            return Err(ApiError::not_found(format!("frontend {frontend_id}")));
        }
        Ok(())
    }
}

/// Service store that records every merge patch it receives.
#[derive(Default)]
pub(crate) struct RecordingStore {
    patches: Mutex<Vec<Value>>,
}

impl RecordingStore {
    pub fn patches(&self) -> Vec<Value> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceStore for RecordingStore {
    async fn patch_service(&self, _namespace: &str, _name: &str, patch: &Value) -> Result<()> {
        self.patches.lock().unwrap().push(patch.clone());
        Ok(())
    }
}

/// `LoadBalancer` service `default/web` exposing `(port, node_port)` pairs.
pub(crate) fn load_balancer_service(ports: &[(i32, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(port, node_port)| ServicePort {
                        port: *port,
                        node_port: Some(*node_port),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}
