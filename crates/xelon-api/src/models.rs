//! Xelon API resources
//!
//! Wire representations of the HQ resources this client touches. Only the
//! fields the controller manager reads are modelled; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant owning the API token.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
}

/// Compute sizing shared by control planes and cluster pools.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineShape {
    #[serde(default)]
    pub cpu_core_count: u32,
    /// Memory in gigabytes.
    #[serde(default)]
    pub memory: u32,
    /// Disk size in gigabytes.
    #[serde(default)]
    pub disk_size: u32,
}

/// Virtual machine backing a Kubernetes node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClusterNode {
    #[serde(rename = "localvmid")]
    pub local_vm_id: String,
    #[serde(default)]
    pub name: String,
}

/// Control plane of a managed Kubernetes cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClusterControlPlane {
    #[serde(flatten)]
    pub shape: MachineShape,
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
}

/// Worker pool of a managed Kubernetes cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ClusterPool {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub shape: MachineShape,
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
}

/// Lifecycle status of a load balancer cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum LoadBalancerClusterStatus {
    Active,
    Provisioning,
    #[default]
    Unknown,
    Other(String),
}

impl From<String> for LoadBalancerClusterStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Active" => Self::Active,
            "Provisioning" => Self::Provisioning,
            "" => Self::Unknown,
            _ => Self::Other(value),
        }
    }
}

impl From<LoadBalancerClusterStatus> for String {
    fn from(value: LoadBalancerClusterStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for LoadBalancerClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("Active"),
            Self::Provisioning => f.write_str("Provisioning"),
            Self::Unknown => f.write_str(""),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// A load balancer cluster hosting one or more virtual IPs.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerCluster {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: LoadBalancerClusterStatus,
    /// Kubernetes cluster the load balancer cluster was provisioned for.
    #[serde(default)]
    pub kubernetes_cluster_id: String,
}

/// Allocation state of a virtual IP.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum VirtualIpState {
    #[default]
    Free,
    Reserved,
    Other(String),
}

impl From<String> for VirtualIpState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "free" | "" => Self::Free,
            "reserved" => Self::Reserved,
            _ => Self::Other(value),
        }
    }
}

impl From<VirtualIpState> for String {
    fn from(value: VirtualIpState) -> Self {
        match value {
            VirtualIpState::Free => "free".to_string(),
            VirtualIpState::Reserved => "reserved".to_string(),
            VirtualIpState::Other(state) => state,
        }
    }
}

/// Stable address owned by a load balancer cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualIp {
    pub id: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub state: VirtualIpState,
}

/// Externally reachable side of a forwarding rule.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FrontendConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub port: i32,
}

/// Node-facing side of a forwarding rule.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub port: i32,
    /// 0 disables PROXY protocol, 1 and 2 select the protocol version.
    #[serde(default)]
    pub proxy_protocol: i32,
}

/// Frontend port to backend port mapping on a virtual IP.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ForwardingRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<FrontendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
}

impl ForwardingRule {
    /// Rule with no cloud-assigned ids, as submitted for creation.
    pub fn new(frontend_port: i32, backend_port: i32, proxy_protocol: i32) -> Self {
        Self {
            frontend: Some(FrontendConfig {
                id: String::new(),
                port: frontend_port,
            }),
            backend: Some(BackendConfig {
                id: String::new(),
                port: backend_port,
                proxy_protocol,
            }),
        }
    }

    pub fn frontend_port(&self) -> Option<i32> {
        self.frontend.as_ref().map(|f| f.port)
    }

    pub fn frontend_id(&self) -> Option<&str> {
        self.frontend.as_ref().map(|f| f.id.as_str())
    }
}

/// Request body for updating the backend side of a forwarding rule.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingRuleUpdate {
    pub port: i32,
    pub proxy_protocol: i32,
}
