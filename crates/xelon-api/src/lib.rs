//! Xelon API client
//!
//! Minimal async client for the parts of the Xelon HQ API used by the cloud
//! controller manager: managed Kubernetes inventory and load balancer clusters.
//!
//! HTTP 404 is surfaced as [`ApiError::is_not_found`]; every other failure is
//! returned as-is. The client performs no retries.

pub mod client;
pub mod error;
pub mod models;

pub use client::{Client, ClientOptions, DEFAULT_BASE_URL};
pub use error::ApiError;
pub use models::{
    BackendConfig, ClusterControlPlane, ClusterNode, ClusterPool, ForwardingRule,
    ForwardingRuleUpdate, FrontendConfig, LoadBalancerCluster, LoadBalancerClusterStatus,
    MachineShape, Tenant, VirtualIp, VirtualIpState,
};
