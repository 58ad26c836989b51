//! Cloud API seam
//!
//! The node cache and the load balancer orchestrator talk to Xelon through
//! [`CloudApi`] so they can be exercised without a live HQ endpoint.

use async_trait::async_trait;
use xelon_api::{
    ApiError, ClusterControlPlane, ClusterPool, ForwardingRule, ForwardingRuleUpdate,
    LoadBalancerCluster, VirtualIp,
};

#[cfg(test)]
use mockall::automock;

/// Xelon inventory and load balancer operations used by the controllers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn control_plane(&self, cluster_id: &str) -> Result<ClusterControlPlane, ApiError>;

    async fn cluster_pools(&self, cluster_id: &str) -> Result<Vec<ClusterPool>, ApiError>;

    async fn load_balancer_clusters(&self) -> Result<Vec<LoadBalancerCluster>, ApiError>;

    async fn load_balancer_cluster(&self, id: &str) -> Result<LoadBalancerCluster, ApiError>;

    async fn virtual_ips(&self, cluster_id: &str) -> Result<Vec<VirtualIp>, ApiError>;

    async fn virtual_ip(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<VirtualIp, ApiError>;

    async fn forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<Vec<ForwardingRule>, ApiError>;

    async fn create_forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        rules: &[ForwardingRule],
    ) -> Result<Vec<ForwardingRule>, ApiError>;

    async fn update_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        backend_id: &str,
        update: &ForwardingRuleUpdate,
    ) -> Result<(), ApiError>;

    async fn delete_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        frontend_id: &str,
    ) -> Result<(), ApiError>;
}

#[async_trait]
impl CloudApi for xelon_api::Client {
    async fn control_plane(&self, cluster_id: &str) -> Result<ClusterControlPlane, ApiError> {
        xelon_api::Client::control_plane(self, cluster_id).await
    }

    async fn cluster_pools(&self, cluster_id: &str) -> Result<Vec<ClusterPool>, ApiError> {
        xelon_api::Client::cluster_pools(self, cluster_id).await
    }

    async fn load_balancer_clusters(&self) -> Result<Vec<LoadBalancerCluster>, ApiError> {
        xelon_api::Client::load_balancer_clusters(self).await
    }

    async fn load_balancer_cluster(&self, id: &str) -> Result<LoadBalancerCluster, ApiError> {
        xelon_api::Client::load_balancer_cluster(self, id).await
    }

    async fn virtual_ips(&self, cluster_id: &str) -> Result<Vec<VirtualIp>, ApiError> {
        xelon_api::Client::virtual_ips(self, cluster_id).await
    }

    async fn virtual_ip(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<VirtualIp, ApiError> {
        xelon_api::Client::virtual_ip(self, cluster_id, virtual_ip_id).await
    }

    async fn forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        xelon_api::Client::forwarding_rules(self, cluster_id, virtual_ip_id).await
    }

    async fn create_forwarding_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        rules: &[ForwardingRule],
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        xelon_api::Client::create_forwarding_rules(self, cluster_id, virtual_ip_id, rules).await
    }

    async fn update_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        backend_id: &str,
        update: &ForwardingRuleUpdate,
    ) -> Result<(), ApiError> {
        xelon_api::Client::update_forwarding_rule(self, cluster_id, virtual_ip_id, backend_id, update)
            .await
    }

    async fn delete_forwarding_rule(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        frontend_id: &str,
    ) -> Result<(), ApiError> {
        xelon_api::Client::delete_forwarding_rule(self, cluster_id, virtual_ip_id, frontend_id)
            .await
    }
}
