//! Load balancer orchestration
//!
//! Maps a `LoadBalancer` service onto a Xelon load balancer cluster, one of its
//! virtual IPs and a set of forwarding rules. The three references are tracked
//! in service annotations: present ids are fetched directly, missing ones are
//! searched for and written back so later calls skip the search.
//!
//! Nothing is trusted across calls; every operation re-resolves from the cloud.

pub mod reconciler;

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service};
use strum::Display;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use xelon_api::{
    ForwardingRule, ForwardingRuleUpdate, LoadBalancerCluster, LoadBalancerClusterStatus,
    VirtualIp, VirtualIpState,
};

use crate::annotations::{self, service_key, LoadBalancerAnnotations};
use crate::cloud::CloudApi;
use crate::error::{Error, ErrorKind, Result};
use crate::observability::metrics;
use crate::patcher::{PatchSession, ServiceStore};

pub use reconciler::{reconcile, ReconcileDiff};

/// Suggested delay before retrying a service whose cluster is still provisioning.
pub const DEFAULT_PROVISIONING_RETRY: Duration = Duration::from_secs(30);

/// How clients reach the service through the virtual IP, see `status.loadBalancer.ingress[].ipMode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum IngressMode {
    /// Traffic is delivered to nodes with the destination set to the VIP.
    #[strum(serialize = "VIP")]
    Vip,
    /// The load balancer terminates connections and speaks PROXY protocol to the backends.
    #[strum(serialize = "Proxy")]
    Proxy,
}

impl IngressMode {
    pub fn from_proxy_protocol(version: i32) -> Self {
        if version > 0 {
            IngressMode::Proxy
        } else {
            IngressMode::Vip
        }
    }
}

/// Cloud resources backing one service, resolved for the current call only.
#[derive(Clone, Debug, Default, PartialEq)]
struct ResolvedLoadBalancer {
    cluster_id: String,
    virtual_ip_id: String,
    virtual_ip_address: String,
    /// Rules whose frontend ids are recorded on the service.
    forwarding_rules: Vec<ForwardingRule>,
}

pub struct LoadBalancers {
    cloud: Arc<dyn CloudApi>,
    services: Arc<dyn ServiceStore>,
    kubernetes_cluster_id: String,
    provisioning_retry: Duration,
    /// Serializes fetch, reconcile, apply and persist of forwarding rules.
    rules_lock: Mutex<()>,
}

impl LoadBalancers {
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        services: Arc<dyn ServiceStore>,
        kubernetes_cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            cloud,
            services,
            kubernetes_cluster_id: kubernetes_cluster_id.into(),
            provisioning_retry: DEFAULT_PROVISIONING_RETRY,
            rules_lock: Mutex::new(()),
        }
    }

    pub fn with_provisioning_retry(mut self, delay: Duration) -> Self {
        self.provisioning_retry = delay;
        self
    }

    /// Current status of the service's load balancer, `None` if it does not exist.
    #[instrument(skip(self, service), fields(service = %service_key(service)))]
    pub async fn get(&self, service: &mut Service) -> Result<Option<LoadBalancerStatus>> {
        match self.resolve(service).await {
            Ok(lb) => {
                info!(ip_address = %lb.virtual_ip_address, "Load balancer virtual IP address");
                Ok(Some(load_balancer_status(service, &lb)))
            }
            Err(Error::NotFound { resource, id }) => {
                debug!(resource, id = %id, "Load balancer does not exist");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Attach the service to a load balancer cluster and sync its forwarding rules.
    ///
    /// A cluster that is still provisioning yields [`Error::Retry`].
    #[instrument(skip(self, service), fields(service = %service_key(service)))]
    pub async fn ensure(&self, service: &mut Service) -> Result<LoadBalancerStatus> {
        let lb = match self.resolve(service).await {
            Ok(lb) => lb,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(error = %e, "Creating load balancer clusters is not supported");
                return Err(e);
            }
            Err(e) if e.kind() == ErrorKind::Provisioning => {
                return Err(Error::Retry {
                    message: e.to_string(),
                    delay: self.provisioning_retry,
                });
            }
            Err(e) => return Err(e),
        };

        self.sync_forwarding_rules(service, &lb).await?;
        Ok(load_balancer_status(service, &lb))
    }

    /// Bring the forwarding rules of the service's virtual IP in line with its ports.
    #[instrument(skip(self, service), fields(service = %service_key(service)))]
    pub async fn update(&self, service: &mut Service) -> Result<()> {
        let lb = self.resolve(service).await?;
        self.sync_forwarding_rules(service, &lb).await
    }

    /// Remove the forwarding rules recorded on the service. A load balancer that
    /// no longer exists is not an error.
    #[instrument(skip(self, service), fields(service = %service_key(service)))]
    pub async fn delete(&self, service: &mut Service) -> Result<()> {
        let lb = match self.resolve(service).await {
            Ok(lb) => lb,
            Err(Error::NotFound { resource, id }) => {
                info!(resource, id = %id, "Load balancer already gone, nothing to delete");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let frontend_ids: Vec<&str> = lb
            .forwarding_rules
            .iter()
            .filter_map(ForwardingRule::frontend_id)
            .collect();
        if frontend_ids.is_empty() {
            info!("No forwarding rules recorded, nothing to delete");
            return Ok(());
        }

        info!(frontend_ids = ?frontend_ids, "Deleting forwarding rules");
        for frontend_id in frontend_ids {
            self.delete_rule(&lb.cluster_id, &lb.virtual_ip_id, frontend_id)
                .await?;
        }
        Ok(())
    }

    /// Resolve cluster, virtual IP and owned rules, persisting newly found ids.
    async fn resolve(&self, service: &mut Service) -> Result<ResolvedLoadBalancer> {
        let session = PatchSession::begin(self.services.as_ref(), service)?;
        let outcome = self.resolve_references(service).await;
        session.finish(service, outcome).await
    }

    async fn resolve_references(&self, service: &mut Service) -> Result<ResolvedLoadBalancer> {
        let recorded = LoadBalancerAnnotations::from_service(service);
        let ports = service_ports(service);

        let cluster = match recorded.cluster_id.as_deref() {
            Some(id) => {
                debug!(cluster_id = %id, "Load balancer cluster id is recorded");
                self.fetch_cluster(id).await?
            }
            None => {
                debug!("Searching for a load balancer cluster");
                self.find_cluster(&ports).await?
            }
        };
        ensure_active(&cluster)?;
        if recorded.cluster_id.is_none() {
            annotations::set_cluster_id(service, &cluster.id);
        }

        let virtual_ip = match recorded.virtual_ip_id.as_deref() {
            Some(id) => {
                debug!(virtual_ip_id = %id, "Virtual IP id is recorded");
                self.fetch_virtual_ip(&cluster.id, id).await?
            }
            None => {
                debug!(cluster_id = %cluster.id, "Searching for a virtual IP");
                let virtual_ip = self
                    .find_virtual_ip(&cluster.id, &ports)
                    .await?
                    .ok_or_else(|| {
                        Error::unavailable(format!(
                            "no virtual IP of load balancer cluster {} is available",
                            cluster.id
                        ))
                    })?;
                annotations::set_virtual_ip_id(service, &virtual_ip.id);
                virtual_ip
            }
        };

        let forwarding_rules = self
            .owned_rules(&cluster.id, &virtual_ip.id, &recorded.forwarding_rule_ids)
            .await?;

        Ok(ResolvedLoadBalancer {
            cluster_id: cluster.id,
            virtual_ip_id: virtual_ip.id,
            virtual_ip_address: virtual_ip.ip_address,
            forwarding_rules,
        })
    }

    async fn fetch_cluster(&self, id: &str) -> Result<LoadBalancerCluster> {
        let cluster = self
            .cloud
            .load_balancer_cluster(id)
            .await
            .map_err(|e| Error::from_api(e, "load balancer cluster", id))?;
        if cluster.id.is_empty() {
            return Err(Error::not_found("load balancer cluster", id));
        }
        debug!(cluster_id = %cluster.id, name = %cluster.name, "Load balancer cluster exists");
        Ok(cluster)
    }

    /// First active cluster of this Kubernetes cluster with a usable virtual IP.
    async fn find_cluster(&self, ports: &[i32]) -> Result<LoadBalancerCluster> {
        let owned = self
            .cloud
            .load_balancer_clusters()
            .await?
            .into_iter()
            .filter(|c| c.kubernetes_cluster_id == self.kubernetes_cluster_id);

        for cluster in owned {
            if cluster.status != LoadBalancerClusterStatus::Active {
                debug!(cluster_id = %cluster.id, status = %cluster.status, "Skipping inactive load balancer cluster");
                continue;
            }
            if self.find_virtual_ip(&cluster.id, ports).await?.is_none() {
                debug!(cluster_id = %cluster.id, "No virtual IP available");
                continue;
            }
            info!(cluster_id = %cluster.id, name = %cluster.name, "Found load balancer cluster");
            return Ok(cluster);
        }

        info!(
            kubernetes_cluster_id = %self.kubernetes_cluster_id,
            "Creating load balancer clusters is not supported"
        );
        Err(Error::unsupported(format!(
            "no active load balancer cluster with an available virtual IP for kubernetes cluster {}",
            self.kubernetes_cluster_id
        )))
    }

    async fn fetch_virtual_ip(&self, cluster_id: &str, id: &str) -> Result<VirtualIp> {
        let virtual_ip = self
            .cloud
            .virtual_ip(cluster_id, id)
            .await
            .map_err(|e| Error::from_api(e, "virtual ip", id))?;
        if virtual_ip.id.is_empty() {
            return Err(Error::not_found("virtual ip", id));
        }
        debug!(virtual_ip_id = %virtual_ip.id, address = %virtual_ip.ip_address, "Virtual IP exists");
        Ok(virtual_ip)
    }

    async fn find_virtual_ip(&self, cluster_id: &str, ports: &[i32]) -> Result<Option<VirtualIp>> {
        for virtual_ip in self.cloud.virtual_ips(cluster_id).await? {
            let rules = self.cloud.forwarding_rules(cluster_id, &virtual_ip.id).await?;
            if is_virtual_ip_available(&virtual_ip, &rules, ports) {
                info!(virtual_ip_id = %virtual_ip.id, address = %virtual_ip.ip_address, "Found available virtual IP");
                return Ok(Some(virtual_ip));
            }
        }
        Ok(None)
    }

    /// Rules on the virtual IP whose frontend id is in `ids`.
    async fn owned_rules(
        &self,
        cluster_id: &str,
        virtual_ip_id: &str,
        ids: &[String],
    ) -> Result<Vec<ForwardingRule>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rules = self
            .cloud
            .forwarding_rules(cluster_id, virtual_ip_id)
            .await?
            .into_iter()
            .filter(|rule| {
                rule.frontend_id()
                    .is_some_and(|id| ids.iter().any(|owned| owned == id))
            })
            .collect();
        Ok(rules)
    }

    async fn sync_forwarding_rules(
        &self,
        service: &mut Service,
        lb: &ResolvedLoadBalancer,
    ) -> Result<()> {
        let _guard = self.rules_lock.lock().await;
        let session = PatchSession::begin(self.services.as_ref(), service)?;
        let outcome = self.apply_forwarding_rules(service, lb).await;
        session.finish(service, outcome).await
    }

    async fn apply_forwarding_rules(
        &self,
        service: &mut Service,
        lb: &ResolvedLoadBalancer,
    ) -> Result<()> {
        let recorded = LoadBalancerAnnotations::from_service(service);
        let current = self
            .owned_rules(&lb.cluster_id, &lb.virtual_ip_id, &recorded.forwarding_rule_ids)
            .await?;
        let desired = desired_rules(service, recorded.proxy_protocol);

        let diff = reconcile(&current, &desired);
        info!(
            create = diff.to_create.len(),
            update = diff.to_update.len(),
            delete = diff.to_delete.len(),
            "Reconciled forwarding rules"
        );

        let mut created_ids = Vec::new();
        if !diff.to_create.is_empty() {
            debug!(rules = ?diff.to_create, "Creating forwarding rules");
            let created = self
                .cloud
                .create_forwarding_rules(&lb.cluster_id, &lb.virtual_ip_id, &diff.to_create)
                .await?;
            metrics::record_forwarding_rule_operations("create", diff.to_create.len());
            created_ids.extend(
                created
                    .iter()
                    .filter_map(ForwardingRule::frontend_id)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string),
            );
        }

        for rule in &diff.to_update {
            let Some(backend) = &rule.backend else {
                continue;
            };
            let update = ForwardingRuleUpdate {
                port: backend.port,
                proxy_protocol: backend.proxy_protocol,
            };
            debug!(backend_id = %backend.id, update = ?update, "Updating forwarding rule backend");
            self.cloud
                .update_forwarding_rule(&lb.cluster_id, &lb.virtual_ip_id, &backend.id, &update)
                .await?;
            metrics::record_forwarding_rule_operations("update", 1);
        }

        let mut deleted_ids = Vec::new();
        for rule in &diff.to_delete {
            let Some(frontend_id) = rule.frontend_id() else {
                continue;
            };
            self.delete_rule(&lb.cluster_id, &lb.virtual_ip_id, frontend_id)
                .await?;
            deleted_ids.push(frontend_id.to_string());
        }

        let ids = owned_rule_ids(&recorded.forwarding_rule_ids, &created_ids, &deleted_ids);
        debug!(forwarding_rule_ids = %ids.join(","), "Recording forwarding rule ids");
        annotations::set_forwarding_rule_ids(service, &ids);
        Ok(())
    }

    /// Delete a rule by frontend id; a rule that is already gone counts as deleted.
    async fn delete_rule(&self, cluster_id: &str, virtual_ip_id: &str, frontend_id: &str) -> Result<()> {
        match self
            .cloud
            .delete_forwarding_rule(cluster_id, virtual_ip_id, frontend_id)
            .await
        {
            Ok(()) => {
                metrics::record_forwarding_rule_operations("delete", 1);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(frontend_id, "Forwarding rule already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `virtual_ip` can host a service exposing `ports`: it must not be
/// reserved and none of its rules may already use one of the ports.
pub fn is_virtual_ip_available(virtual_ip: &VirtualIp, rules: &[ForwardingRule], ports: &[i32]) -> bool {
    if virtual_ip.state == VirtualIpState::Reserved {
        return false;
    }
    !rules
        .iter()
        .filter_map(ForwardingRule::frontend_port)
        .any(|port| ports.contains(&port))
}

fn ensure_active(cluster: &LoadBalancerCluster) -> Result<()> {
    match &cluster.status {
        LoadBalancerClusterStatus::Active => Ok(()),
        LoadBalancerClusterStatus::Provisioning => Err(Error::Provisioning {
            cluster_id: cluster.id.clone(),
        }),
        status => Err(Error::Inactive {
            cluster_id: cluster.id.clone(),
            status: status.to_string(),
        }),
    }
}

fn service_ports(service: &Service) -> Vec<i32> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| ports.iter().map(|p| p.port).collect())
        .unwrap_or_default()
}

/// One rule per service port: declared port in front, node port behind.
fn desired_rules(service: &Service, proxy_protocol: i32) -> Vec<ForwardingRule> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| {
            ports
                .iter()
                .map(|p| ForwardingRule::new(p.port, p.node_port.unwrap_or_default(), proxy_protocol))
                .collect()
        })
        .unwrap_or_default()
}

/// `(recorded ∪ created) − deleted`, sorted and deduplicated.
fn owned_rule_ids(recorded: &[String], created: &[String], deleted: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = recorded.iter().chain(created).cloned().collect();
    ids.sort();
    ids.dedup();
    ids.retain(|id| !deleted.contains(id));
    ids
}

fn load_balancer_status(service: &Service, lb: &ResolvedLoadBalancer) -> LoadBalancerStatus {
    let proxy_protocol = LoadBalancerAnnotations::from_service(service).proxy_protocol;
    let mode = IngressMode::from_proxy_protocol(proxy_protocol);
    LoadBalancerStatus {
        ingress: Some(vec![LoadBalancerIngress {
            ip: Some(lb.virtual_ip_address.clone()),
            ip_mode: Some(mode.to_string()),
            ..Default::default()
        }]),
    }
}
