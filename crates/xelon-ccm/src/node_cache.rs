//! Node identity cache
//!
//! Resolves Kubernetes nodes to the Xelon virtual machines backing them. The
//! inventory (control plane nodes followed by pool nodes) is fetched as a
//! whole and swapped in atomically at most once per TTL window.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, NodeAddress};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use xelon_api::MachineShape;

use crate::cloud::CloudApi;
use crate::error::{Error, Result};
use crate::observability::metrics;

/// Scheme of the provider ids written to `node.spec.providerID`.
pub const PROVIDER_ID_PREFIX: &str = "xelon://";

pub const DEFAULT_TTL: Duration = Duration::from_secs(15);

/// A Xelon virtual machine that backs a Kubernetes node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudNode {
    /// Xelon local VM id.
    pub id: String,
    pub name: String,
    /// `c<cores>c-m<memory>g-d<disk>g`, empty when the owner is unknown.
    pub instance_type: String,
}

/// Cloud-derived metadata for a Kubernetes node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceMetadata {
    pub provider_id: String,
    pub addresses: Vec<NodeAddress>,
    pub instance_type: String,
}

#[derive(Default)]
struct Inventory {
    nodes: Vec<CloudNode>,
    refreshed_at: Option<Instant>,
}

/// TTL-bounded cache of the cluster's cloud nodes.
///
/// One mutex covers both the staleness check and the refresh, so lookups
/// never observe a half-built inventory.
pub struct NodeCache {
    cloud: Arc<dyn CloudApi>,
    cluster_id: String,
    ttl: Duration,
    inventory: Mutex<Inventory>,
}

impl NodeCache {
    pub fn new(cloud: Arc<dyn CloudApi>, cluster_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            cloud,
            cluster_id: cluster_id.into(),
            ttl,
            inventory: Mutex::new(Inventory::default()),
        }
    }

    /// Whether the node exists in the cloud inventory. Not-found is `false`, not an error.
    pub async fn exists(&self, node: &Node) -> Result<bool> {
        match self.lookup(node).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The Xelon API exposes no power state, so a known node is never reported
    /// as shut down. Unknown nodes are not inferred to be shut down either.
    pub async fn is_shutdown(&self, node: &Node) -> Result<bool> {
        match self.lookup(node).await {
            Ok(_) | Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn metadata(&self, node: &Node) -> Result<InstanceMetadata> {
        let cloud_node = self.lookup(node).await?;

        let metadata = InstanceMetadata {
            provider_id: format!("{PROVIDER_ID_PREFIX}{}", cloud_node.id),
            addresses: node
                .status
                .as_ref()
                .and_then(|status| status.addresses.clone())
                .unwrap_or_default(),
            instance_type: cloud_node.instance_type,
        };
        debug!(
            node = %node_name(node),
            provider_id = %metadata.provider_id,
            instance_type = %metadata.instance_type,
            "Resolved instance metadata"
        );
        Ok(metadata)
    }

    /// Find the cloud node by provider id when one was recorded, else by name.
    #[instrument(skip(self, node), fields(node = %node_name(node)))]
    async fn lookup(&self, node: &Node) -> Result<CloudNode> {
        let mut inventory = self.inventory.lock().await;
        self.refresh(&mut inventory).await?;

        let provider_id = node
            .spec
            .as_ref()
            .and_then(|spec| spec.provider_id.as_deref())
            .filter(|id| id.starts_with(PROVIDER_ID_PREFIX));

        let found = match provider_id {
            Some(provider_id) => {
                debug!(provider_id = %provider_id, "Looking up node by provider id");
                // A bare `xelon://` names no instance.
                parse_provider_id(provider_id)
                    .ok()
                    .and_then(|id| inventory.nodes.iter().find(|n| n.id == id))
            }
            None => {
                debug!("Looking up node by name");
                let name = node_name(node);
                inventory.nodes.iter().find(|n| n.name == name)
            }
        };

        found
            .cloned()
            .ok_or_else(|| Error::not_found("node", node_name(node)))
    }

    async fn refresh(&self, inventory: &mut Inventory) -> Result<()> {
        if let Some(refreshed_at) = inventory.refreshed_at {
            let age = refreshed_at.elapsed();
            if age < self.ttl {
                debug!(age = ?age, ttl = ?self.ttl, "Node inventory is fresh, skipping refresh");
                return Ok(());
            }
        }

        match self.fetch().await {
            Ok(nodes) => {
                debug!(cluster_id = %self.cluster_id, nodes = nodes.len(), "Refreshed node inventory");
                inventory.nodes = nodes;
                inventory.refreshed_at = Some(Instant::now());
                metrics::record_node_cache_refresh("success");
                Ok(())
            }
            Err(e) => {
                metrics::record_node_cache_refresh("error");
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<CloudNode>> {
        let control_plane = self.cloud.control_plane(&self.cluster_id).await?;
        let control_plane_type = instance_type(Some(&control_plane.shape));
        let mut nodes: Vec<CloudNode> = control_plane
            .nodes
            .into_iter()
            .map(|n| CloudNode {
                id: n.local_vm_id,
                name: n.name,
                instance_type: control_plane_type.clone(),
            })
            .collect();

        for pool in self.cloud.cluster_pools(&self.cluster_id).await? {
            let pool_type = instance_type(Some(&pool.shape));
            nodes.extend(pool.nodes.into_iter().map(|n| CloudNode {
                id: n.local_vm_id,
                name: n.name,
                instance_type: pool_type.clone(),
            }));
        }

        Ok(nodes)
    }
}

/// Format a machine shape as `c<cores>c-m<memory>g-d<disk>g`, e.g. `c2c-m4g-d50g`.
pub fn instance_type(shape: Option<&MachineShape>) -> String {
    match shape {
        Some(shape) => format!(
            "c{}c-m{}g-d{}g",
            shape.cpu_core_count, shape.memory, shape.disk_size
        ),
        None => String::new(),
    }
}

/// Strip the `xelon://` scheme from a provider id.
pub fn parse_provider_id(provider_id: &str) -> Result<&str> {
    provider_id
        .strip_prefix(PROVIDER_ID_PREFIX)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidProviderId(provider_id.to_string()))
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloudApi;
    use crate::error::ErrorKind;
    use k8s_openapi::api::core::v1::{NodeSpec, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use xelon_api::{ApiError, ClusterControlPlane, ClusterNode, ClusterPool};

    fn shape(cores: u32, memory: u32, disk: u32) -> MachineShape {
        MachineShape {
            cpu_core_count: cores,
            memory,
            disk_size: disk,
        }
    }

    fn cluster_node(id: &str, name: &str) -> ClusterNode {
        ClusterNode {
            local_vm_id: id.to_string(),
            name: name.to_string(),
        }
    }

    fn node(name: &str, provider_id: Option<&str>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                provider_id: provider_id.map(str::to_string),
                ..Default::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: "10.0.0.5".to_string(),
                }]),
                ..Default::default()
            }),
        }
    }

    /// Mock returning one control plane node and one pool node, expecting `refreshes` fetches.
    fn inventory_mock(refreshes: usize) -> MockCloudApi {
        let mut cloud = MockCloudApi::new();
        cloud
            .expect_control_plane()
            .times(refreshes)
            .returning(|_| {
                Ok(ClusterControlPlane {
                    shape: shape(2, 4, 50),
                    nodes: vec![cluster_node("vm-cp", "cp-1")],
                })
            });
        cloud
            .expect_cluster_pools()
            .times(refreshes)
            .returning(|_| {
                Ok(vec![ClusterPool {
                    id: "pool-1".to_string(),
                    name: "workers".to_string(),
                    shape: shape(4, 8, 100),
                    nodes: vec![cluster_node("vm-w1", "worker-1")],
                }])
            });
        cloud
    }

    fn cache(cloud: MockCloudApi) -> NodeCache {
        NodeCache::new(Arc::new(cloud), "k8s-1", DEFAULT_TTL)
    }

    #[test]
    fn test_instance_type() {
        assert_eq!(instance_type(Some(&shape(2, 4, 50))), "c2c-m4g-d50g");
        assert_eq!(instance_type(None), "");
    }

    #[test]
    fn test_parse_provider_id() {
        assert_eq!(parse_provider_id("xelon://vm-1").unwrap(), "vm-1");
        assert!(parse_provider_id("xelon://").is_err());
        assert!(parse_provider_id("aws://vm-1").is_err());
    }

    #[tokio::test]
    async fn test_metadata_by_name() {
        let cache = cache(inventory_mock(1));

        let meta = cache.metadata(&node("worker-1", None)).await.unwrap();
        assert_eq!(meta.provider_id, "xelon://vm-w1");
        assert_eq!(meta.instance_type, "c4c-m8g-d100g");
        assert_eq!(meta.addresses.len(), 1);
        assert_eq!(meta.addresses[0].address, "10.0.0.5");
    }

    #[tokio::test]
    async fn test_provider_id_takes_precedence_over_name() {
        let cache = cache(inventory_mock(1));

        // Name points at the worker, provider id at the control plane node.
        let meta = cache
            .metadata(&node("worker-1", Some("xelon://vm-cp")))
            .await
            .unwrap();
        assert_eq!(meta.provider_id, "xelon://vm-cp");
        assert_eq!(meta.instance_type, "c2c-m4g-d50g");
    }

    #[tokio::test]
    async fn test_foreign_provider_id_falls_back_to_name() {
        let cache = cache(inventory_mock(1));

        let meta = cache
            .metadata(&node("cp-1", Some("kind://docker/cp-1")))
            .await
            .unwrap();
        assert_eq!(meta.provider_id, "xelon://vm-cp");
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let cache = cache(inventory_mock(1));

        let missing = node("ghost", None);
        assert!(!cache.exists(&missing).await.unwrap());
        assert!(!cache.is_shutdown(&missing).await.unwrap());
        let err = cache.metadata(&missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_empty_provider_id_is_not_found() {
        let cache = cache(inventory_mock(1));

        // Provider id wins over the name, and it names nothing.
        let blank = node("cp-1", Some("xelon://"));
        assert!(!cache.exists(&blank).await.unwrap());
        let err = cache.metadata(&blank).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_known_node_exists_and_is_running() {
        let cache = cache(inventory_mock(1));

        let known = node("cp-1", None);
        assert!(cache.exists(&known).await.unwrap());
        assert!(!cache.is_shutdown(&known).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookups_within_ttl_refresh_once() {
        let cache = cache(inventory_mock(1));

        cache.exists(&node("cp-1", None)).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        cache.exists(&node("worker-1", None)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_after_ttl_refreshes_again() {
        let cache = cache(inventory_mock(2));

        cache.exists(&node("cp-1", None)).await.unwrap();
        cache.exists(&node("cp-1", None)).await.unwrap();
        tokio::time::advance(DEFAULT_TTL + Duration::from_secs(1)).await;
        cache.exists(&node("cp-1", None)).await.unwrap();
        cache.exists(&node("cp-1", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_inventory() {
        let mut cloud = MockCloudApi::new();
        let mut calls = 0;
        cloud.expect_control_plane().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(ClusterControlPlane {
                    shape: shape(2, 4, 50),
                    nodes: vec![cluster_node("vm-cp", "cp-1")],
                })
            } else {
                Err(ApiError::Config("connection reset".to_string()))
            }
        });
        cloud
            .expect_cluster_pools()
            .times(1)
            .returning(|_| Ok(vec![]));
        let cache = NodeCache::new(Arc::new(cloud), "k8s-1", Duration::ZERO);

        assert!(cache.exists(&node("cp-1", None)).await.unwrap());
        let err = cache.exists(&node("cp-1", None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Other);

        let inventory = cache.inventory.lock().await;
        assert_eq!(inventory.nodes.len(), 1);
        assert_eq!(inventory.nodes[0].id, "vm-cp");
    }

    #[tokio::test]
    async fn test_control_plane_nodes_come_first() {
        let cache = cache(inventory_mock(1));
        cache.exists(&node("cp-1", None)).await.unwrap();

        let inventory = cache.inventory.lock().await;
        let ids: Vec<_> = inventory.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["vm-cp", "vm-w1"]);
    }
}
