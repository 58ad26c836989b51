//! Node controller
//!
//! Initializes nodes from the Xelon inventory: records the provider id, labels
//! the instance type and lifts the uninitialized taint the kubelet registers
//! with when started with `--cloud-provider=external`. Nodes missing from the
//! inventory are reported, never deleted.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Client, ResourceExt,
};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::Context;
use crate::error::Error;
use crate::node_cache::InstanceMetadata;
use crate::observability::metrics;
use crate::patcher::{is_empty_patch, merge_patch};

pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

pub const UNINITIALIZED_TAINT: &str = "node.cloudprovider.kubernetes.io/uninitialized";

pub struct NodeController;

impl NodeController {
    pub async fn run(client: Client, ctx: Arc<Context>) {
        let api: Api<Node> = Api::all(client);

        Controller::new(api, Config::default())
            .run(reconcile, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!(name = %obj.name, "Reconciled Node"),
                    Err(e) => warn!(error = %e, "Node reconcile error"),
                }
            })
            .await;
    }
}

async fn reconcile(node: Arc<Node>, ctx: Arc<Context>) -> Result<Action, Error> {
    let started = Instant::now();
    let result = reconcile_node(&node, &ctx).await;
    let outcome = if result.is_ok() { "success" } else { "error" };
    metrics::record_reconcile("node", outcome, started.elapsed());
    result
}

#[instrument(skip(node, ctx), fields(node = %node.name_any()))]
async fn reconcile_node(node: &Node, ctx: &Context) -> Result<Action, Error> {
    if !ctx.nodes.exists(node).await? {
        warn!("Node has no matching Xelon virtual machine");
        return Ok(Action::requeue(ctx.config.node_resync));
    }
    if ctx.nodes.is_shutdown(node).await? {
        info!("Node is shut down");
    }

    let metadata = ctx.nodes.metadata(node).await?;
    if let Some(patch) = initialization_patch(node, &metadata)? {
        info!(
            provider_id = %metadata.provider_id,
            instance_type = %metadata.instance_type,
            "Initializing node"
        );
        let api: Api<Node> = Api::all(ctx.client.clone());
        api.patch(&node.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
    }

    Ok(Action::requeue(ctx.config.node_resync))
}

/// Merge patch applying `metadata` to `node`, `None` if nothing changes.
fn initialization_patch(node: &Node, metadata: &InstanceMetadata) -> Result<Option<Value>, Error> {
    let mut initialized = node.clone();

    let spec = initialized.spec.get_or_insert_with(Default::default);
    if spec.provider_id.as_deref().unwrap_or_default().is_empty() {
        spec.provider_id = Some(metadata.provider_id.clone());
    }
    if let Some(taints) = spec.taints.as_mut() {
        taints.retain(|taint| taint.key != UNINITIALIZED_TAINT);
    }

    if !metadata.instance_type.is_empty() {
        initialized
            .labels_mut()
            .insert(INSTANCE_TYPE_LABEL.to_string(), metadata.instance_type.clone());
    }

    let patch = merge_patch(&serde_json::to_value(node)?, &serde_json::to_value(&initialized)?);
    Ok((!is_empty_patch(&patch)).then_some(patch))
}

fn error_policy(node: Arc<Node>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(node = %node.name_any(), error = %error, "Reconcile failed");
    Action::requeue(ctx.config.error_requeue)
}
