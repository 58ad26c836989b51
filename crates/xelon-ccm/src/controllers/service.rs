//! Service controller

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Service};
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Error as FinalizerError, Event},
        watcher::Config,
    },
    Client, ResourceExt,
};
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::Context;
use crate::annotations::{service_key, LoadBalancerAnnotations};
use crate::error::Error;
use crate::observability::metrics;

/// Held by every `LoadBalancer` service until its forwarding rules are removed.
pub const FINALIZER: &str = "service.kubernetes.io/load-balancer-cleanup";

const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

pub struct ServiceController;

impl ServiceController {
    pub async fn run(client: Client, ctx: Arc<Context>) {
        let api: Api<Service> = Api::all(client);

        Controller::new(api, Config::default())
            .run(reconcile, error_policy, ctx)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => info!(name = %obj.name, namespace = ?obj.namespace, "Reconciled Service"),
                    Err(e) => warn!(error = %e, "Service reconcile error"),
                }
            })
            .await;
    }
}

async fn reconcile(
    service: Arc<Service>,
    ctx: Arc<Context>,
) -> Result<Action, FinalizerError<Error>> {
    let started = Instant::now();
    let result = reconcile_service(service, &ctx).await;
    let outcome = if result.is_ok() { "success" } else { "error" };
    metrics::record_reconcile("service", outcome, started.elapsed());
    result
}

#[instrument(skip(service, ctx), fields(service = %service_key(&service)))]
async fn reconcile_service(
    service: Arc<Service>,
    ctx: &Context,
) -> Result<Action, FinalizerError<Error>> {
    let ns = service.namespace().unwrap_or_default();
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let has_finalizer = service.finalizers().iter().any(|f| f == FINALIZER);

    if !wants_load_balancer(&service) {
        if has_finalizer && service.metadata.deletion_timestamp.is_none() {
            info!("Service no longer requests a load balancer, releasing it");
            return release(&api, service, ctx)
                .await
                .map_err(FinalizerError::CleanupFailed);
        }
        if !has_finalizer {
            return Ok(Action::await_change());
        }
    }

    finalizer(&api, FINALIZER, service, |event| async {
        match event {
            Event::Apply(service) => apply(&api, &service, ctx).await,
            Event::Cleanup(service) => cleanup(&service, ctx).await,
        }
    })
    .await
}

/// Ensure the load balancer and publish its ingress on the service status.
async fn apply(api: &Api<Service>, service: &Service, ctx: &Context) -> Result<Action, Error> {
    let mut working = service.clone();
    let status = ctx.load_balancers.ensure(&mut working).await?;

    let current = service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref());
    if current != Some(&status) {
        info!(ingress = ?status.ingress, "Updating load balancer status");
        patch_load_balancer_status(api, &service.name_any(), &status).await?;
    }

    Ok(Action::requeue(ctx.config.service_resync))
}

/// Remove the service's forwarding rules. Services that never got a cluster
/// assigned own nothing in the cloud.
async fn cleanup(service: &Service, ctx: &Context) -> Result<Action, Error> {
    if !LoadBalancerAnnotations::from_service(service).has_load_balancer() {
        info!("No load balancer cluster recorded, nothing to clean up");
        return Ok(Action::await_change());
    }

    let mut working = service.clone();
    match ctx.load_balancers.get(&mut working).await? {
        Some(_) => {
            info!("Deleting load balancer forwarding rules");
            ctx.load_balancers.delete(&mut working).await?;
        }
        None => info!("Load balancer no longer exists"),
    }
    Ok(Action::await_change())
}

/// Cleanup for a live service that changed away from type `LoadBalancer`:
/// delete its rules, clear the published ingress and drop the finalizer.
async fn release(api: &Api<Service>, service: Arc<Service>, ctx: &Context) -> Result<Action, Error> {
    cleanup(&service, ctx).await?;

    let name = service.name_any();
    patch_load_balancer_status(api, &name, &LoadBalancerStatus::default()).await?;

    let finalizers: Vec<&String> = service
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .collect();
    let patch = json!({
        "metadata": {
            "finalizers": finalizers,
            "resourceVersion": service.resource_version(),
        }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;

    Ok(Action::await_change())
}

async fn patch_load_balancer_status(
    api: &Api<Service>,
    name: &str,
    status: &LoadBalancerStatus,
) -> Result<(), Error> {
    let ingress = status.ingress.clone().unwrap_or_default();
    let patch = json!({ "status": { "loadBalancer": { "ingress": ingress } } });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn wants_load_balancer(service: &Service) -> bool {
    service.spec.as_ref().is_some_and(|spec| {
        spec.type_.as_deref() == Some(SERVICE_TYPE_LOAD_BALANCER)
            && spec.load_balancer_class.is_none()
    })
}

fn error_policy(service: Arc<Service>, error: &FinalizerError<Error>, ctx: Arc<Context>) -> Action {
    let retry_after = match error {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e.retry_after(),
        _ => None,
    };

    match retry_after {
        Some(delay) => {
            info!(service = %service_key(&service), error = %error, delay = ?delay, "Load balancer not ready, retrying");
            Action::requeue(delay)
        }
        None => {
            error!(service = %service_key(&service), error = %error, "Reconcile failed");
            Action::requeue(ctx.config.error_requeue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::load_balancer_service;

    #[test]
    fn test_wants_load_balancer() {
        let mut service = load_balancer_service(&[(80, 30080)]);
        assert!(wants_load_balancer(&service));

        if let Some(spec) = service.spec.as_mut() {
            spec.load_balancer_class = Some("example.com/other".to_string());
        }
        assert!(!wants_load_balancer(&service));

        if let Some(spec) = service.spec.as_mut() {
            spec.load_balancer_class = None;
            spec.type_ = Some("ClusterIP".to_string());
        }
        assert!(!wants_load_balancer(&service));
        assert!(!wants_load_balancer(&Service::default()));
    }
}
