//! Service patching
//!
//! A [`PatchSession`] snapshots a Service before an operation mutates it and,
//! when finished, submits a JSON merge patch holding only the fields that
//! changed. The remote object stays the source of truth: a failed patch is
//! reported, the in-memory copy is not rolled back.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::version::COMPONENT_NAME;

#[cfg(test)]
use mockall::automock;

/// Write access to Services.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Submit a merge patch to `namespace/name`.
    async fn patch_service(&self, namespace: &str, name: &str, patch: &Value) -> Result<()>;
}

/// [`ServiceStore`] backed by the Kubernetes API server.
pub struct KubeServiceStore {
    client: Client,
}

impl KubeServiceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn patch_service(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::apply(COMPONENT_NAME), &Patch::Merge(patch))
            .await?;
        Ok(())
    }
}

/// Read-modify-write session over one Service.
///
/// Always end a session with [`PatchSession::finish`]; dropping it unfinished
/// loses the accumulated annotation changes and is logged.
pub struct PatchSession<'a> {
    store: &'a dyn ServiceStore,
    namespace: String,
    name: String,
    snapshot: Value,
    finished: bool,
}

impl<'a> PatchSession<'a> {
    pub fn begin(store: &'a dyn ServiceStore, service: &Service) -> Result<Self> {
        Ok(Self {
            store,
            namespace: service.metadata.namespace.clone().unwrap_or_default(),
            name: service.metadata.name.clone().unwrap_or_default(),
            snapshot: serde_json::to_value(service)?,
            finished: false,
        })
    }

    /// Persist the changes made to `service` and combine the outcome of the
    /// surrounding operation with the outcome of the patch.
    ///
    /// Exactly one patch is attempted whether or not `outcome` is an error.
    pub async fn finish<T>(mut self, service: &Service, outcome: Result<T>) -> Result<T> {
        self.finished = true;
        let persisted = self.submit(service).await;

        match (outcome, persisted) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(patch)) => Err(patch),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(patch)) => {
                error!(
                    service = %format!("{}/{}", self.namespace, self.name),
                    error = %patch,
                    "Failed to persist service annotations after failed operation"
                );
                Err(Error::PersistFailed {
                    source: Box::new(err),
                    patch: Box::new(patch),
                })
            }
        }
    }

    async fn submit(&self, service: &Service) -> Result<()> {
        let modified = serde_json::to_value(service)?;
        let patch = merge_patch(&self.snapshot, &modified);
        if is_empty_patch(&patch) {
            debug!(
                namespace = %self.namespace,
                name = %self.name,
                "Service unchanged, skipping patch"
            );
            return Ok(());
        }

        debug!(namespace = %self.namespace, name = %self.name, patch = %patch, "Patching service");
        self.store
            .patch_service(&self.namespace, &self.name, &patch)
            .await
    }
}

impl Drop for PatchSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                namespace = %self.namespace,
                name = %self.name,
                "Patch session dropped before finishing, service changes were not persisted"
            );
        }
    }
}

/// Two-way JSON merge patch (RFC 7386) turning `original` into `modified`.
///
/// Removed object keys become `null`; arrays and scalars are replaced whole.
pub fn merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();
            for key in original.keys() {
                if !modified.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            for (key, new) in modified {
                match original.get(key) {
                    Some(old) if old == new => {}
                    Some(old) => {
                        patch.insert(key.clone(), merge_patch(old, new));
                    }
                    None => {
                        patch.insert(key.clone(), new.clone());
                    }
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

pub(crate) fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}
