//! Record store adapter.
//!
//! The reconcilers read and write ElasticIP/NetworkInterface records through
//! [`RecordStore`] so they can run against an in-memory store in tests.
//! Every write carries the record's `resourceVersion`; a stale write is
//! rejected with [`ControllerError::Conflict`].

use crate::error::ControllerError;
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

/// Field manager used for status writes
pub const FIELD_MANAGER: &str = "network-controller";

/// Get and compare-and-swap update of one record kind
#[async_trait]
pub trait RecordStore<K>: Send + Sync {
    /// Fetch a record; `None` once it is gone from the store
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError>;

    /// Persist `metadata.finalizers` of `record`
    async fn update_finalizers(&self, record: &K) -> Result<(), ControllerError>;

    /// Persist the observed section of `record`
    async fn update_status(&self, record: &K) -> Result<(), ControllerError>;
}

/// Kubernetes-backed [`RecordStore`]
#[derive(Clone)]
pub struct KubeStore<K> {
    client: Client,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K> KubeStore<K> {
    /// Store over `client`; records are addressed per namespace
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: std::marker::PhantomData,
        }
    }
}

fn map_write_error<K>(record: &K, err: kube::Error) -> ControllerError
where
    K: Resource<DynamicType = ()>,
{
    match err {
        kube::Error::Api(ae) if ae.code == 409 => ControllerError::Conflict(format!(
            "{} {}/{}",
            K::kind(&()),
            record.namespace().unwrap_or_default(),
            record.name_any()
        )),
        other => ControllerError::Kube(other),
    }
}

fn coordinates<K: Resource>(record: &K) -> Result<(String, String), ControllerError> {
    let namespace = record
        .namespace()
        .ok_or_else(|| ControllerError::InvalidState("record has no namespace".to_string()))?;
    Ok((namespace, record.name_any()))
}

#[async_trait]
impl<K> RecordStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_finalizers(&self, record: &K) -> Result<(), ControllerError> {
        let (namespace, name) = coordinates(record)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": record.resource_version(),
                "finalizers": record.finalizers(),
            }
        });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_write_error(record, e))?;
        debug!("Updated finalizers of {} {}/{}", K::kind(&()), namespace, name);
        Ok(())
    }

    async fn update_status(&self, record: &K) -> Result<(), ControllerError> {
        let (namespace, name) = coordinates(record)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let status = serde_json::to_value(record)?
            .get("status")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        // Server-side apply so fields dropped from the status are removed too
        let patch = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "metadata": {
                "name": name,
                "resourceVersion": record.resource_version(),
            },
            "status": status,
        });
        api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
            .await
            .map_err(|e| map_write_error(record, e))?;
        debug!("Updated status of {} {}/{}", K::kind(&()), namespace, name);
        Ok(())
    }
}
