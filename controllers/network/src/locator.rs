//! Workload lookup.
//!
//! Workloads are pods; the locator reports the pod's UID (to notice a pod
//! being replaced under the same name) and its current private address.

use crate::error::ControllerError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};

/// A workload as seen at lookup time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Changes when the workload is replaced under the same name
    pub uid: String,
    /// `None` until the workload has been given an address
    pub private_ip: Option<String>,
}

#[async_trait]
pub trait WorkloadLocator: Send + Sync {
    /// `Ok(None)` when no workload of that name exists
    async fn locate(&self, namespace: &str, name: &str) -> Result<Option<Workload>, ControllerError>;
}

/// Resolves workloads from core/v1 Pods
#[derive(Clone)]
pub struct PodLocator {
    client: Client,
}

impl std::fmt::Debug for PodLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodLocator").finish_non_exhaustive()
    }
}

impl PodLocator {
    /// Locator reading Pods through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Extract the workload view of a pod
pub fn workload_of(pod: &Pod) -> Workload {
    Workload {
        uid: pod.metadata.uid.clone().unwrap_or_default(),
        private_ip: pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .filter(|ip| !ip.is_empty()),
    }
}

#[async_trait]
impl WorkloadLocator for PodLocator {
    async fn locate(&self, namespace: &str, name: &str) -> Result<Option<Workload>, ControllerError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(pods.get_opt(name).await?.as_ref().map(workload_of))
    }
}
