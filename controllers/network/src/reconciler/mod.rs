//! Reconciliation logic for the CloudOps network CRDs.
//!
//! - `elastic_ip`: floating public address state machine
//! - `network_interface`: network interface convergence
//!
//! Each invocation re-reads the record and the provider, performs at most
//! one state-advancing effect and reports what the scheduler should do next
//! as a [`kube_runtime::controller::Action`].

pub mod elastic_ip;
pub mod network_interface;

#[cfg(test)]
mod network_interface_test;

use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::locator::{Workload, WorkloadLocator};
use crate::reconcile_helpers::{has_finalizer, with_finalizer, without_finalizer};
use crate::store::RecordStore;
use cloud_client::{CloudClientTrait, Interface};
use crds::{ElasticIP, NetworkInterface};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// Reconciles ElasticIP and NetworkInterface records.
pub struct Reconciler {
    pub(crate) cloud_client: Box<dyn CloudClientTrait>,
    pub(crate) elastic_ips: Box<dyn RecordStore<ElasticIP>>,
    pub(crate) network_interfaces: Box<dyn RecordStore<NetworkInterface>>,
    pub(crate) workloads: Box<dyn WorkloadLocator>,
    pub(crate) config: ReconcilerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cloud", &self.cloud_client.base_url())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(
        cloud_client: Box<dyn CloudClientTrait>,
        elastic_ips: Box<dyn RecordStore<ElasticIP>>,
        network_interfaces: Box<dyn RecordStore<NetworkInterface>>,
        workloads: Box<dyn WorkloadLocator>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            cloud_client,
            elastic_ips,
            network_interfaces,
            workloads,
            config,
        }
    }

    /// Finalizer write, if the record does not hold ours yet. Returns whether it wrote.
    pub(crate) async fn ensure_finalizer<K>(
        &self,
        store: &dyn RecordStore<K>,
        record: &K,
    ) -> Result<bool, ControllerError>
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync,
    {
        if has_finalizer(record, &self.config.finalizer) {
            return Ok(false);
        }
        store
            .update_finalizers(&with_finalizer(record, &self.config.finalizer))
            .await?;
        info!(
            "Added finalizer to {} {}/{}",
            K::kind(&()),
            record.namespace().unwrap_or_default(),
            record.name_any()
        );
        Ok(true)
    }

    /// Drop our finalizer, letting the store remove the record.
    pub(crate) async fn release_finalizer<K>(
        &self,
        store: &dyn RecordStore<K>,
        record: &K,
    ) -> Result<(), ControllerError>
    where
        K: Resource<DynamicType = ()> + Clone + Send + Sync,
    {
        store
            .update_finalizers(&without_finalizer(record, &self.config.finalizer))
            .await?;
        info!(
            "Removed finalizer from {} {}/{}",
            K::kind(&()),
            record.namespace().unwrap_or_default(),
            record.name_any()
        );
        Ok(())
    }

    /// Workload with a private address, or why it cannot be used yet
    pub(crate) async fn addressed_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(Workload, String), ControllerError> {
        let workload = self
            .workloads
            .locate(namespace, name)
            .await?
            .ok_or_else(|| ControllerError::WorkloadNotFound(format!("{}/{}", namespace, name)))?;
        let ip = workload.private_ip.clone().ok_or_else(|| {
            ControllerError::WorkloadNotReady(format!("{}/{} has no private address", namespace, name))
        })?;
        Ok((workload, ip))
    }

    /// The provider interface carrying `private_ip`
    pub(crate) async fn interface_with_address(&self, private_ip: &str) -> Result<Interface, ControllerError> {
        let mut matches = self
            .cloud_client
            .query_network_interfaces(&[("private-ip-address", private_ip)])
            .await?;
        debug!("{} interface(s) carry {}", matches.len(), private_ip);
        match matches.len() {
            0 => Err(ControllerError::DependencyNotReady(format!(
                "no network interface with private address {} found",
                private_ip
            ))),
            _ => Ok(matches.swap_remove(0)),
        }
    }

    /// Instance owning `private_ip`; its interface must be attached
    pub(crate) async fn instance_owning(&self, private_ip: &str) -> Result<String, ControllerError> {
        let iface = self.interface_with_address(private_ip).await?;
        iface
            .live_attachment()
            .map(|a| a.instance_id.clone())
            .ok_or_else(|| {
                ControllerError::DependencyNotReady(format!(
                    "network interface {} carrying {} is not attached",
                    iface.network_interface_id, private_ip
                ))
            })
    }
}
