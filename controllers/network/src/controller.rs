//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler
//! to the Kubernetes API and the provider, and supervises the watchers and
//! the probe server.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::locator::PodLocator;
use crate::metrics::{self, Metrics};
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::{Context, watch_elastic_ips, watch_network_interfaces};
use cloud_client::{CloudClient, CloudClientTrait};
use crds::{ElasticIP, NetworkInterface};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, Resource};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for ElasticIP and NetworkInterface records.
#[derive(Debug)]
pub struct Controller {
    elastic_ip_watcher: JoinHandle<Result<(), ControllerError>>,
    network_interface_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Network Controller");

        let metrics = Arc::new(Metrics::new()?);
        let probe_server = tokio::spawn(metrics::serve(config.probe_addr, metrics.clone()));

        // Create Kubernetes client
        let kube_client = Client::try_default().await?;

        // Create provider client
        let cloud_client = CloudClient::new(config.cloud_api_url.clone(), config.cloud_api_token.clone())?;
        if let Err(e) = cloud_client.validate_token().await {
            warn!("Cloud API token validation failed, continuing: {}", e);
        }

        let namespace = config.namespace.as_deref();
        let elastic_ip_api: Api<ElasticIP> = scoped_api(kube_client.clone(), namespace);
        let network_interface_api: Api<NetworkInterface> = scoped_api(kube_client.clone(), namespace);
        let pod_api: Api<Pod> = scoped_api(kube_client.clone(), namespace);

        let reconciler = Reconciler::new(
            Box::new(cloud_client),
            Box::new(KubeStore::<ElasticIP>::new(kube_client.clone())),
            Box::new(KubeStore::<NetworkInterface>::new(kube_client.clone())),
            Box::new(PodLocator::new(kube_client)),
            config.reconciler.clone(),
        );
        let ctx = Arc::new(Context::new(Arc::new(reconciler), metrics.clone()));

        let elastic_ip_watcher = tokio::spawn(watch_elastic_ips(
            elastic_ip_api,
            network_interface_api.clone(),
            pod_api.clone(),
            ctx.clone(),
            config.clone(),
        ));
        let network_interface_watcher = tokio::spawn(watch_network_interfaces(
            network_interface_api,
            pod_api,
            ctx,
            config,
        ));

        metrics.set_ready();

        Ok(Self {
            elastic_ip_watcher,
            network_interface_watcher,
            probe_server,
        })
    }

    /// Runs the controller until a watcher or the probe server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Network Controller running");

        // Any of these returning is fatal; the pod restarts
        tokio::select! {
            result = &mut self.elastic_ip_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ElasticIP watcher panicked: {}", e)))??;
            }
            result = &mut self.network_interface_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NetworkInterface watcher panicked: {}", e)))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Server(format!("probe server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
