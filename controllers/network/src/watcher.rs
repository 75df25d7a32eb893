//! Kubernetes resource watchers.
//!
//! One `kube_runtime::Controller` per record kind. The runtime guarantees a
//! single in-flight reconciliation per record; this module maps reconcile
//! outcomes onto requeue decisions:
//! - configuration errors wait for the author to edit the record
//! - conflicts are retried immediately
//! - anything else backs off per record (Fibonacci, reset on success)
//!
//! ElasticIPs are also re-queued when the NetworkInterface or Pod they point
//! at changes; NetworkInterfaces when their attachment workload changes.

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconcile_helpers::record_key;
use crate::reconciler::Reconciler;
use crds::{ElasticIP, NetworkInterface};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared state handed to every reconciliation
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<Metrics>,
    backoff: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<Metrics>) -> Self {
        Self {
            reconciler,
            metrics,
            backoff: Mutex::new(HashMap::new()),
        }
    }

    fn next_backoff(&self, key: &str) -> Duration {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .next_backoff()
    }

    /// Forget the record's backoff; the next failure starts over
    fn clear_backoff(&self, key: &str) {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    #[cfg(test)]
    fn tracked_backoffs(&self) -> usize {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Record the outcome of one reconciliation
    fn observe(&self, kind: &str, key: &str, result: &Result<Action, ControllerError>) {
        match result {
            Ok(_) => {
                self.clear_backoff(&format!("{}/{}", kind, key));
                self.metrics.reconciled(kind, "success");
            }
            Err(_) => self.metrics.reconciled(kind, "error"),
        }
    }

    /// Requeue decision for a failed reconciliation
    pub fn retry_action(&self, kind: &str, key: &str, error: &ControllerError) -> Action {
        self.metrics.failed(kind, error);
        if error.is_config_error() {
            warn!("{} {} is misconfigured, waiting for an edit: {}", kind, key, error);
            return Action::await_change();
        }
        if error.is_conflict() {
            debug!("{} {} changed during reconciliation, retrying: {}", kind, key, error);
            return Action::requeue(Duration::ZERO);
        }
        let delay = self.next_backoff(&format!("{}/{}", kind, key));
        error!("Reconciliation of {} {} failed, retrying in {:?}: {}", kind, key, delay, error);
        Action::requeue(delay)
    }
}

fn error_policy<K>(obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    ctx.retry_action(&K::kind(&()), &record_key(obj.as_ref()), error)
}

async fn reconcile_elastic_ip(obj: Arc<ElasticIP>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let namespace = obj.namespace().unwrap_or_default();
    let result = ctx
        .reconciler
        .reconcile_elastic_ip(&namespace, &obj.name_any())
        .await;
    ctx.observe("ElasticIP", &record_key(obj.as_ref()), &result);
    result
}

async fn reconcile_network_interface(
    obj: Arc<NetworkInterface>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    let namespace = obj.namespace().unwrap_or_default();
    let result = ctx
        .reconciler
        .reconcile_network_interface(&namespace, &obj.name_any())
        .await;
    ctx.observe("NetworkInterface", &record_key(obj.as_ref()), &result);
    result
}

/// ElasticIPs assigned to the NetworkInterface `eni`
pub fn elastic_ips_for_interface(eips: &[Arc<ElasticIP>], eni: &NetworkInterface) -> Vec<ObjectRef<ElasticIP>> {
    let name = eni.name_any();
    eips.iter()
        .filter(|eip| eip.namespace() == eni.namespace())
        .filter(|eip| {
            eip.spec
                .assignment
                .as_ref()
                .and_then(|a| a.network_interface.as_deref())
                == Some(name.as_str())
        })
        .map(|eip| ObjectRef::from_obj(eip.as_ref()))
        .collect()
}

/// ElasticIPs that name, or are bound to, the workload `pod`
pub fn elastic_ips_for_pod(eips: &[Arc<ElasticIP>], pod: &Pod) -> Vec<ObjectRef<ElasticIP>> {
    let name = pod.name_any();
    eips.iter()
        .filter(|eip| eip.namespace() == pod.namespace())
        .filter(|eip| {
            let wanted = eip.spec.assignment.as_ref().and_then(|a| a.workload_name.as_deref());
            let bound = eip
                .status
                .as_ref()
                .and_then(|s| s.assignment.as_ref())
                .and_then(|a| a.workload_name.as_deref());
            wanted == Some(name.as_str()) || bound == Some(name.as_str())
        })
        .map(|eip| ObjectRef::from_obj(eip.as_ref()))
        .collect()
}

/// NetworkInterfaces that should be, or are, attached to the workload `pod`
pub fn network_interfaces_for_pod(enis: &[Arc<NetworkInterface>], pod: &Pod) -> Vec<ObjectRef<NetworkInterface>> {
    let name = pod.name_any();
    enis.iter()
        .filter(|eni| eni.namespace() == pod.namespace())
        .filter(|eni| {
            let wanted = eni.spec.attachment.as_ref().map(|a| a.workload_name.as_str());
            let bound = eni
                .status
                .as_ref()
                .and_then(|s| s.attachment.as_ref())
                .map(|a| a.workload_name.as_str());
            wanted == Some(name.as_str()) || bound == Some(name.as_str())
        })
        .map(|eni| ObjectRef::from_obj(eni.as_ref()))
        .collect()
}

fn runtime_config(config: &ControllerConfig) -> RuntimeConfig {
    RuntimeConfig::default()
        .debounce(config.debounce)
        .concurrency(config.concurrency)
}

/// Runs the ElasticIP controller until its watch stream ends
pub async fn watch_elastic_ips(
    api: Api<ElasticIP>,
    interfaces: Api<NetworkInterface>,
    pods: Api<Pod>,
    ctx: Arc<Context>,
    config: ControllerConfig,
) -> Result<(), ControllerError> {
    info!("Starting ElasticIP watcher");
    let controller = Controller::new(api, watcher::Config::default());
    let by_interface = controller.store();
    let by_pod = controller.store();

    controller
        .watches(interfaces, watcher::Config::default(), move |eni: NetworkInterface| {
            elastic_ips_for_interface(&by_interface.state(), &eni)
        })
        .watches(pods, watcher::Config::default(), move |pod: Pod| {
            elastic_ips_for_pod(&by_pod.state(), &pod)
        })
        .with_config(runtime_config(&config))
        .run(reconcile_elastic_ip, error_policy::<ElasticIP>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled ElasticIP {}", obj),
                Err(e) => warn!("ElasticIP controller error: {}", e),
            }
        })
        .await;

    Err(ControllerError::Watch("ElasticIP watch stream ended".to_string()))
}

/// Runs the NetworkInterface controller until its watch stream ends
pub async fn watch_network_interfaces(
    api: Api<NetworkInterface>,
    pods: Api<Pod>,
    ctx: Arc<Context>,
    config: ControllerConfig,
) -> Result<(), ControllerError> {
    info!("Starting NetworkInterface watcher");
    let controller = Controller::new(api, watcher::Config::default());
    let by_pod = controller.store();

    controller
        .watches(pods, watcher::Config::default(), move |pod: Pod| {
            network_interfaces_for_pod(&by_pod.state(), &pod)
        })
        .with_config(runtime_config(&config))
        .run(reconcile_network_interface, error_policy::<NetworkInterface>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled NetworkInterface {}", obj),
                Err(e) => warn!("NetworkInterface controller error: {}", e),
            }
        })
        .await;

    Err(ControllerError::Watch("NetworkInterface watch stream ended".to_string()))
}
