//! Test utilities for unit testing reconcilers
//!
//! In-memory stand-ins for the record store and the workload locator, record
//! builders and a harness wiring them to a `MockCloudClient`.

use crate::config::ReconcilerConfig;
use crate::error::ControllerError;
use crate::locator::{Workload, WorkloadLocator};
use crate::reconciler::Reconciler;
use crate::store::RecordStore;
use async_trait::async_trait;
use cloud_client::MockCloudClient;
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory record store with resourceVersion compare-and-swap.
///
/// A record whose deletion was requested disappears once its last
/// finalizer is removed.
#[derive(Clone)]
pub struct MemoryStore<K> {
    records: Arc<Mutex<BTreeMap<(String, String), K>>>,
    version: Arc<Mutex<u64>>,
    writes: Arc<Mutex<usize>>,
    conflicts: Arc<Mutex<usize>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            records: Arc::new(Mutex::new(BTreeMap::new())),
            version: Arc::new(Mutex::new(0)),
            writes: Arc::new(Mutex::new(0)),
            conflicts: Arc::new(Mutex::new(0)),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn bump(&self, record: &mut K) {
        let mut version = self.version.lock().unwrap();
        *version += 1;
        record.meta_mut().resource_version = Some(version.to_string());
    }

    fn key(record: &K) -> (String, String) {
        (record.namespace().unwrap_or_default(), record.name_any())
    }

    /// Insert (or overwrite) a record as its author would
    pub fn insert(&self, mut record: K) {
        if record.meta().uid.is_none() {
            record.meta_mut().uid = Some(format!("uid-{}", record.name_any()));
        }
        self.bump(&mut record);
        self.records.lock().unwrap().insert(Self::key(&record), record);
    }

    pub fn record(&self, namespace: &str, name: &str) -> Option<K> {
        self.records
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Apply an author edit to the desired section
    pub fn edit<F: FnOnce(&mut K)>(&self, namespace: &str, name: &str, f: F) {
        let mut record = self.record(namespace, name).expect("record exists");
        f(&mut record);
        self.bump(&mut record);
        self.records.lock().unwrap().insert(Self::key(&record), record);
    }

    /// Mark a record for deletion; removes it at once if it holds no finalizers
    pub fn request_deletion(&self, namespace: &str, name: &str) {
        let timestamp: Time = serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
        let mut records = self.records.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        if let Some(record) = records.get_mut(&key) {
            if record.finalizers().is_empty() {
                records.remove(&key);
                return;
            }
            record.meta_mut().deletion_timestamp = Some(timestamp);
        }
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }

    /// Reject the next write as if another writer got there first
    pub fn conflict_next_write(&self) {
        *self.conflicts.lock().unwrap() += 1;
    }

    fn compare_and_swap(&self, record: &K, finalizers_only: bool) -> Result<(), ControllerError> {
        let key = Self::key(record);
        {
            let mut conflicts = self.conflicts.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                return Err(ControllerError::Conflict(format!("{}/{}", key.0, key.1)));
            }
        }
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get(&key)
            .ok_or_else(|| ControllerError::Conflict(format!("{}/{} is gone", key.0, key.1)))?;
        if stored.meta().resource_version != record.meta().resource_version {
            return Err(ControllerError::Conflict(format!("{}/{}", key.0, key.1)));
        }

        let mut updated = if finalizers_only {
            let mut updated = stored.clone();
            updated.meta_mut().finalizers = record.meta().finalizers.clone();
            updated
        } else {
            let mut updated = record.clone();
            updated.meta_mut().finalizers = stored.meta().finalizers.clone();
            updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
            updated
        };
        drop(records);
        self.bump(&mut updated);
        *self.writes.lock().unwrap() += 1;

        let mut records = self.records.lock().unwrap();
        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            records.remove(&key);
        } else {
            records.insert(key, updated);
        }
        Ok(())
    }
}

#[async_trait]
impl<K> RecordStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ControllerError> {
        Ok(self.record(namespace, name))
    }

    async fn update_finalizers(&self, record: &K) -> Result<(), ControllerError> {
        self.compare_and_swap(record, true)
    }

    async fn update_status(&self, record: &K) -> Result<(), ControllerError> {
        self.compare_and_swap(record, false)
    }
}

/// Workload locator backed by a map
#[derive(Clone, Default)]
pub struct StaticLocator {
    workloads: Arc<Mutex<HashMap<(String, String), Workload>>>,
}

impl StaticLocator {
    pub fn set(&self, namespace: &str, name: &str, uid: &str, private_ip: Option<&str>) {
        self.workloads.lock().unwrap().insert(
            (namespace.to_string(), name.to_string()),
            Workload {
                uid: uid.to_string(),
                private_ip: private_ip.map(str::to_string),
            },
        );
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.workloads
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
impl WorkloadLocator for StaticLocator {
    async fn locate(&self, namespace: &str, name: &str) -> Result<Option<Workload>, ControllerError> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Reconciler wired to in-memory collaborators, with handles to inspect them
pub struct Harness {
    pub reconciler: Reconciler,
    pub cloud: MockCloudClient,
    pub elastic_ips: MemoryStore<ElasticIP>,
    pub network_interfaces: MemoryStore<NetworkInterface>,
    pub workloads: StaticLocator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_cloud(MockCloudClient::new("http://mock-cloud"))
    }

    pub fn with_cloud(cloud: MockCloudClient) -> Self {
        let mut config = test_config();
        config.default_tags.insert("managed-by".to_string(), "cloudops".to_string());
        Self::with_config(cloud, config)
    }

    pub fn with_config(cloud: MockCloudClient, config: ReconcilerConfig) -> Self {
        let elastic_ips = MemoryStore::default();
        let network_interfaces = MemoryStore::default();
        let workloads = StaticLocator::default();
        let reconciler = Reconciler::new(
            Box::new(cloud.clone()),
            Box::new(elastic_ips.clone()),
            Box::new(network_interfaces.clone()),
            Box::new(workloads.clone()),
            config,
        );
        Self {
            reconciler,
            cloud,
            elastic_ips,
            network_interfaces,
            workloads,
        }
    }

    pub fn elastic_ip(&self, name: &str) -> Option<ElasticIP> {
        self.elastic_ips.record("default", name)
    }

    pub fn network_interface(&self, name: &str) -> Option<NetworkInterface> {
        self.network_interfaces.record("default", name)
    }

    pub fn eip_status(&self, name: &str) -> ElasticIPStatus {
        self.elastic_ip(name)
            .and_then(|e| e.status)
            .unwrap_or_default()
    }

    pub fn eni_status(&self, name: &str) -> NetworkInterfaceStatus {
        self.network_interface(name)
            .and_then(|e| e.status)
            .unwrap_or_default()
    }

    /// Register a running workload backed by an instance with a primary interface
    pub fn add_workload(&self, name: &str, uid: &str, instance_id: &str, private_ip: &str) -> String {
        self.workloads.set("default", name, uid, Some(private_ip));
        self.cloud.add_instance(instance_id, private_ip)
    }
}

pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        default_tags: BTreeMap::new(),
        finalizer: DEFAULT_FINALIZER.to_string(),
        settle_delay: Duration::from_secs(5),
        detach_delay: Duration::from_secs(3),
        resync_interval: Duration::from_secs(300),
    }
}

/// Helper to create test ElasticIP CRD
pub fn create_test_elastic_ip(
    name: &str,
    namespace: &str,
    assignment: Option<EIPAssignmentSpec>,
) -> ElasticIP {
    ElasticIP {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ElasticIPSpec {
            assignment,
            ..Default::default()
        },
        status: None,
    }
}

pub fn workload_assignment(name: &str) -> EIPAssignmentSpec {
    EIPAssignmentSpec {
        workload_name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn interface_assignment(name: &str, index: u32) -> EIPAssignmentSpec {
    EIPAssignmentSpec {
        network_interface: Some(name.to_string()),
        network_interface_address_index: Some(index),
        ..Default::default()
    }
}

pub fn address_assignment(ip: &str) -> EIPAssignmentSpec {
    EIPAssignmentSpec {
        private_ip_address: Some(ip.to_string()),
        ..Default::default()
    }
}

/// Helper to create test NetworkInterface CRD
pub fn create_test_network_interface(
    name: &str,
    namespace: &str,
    secondary_count: u32,
    attachment: Option<&str>,
) -> NetworkInterface {
    NetworkInterface {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: NetworkInterfaceSpec {
            subnet_id: "subnet-1".to_string(),
            security_groups: vec!["sg-0001".to_string()],
            secondary_private_ip_address_count: secondary_count,
            attachment: attachment.map(|w| ENIAttachmentSpec {
                workload_name: w.to_string(),
            }),
            description: "test interface".to_string(),
        },
        status: None,
    }
}
