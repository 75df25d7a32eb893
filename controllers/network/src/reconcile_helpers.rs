//! Helper functions shared by the reconcilers
//!
//! Finalizer bookkeeping, tag diffing and not-found tolerance.

use crate::error::ControllerError;
use cloud_client::{CloudError, Tag};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::warn;

#[cfg(test)]
#[path = "reconcile_helpers_test.rs"]
mod reconcile_helpers_test;

/// Whether `record` carries `finalizer`
pub fn has_finalizer<K: Resource>(record: &K, finalizer: &str) -> bool {
    record.finalizers().iter().any(|f| f == finalizer)
}

/// Whether deletion of `record` has been requested
pub fn is_deleting<K: Resource>(record: &K) -> bool {
    record.meta().deletion_timestamp.is_some()
}

/// Copy of `record` with `finalizer` appended (no-op if present)
pub fn with_finalizer<K: Resource + Clone>(record: &K, finalizer: &str) -> K {
    let mut updated = record.clone();
    if !has_finalizer(record, finalizer) {
        updated.finalizers_mut().push(finalizer.to_string());
    }
    updated
}

/// Copy of `record` without `finalizer`
pub fn without_finalizer<K: Resource + Clone>(record: &K, finalizer: &str) -> K {
    let mut updated = record.clone();
    updated.finalizers_mut().retain(|f| f != finalizer);
    updated
}

/// Tag changes needed to make the provider match the desired tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Desired tags missing from the provider or carrying another value
    pub create: Vec<Tag>,
    /// Provider tag keys absent from the desired tags
    pub delete: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.delete.is_empty()
    }
}

/// Symmetric difference between desired tags and the provider's tags
pub fn tag_diff(desired: &BTreeMap<String, String>, actual: &[Tag]) -> TagDiff {
    let create = desired
        .iter()
        .filter(|(key, value)| !actual.iter().any(|t| &t.key == *key && &t.value == *value))
        .map(|(key, value)| Tag::new(key, value))
        .collect();
    let mut delete: Vec<String> = actual
        .iter()
        .filter(|t| !desired.contains_key(&t.key))
        .map(|t| t.key.clone())
        .collect();
    delete.sort();
    delete.dedup();
    TagDiff { create, delete }
}

/// Treat provider not-found as success for cleanup calls
pub fn tolerate_not_found(result: Result<(), CloudError>, what: &str) -> Result<(), ControllerError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!("{} already gone in provider, continuing: {}", what, e);
            Ok(())
        }
        Err(e) => Err(ControllerError::Cloud(e)),
    }
}

/// `namespace/name` key used in logs and backoff bookkeeping
pub fn record_key<K: Resource>(record: &K) -> String {
    format!("{}/{}", record.namespace().unwrap_or_default(), record.name_any())
}
