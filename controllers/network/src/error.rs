//! Controller-specific error types.
//!
//! Errors are classified for the scheduler: configuration errors wait for
//! the author to edit the record, conflicts are retried at once, everything
//! else backs off.

use cloud_client::CloudError;
use crds::AssignmentError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Network Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Provider API error
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Record changed between read and write
    #[error("Conflict writing {0}")]
    Conflict(String),

    /// ElasticIP assignment does not name exactly one target
    #[error("Invalid assignment: {0}")]
    InvalidAssignment(#[from] AssignmentError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Referenced workload does not exist
    #[error("Workload not found: {0}")]
    WorkloadNotFound(String),

    /// Workload exists but has no private address yet
    #[error("Workload not ready: {0}")]
    WorkloadNotReady(String),

    /// A referenced record or provider object is not in a usable state yet
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    /// Recorded state cannot be acted upon
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe/metrics server failed
    #[error("Server error: {0}")]
    Server(String),
}

impl ControllerError {
    /// Only an edit to the record can fix this
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ControllerError::InvalidAssignment(_) | ControllerError::InvalidConfig(_)
        )
    }

    /// Optimistic-concurrency rejection
    pub fn is_conflict(&self) -> bool {
        match self {
            ControllerError::Conflict(_) => true,
            ControllerError::Kube(KubeError::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }

    /// Short label for metrics
    pub fn class(&self) -> &'static str {
        if self.is_config_error() {
            return "config";
        }
        if self.is_conflict() {
            return "conflict";
        }
        match self {
            ControllerError::Cloud(e) if e.is_not_found() => "not_found",
            ControllerError::Cloud(CloudError::Throttled(_)) => "throttled",
            ControllerError::Cloud(_) => "provider",
            ControllerError::Kube(_) => "kubernetes",
            ControllerError::WorkloadNotFound(_)
            | ControllerError::WorkloadNotReady(_)
            | ControllerError::DependencyNotReady(_) => "dependency",
            _ => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_classified() {
        let err = ControllerError::from(AssignmentError::NoTarget);
        assert!(err.is_config_error());
        assert_eq!(err.class(), "config");
        assert!(ControllerError::InvalidConfig("sg".to_string()).is_config_error());
    }

    #[test]
    fn test_conflict_is_classified() {
        let err = ControllerError::Conflict("ElasticIP default/eip".to_string());
        assert!(err.is_conflict());
        assert!(!err.is_config_error());
        assert_eq!(err.class(), "conflict");
    }

    #[test]
    fn test_provider_errors_are_transient() {
        let err = ControllerError::from(CloudError::Throttled("rate".to_string()));
        assert!(!err.is_config_error());
        assert!(!err.is_conflict());
        assert_eq!(err.class(), "throttled");
        assert_eq!(
            ControllerError::WorkloadNotReady("web-0".to_string()).class(),
            "dependency"
        );
    }
}
