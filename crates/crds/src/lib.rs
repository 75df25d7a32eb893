//! CloudOps CRD Definitions
//!
//! Kubernetes Custom Resource Definitions reconciled by the network controller.

pub mod elastic_ip;
pub mod network_interface;

pub use elastic_ip::*;
pub use network_interface::*;

/// API group shared by all CloudOps resources
pub const API_GROUP: &str = "cloudops.microscaler.io";

/// Finalizer held by the network controller on every record it owns
pub const DEFAULT_FINALIZER: &str = "cloudops.microscaler.io/finalizer";
