//! ElasticIP CRD
//!
//! Declares a floating public address and, optionally, what it should be bound to.
//! The controller walks `status.state` through the allocation lifecycle one step
//! per reconciliation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Desired floating public address
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloudops.microscaler.io",
    version = "v1alpha1",
    kind = "ElasticIP",
    namespaced,
    derive = "PartialEq",
    status = "ElasticIPStatus",
    shortname = "eip",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Public IP","type":"string","jsonPath":".status.publicIPAddress"}"#,
    printcolumn = r#"{"name":"Private IP","type":"string","jsonPath":".status.assignment.privateIPAddress"}"#,
    printcolumn = r#"{"name":"Workload","type":"string","jsonPath":".status.assignment.workloadName"}"#,
    printcolumn = r#"{"name":"Interface","type":"string","jsonPath":".status.assignment.networkInterfaceID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticIPSpec {
    /// What the address should be bound to. Unset means "allocated but unbound".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<EIPAssignmentSpec>,

    /// Provider address pool to allocate from
    #[serde(default, rename = "publicIPv4Pool", skip_serializing_if = "Option::is_none")]
    pub public_ipv4_pool: Option<String>,

    /// Specific public address to claim (takes precedence over the pool)
    #[serde(default, rename = "publicIPAddress", skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<String>,

    /// Tags managed on the allocation. Unset leaves provider tags alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

/// Desired binding as written by the author.
///
/// Exactly one of `workloadName`, `networkInterface` or `privateIPAddress` may be
/// set. Use [`EIPAssignmentSpec::target`] to get the validated form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EIPAssignmentSpec {
    /// Workload (pod) whose private address should receive the public address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,

    /// NetworkInterface record in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface: Option<String>,

    /// Index into the interface's private addresses (0 = primary)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_address_index: Option<u32>,

    /// Raw private address
    #[serde(default, rename = "privateIPAddress", skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
}

/// Validated assignment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentTarget {
    /// Bind to whatever private address the workload currently has
    Workload {
        /// Workload name
        name: String,
    },
    /// Bind to one address of a NetworkInterface record
    Interface {
        /// NetworkInterface record name
        name: String,
        /// Index into its private address list
        index: usize,
    },
    /// Bind to a literal private address
    PrivateAddress(String),
}

/// Assignment misconfiguration. Never retried on a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignmentError {
    /// Nothing to bind to
    #[error("assignment must set one of workloadName, networkInterface or privateIPAddress")]
    NoTarget,

    /// More than one kind of target populated
    #[error("assignment sets more than one target: {}", .0.join(", "))]
    MultipleTargets(Vec<&'static str>),

    /// Index given without an interface
    #[error("networkInterfaceAddressIndex requires networkInterface")]
    IndexWithoutInterface,

    /// Raw address does not parse
    #[error("invalid privateIPAddress: {0}")]
    InvalidPrivateAddress(String),
}

impl EIPAssignmentSpec {
    /// Convert the wire shape into an [`AssignmentTarget`].
    ///
    /// Empty strings count as unset.
    pub fn target(&self) -> Result<AssignmentTarget, AssignmentError> {
        let workload_name = non_empty(self.workload_name.as_ref());
        let network_interface = non_empty(self.network_interface.as_ref());
        let private_ip_address = non_empty(self.private_ip_address.as_ref());

        let populated: Vec<&'static str> = [
            ("workloadName", workload_name.is_some()),
            ("networkInterface", network_interface.is_some()),
            ("privateIPAddress", private_ip_address.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
        .collect();
        if populated.len() > 1 {
            return Err(AssignmentError::MultipleTargets(populated));
        }
        if self.network_interface_address_index.is_some() && network_interface.is_none() {
            return Err(AssignmentError::IndexWithoutInterface);
        }

        if let Some(name) = workload_name {
            return Ok(AssignmentTarget::Workload { name: name.to_string() });
        }
        if let Some(name) = network_interface {
            return Ok(AssignmentTarget::Interface {
                name: name.to_string(),
                index: self.network_interface_address_index.unwrap_or(0) as usize,
            });
        }
        if let Some(ip) = private_ip_address {
            if ip.parse::<Ipv4Addr>().is_err() {
                return Err(AssignmentError::InvalidPrivateAddress(ip.to_string()));
            }
            return Ok(AssignmentTarget::PrivateAddress(ip.to_string()));
        }
        Err(AssignmentError::NoTarget)
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Observed allocation and binding
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticIPStatus {
    /// Lifecycle state
    #[serde(default)]
    pub state: EIPState,

    /// Provider allocation id (set in every state after `allocating`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,

    /// Allocated public address
    #[serde(default, rename = "publicIPAddress", skip_serializing_if = "Option::is_none")]
    pub public_ip_address: Option<String>,

    /// Provider association id (set only while `assigned`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_id: Option<String>,

    /// Resolved binding (set only while `assigned` or `reassigning`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<ResolvedAssignment>,

    /// UID of the workload the address was bound to
    #[serde(default, rename = "workloadUID", skip_serializing_if = "Option::is_none")]
    pub workload_uid: Option<String>,
}

/// The assignment as it was applied.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedAssignment {
    /// Copy of `spec.assignment` at the time of binding
    pub requested: EIPAssignmentSpec,

    /// Workload the address was bound through, for workload assignments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_name: Option<String>,

    /// Private address the public address maps to
    #[serde(rename = "privateIPAddress")]
    pub private_ip_address: String,

    /// Provider interface carrying the private address
    #[serde(rename = "networkInterfaceID")]
    pub network_interface_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
/// ElasticIP lifecycle state
#[serde(rename_all = "lowercase")]
pub enum EIPState {
    /// Finalizer attached, nothing allocated yet
    #[default]
    Allocating,
    /// Address allocated, not bound
    Allocated,
    /// Binding requested
    Assigning,
    /// Bound
    Assigned,
    /// Binding needs to move
    Reassigning,
    /// Binding being removed
    Unassigning,
    /// Address being returned to the provider (deletion only)
    Releasing,
}

impl EIPState {
    /// Wire name of the state
    pub fn as_str(self) -> &'static str {
        match self {
            EIPState::Allocating => "allocating",
            EIPState::Allocated => "allocated",
            EIPState::Assigning => "assigning",
            EIPState::Assigned => "assigned",
            EIPState::Reassigning => "reassigning",
            EIPState::Unassigning => "unassigning",
            EIPState::Releasing => "releasing",
        }
    }
}

impl fmt::Display for EIPState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ElasticIP {
    /// Current state; a record without status is still `allocating`.
    pub fn state(&self) -> EIPState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }
}
