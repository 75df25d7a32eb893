//! NetworkInterface CRD
//!
//! Declares a provider network interface: where it lives, which security
//! groups guard it, how many secondary private addresses it carries and which
//! workload's instance it should be attached to.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired provider network interface
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloudops.microscaler.io",
    version = "v1alpha1",
    kind = "NetworkInterface",
    namespaced,
    derive = "PartialEq",
    status = "NetworkInterfaceStatus",
    shortname = "eni",
    printcolumn = r#"{"name":"Interface","type":"string","jsonPath":".status.networkInterfaceID"}"#,
    printcolumn = r#"{"name":"Workload","type":"string","jsonPath":".status.attachment.workloadName"}"#,
    printcolumn = r#"{"name":"Private IPs","type":"string","jsonPath":".status.privateIPAddresses"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    /// Subnet the interface is created in (immutable once created)
    #[serde(rename = "subnetID")]
    pub subnet_id: String,

    /// Security group ids (`sg-...`) or group names
    #[serde(default)]
    pub security_groups: Vec<String>,

    /// Number of secondary private addresses on top of the primary
    #[serde(default, rename = "secondaryPrivateIPAddressCount")]
    pub secondary_private_ip_address_count: u32,

    /// Workload whose instance the interface should be attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<ENIAttachmentSpec>,

    /// Provider-side description, kept in sync
    #[serde(default)]
    pub description: String,
}

/// Desired attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ENIAttachmentSpec {
    /// Workload (pod) name in the same namespace
    pub workload_name: String,
}

/// Observed provider interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceStatus {
    /// Provider interface id
    #[serde(default, rename = "networkInterfaceID", skip_serializing_if = "Option::is_none")]
    pub network_interface_id: Option<String>,

    /// Hardware address reported by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    /// Private addresses, primary first
    #[serde(default, rename = "privateIPAddresses")]
    pub private_ip_addresses: Vec<String>,

    /// Resolved attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<ENIAttachmentStatus>,
}

/// Attachment as applied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ENIAttachmentStatus {
    /// Workload the interface was attached for
    pub workload_name: String,

    /// Instance the interface is attached to
    #[serde(rename = "instanceID")]
    pub instance_id: String,
}

impl NetworkInterface {
    /// Provider interface id, if one has been created
    pub fn interface_id(&self) -> Option<&str> {
        self.status.as_ref()?.network_interface_id.as_deref()
    }

    /// Number of private addresses the interface should carry
    pub fn desired_address_count(&self) -> usize {
        1 + self.spec.secondary_private_ip_address_count as usize
    }
}
