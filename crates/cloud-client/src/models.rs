//! Provider API data models
//!
//! Request and response bodies for the address, interface, instance and
//! security-group endpoints. All bodies are camelCase JSON.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Key/value tag on a provider resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Convert a tag map into the list form the API expects
pub fn tags_from_map(map: &BTreeMap<String, String>) -> Vec<Tag> {
    map.iter().map(|(k, v)| Tag::new(k, v)).collect()
}

/// Paginated list response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

// Addresses

/// Floating public address as reported by describe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub allocation_id: String,
    pub public_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_interface_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateAddressRequest {
    /// Pool to allocate from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ipv4_pool: Option<String>,
    /// Specific address to claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Idempotency key; a repeated allocate with the same token returns the same allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociateAddressRequest {
    pub network_interface_id: String,
    pub private_ip_address: String,
    pub allow_reassociation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    pub association_id: String,
}

// Network interfaces

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupIdentifier {
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateIpAddress {
    pub private_ip_address: String,
    #[serde(default)]
    pub primary: bool,
}

/// Attachment lifecycle as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Attaching,
    Attached,
    Detaching,
    Detached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceAttachment {
    pub attachment_id: String,
    pub instance_id: String,
    pub device_index: u32,
    pub status: AttachmentStatus,
}

/// Network interface as reported by describe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub network_interface_id: String,
    pub subnet_id: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub groups: Vec<GroupIdentifier>,
    #[serde(default)]
    pub private_ip_addresses: Vec<PrivateIpAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<InterfaceAttachment>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Interface {
    /// Private addresses with the primary first, secondaries in provider order
    pub fn private_addresses(&self) -> Vec<String> {
        let primary = self
            .private_ip_addresses
            .iter()
            .filter(|a| a.primary)
            .map(|a| a.private_ip_address.clone());
        let secondary = self
            .private_ip_addresses
            .iter()
            .filter(|a| !a.primary)
            .map(|a| a.private_ip_address.clone());
        primary.chain(secondary).collect()
    }

    pub fn group_ids(&self) -> BTreeSet<String> {
        self.groups.iter().map(|g| g.group_id.clone()).collect()
    }

    /// Attachment that is fully established
    pub fn live_attachment(&self) -> Option<&InterfaceAttachment> {
        self.attachment
            .as_ref()
            .filter(|a| a.status == AttachmentStatus::Attached)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInterfaceRequest {
    pub subnet_id: String,
    pub groups: Vec<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_private_ip_address_count: Option<u32>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

/// Partial update; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyInterfaceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachInterfaceRequest {
    pub instance_id: String,
    pub device_index: u32,
}

// Instances and security groups

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInterface {
    pub network_interface_id: String,
    pub device_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub instance_id: String,
    #[serde(default)]
    pub network_interfaces: Vec<InstanceInterface>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_addresses_primary_first() {
        let iface = Interface {
            network_interface_id: "eni-1".to_string(),
            subnet_id: "subnet-1".to_string(),
            mac_address: String::new(),
            description: String::new(),
            groups: vec![],
            private_ip_addresses: vec![
                PrivateIpAddress { private_ip_address: "10.0.0.9".to_string(), primary: false },
                PrivateIpAddress { private_ip_address: "10.0.0.5".to_string(), primary: true },
                PrivateIpAddress { private_ip_address: "10.0.0.7".to_string(), primary: false },
            ],
            attachment: None,
            tags: vec![],
        };
        assert_eq!(iface.private_addresses(), vec!["10.0.0.5", "10.0.0.9", "10.0.0.7"]);
    }

    #[test]
    fn test_interface_deserializes_attachment_status() {
        let iface: Interface = serde_json::from_value(serde_json::json!({
            "networkInterfaceId": "eni-1",
            "subnetId": "subnet-1",
            "attachment": {
                "attachmentId": "attach-1",
                "instanceId": "i-1",
                "deviceIndex": 1,
                "status": "detaching"
            }
        }))
        .unwrap();
        assert!(iface.live_attachment().is_none());
        assert_eq!(
            iface.attachment.map(|a| a.status),
            Some(AttachmentStatus::Detaching)
        );
    }
}
