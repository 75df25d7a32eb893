//! Mock CloudClient for unit testing
//!
//! An in-memory provider implementing `CloudClientTrait`. It keeps a log of
//! every call so tests can assert exactly which side effects a reconciliation
//! produced, supports one-shot failure injection per operation, and can model
//! the provider settling secondary-address changes asynchronously.
//!
//! The operations are organized into domain-specific modules:
//! - `address.rs` - floating addresses and tags
//! - `interface.rs` - network interfaces, instances and security groups

mod address;
mod interface;

use crate::cloud_trait::CloudClientTrait;
use crate::error::CloudError;
use crate::models::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Trait method name, e.g. `associate_address`
    pub operation: &'static str,
    /// Primary resource the call targeted (id, token or filter).
    /// Unassign calls append the released addresses: `eni-1:10.0.0.3,10.0.0.2`.
    pub target: String,
}

impl Call {
    /// Describe/query/validate calls have no side effects
    pub fn is_mutating(&self) -> bool {
        !(self.operation.starts_with("describe")
            || self.operation.starts_with("query")
            || self.operation == "validate_token")
    }
}

/// Secondary-address change that becomes visible on the next describe
#[derive(Debug, Clone)]
pub(crate) enum PendingChange {
    Add(Vec<String>),
    Remove(Vec<String>),
}

/// Mock CloudClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockCloudClient {
    pub(crate) base_url: String,
    pub(crate) addresses: Arc<Mutex<BTreeMap<String, Address>>>,
    pub(crate) interfaces: Arc<Mutex<BTreeMap<String, Interface>>>,
    pub(crate) instances: Arc<Mutex<BTreeMap<String, Instance>>>,
    pub(crate) security_groups: Arc<Mutex<Vec<SecurityGroup>>>,
    pub(crate) client_tokens: Arc<Mutex<HashMap<String, String>>>,
    pub(crate) pending: Arc<Mutex<HashMap<String, Vec<PendingChange>>>>,
    pub(crate) settling: Arc<Mutex<bool>>,
    pub(crate) calls: Arc<Mutex<Vec<Call>>>,
    pub(crate) failures: Arc<Mutex<HashMap<&'static str, VecDeque<CloudError>>>>,
    // Counter for generating IDs
    pub(crate) next_id: Arc<Mutex<u64>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockCloudClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Secondary-address changes only show up on the following describe
    pub fn with_settling(self) -> Self {
        *lock(&self.settling) = true;
        self
    }

    pub(crate) fn next_id(&self) -> u64 {
        let mut id = lock(&self.next_id);
        *id += 1;
        *id
    }

    /// Record the call and pop an injected failure, if any
    pub(crate) fn enter(&self, operation: &'static str, target: &str) -> Result<(), CloudError> {
        lock(&self.calls).push(Call {
            operation,
            target: target.to_string(),
        });
        match lock(&self.failures).get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // Test setup

    /// Make the next call to `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: CloudError) {
        lock(&self.failures).entry(operation).or_default().push_back(error);
    }

    pub fn add_security_group(&self, group_id: &str, group_name: &str) {
        lock(&self.security_groups).push(SecurityGroup {
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            description: String::new(),
        });
    }

    /// Add an instance with a primary interface (device 0) holding `private_ip`.
    /// Returns the interface id.
    pub fn add_instance(&self, instance_id: &str, private_ip: &str) -> String {
        let n = self.next_id();
        let interface_id = format!("eni-{:08x}", n);
        let iface = Interface {
            network_interface_id: interface_id.clone(),
            subnet_id: "subnet-primary".to_string(),
            mac_address: format!("02:00:00:00:{:02x}:{:02x}", (n >> 8) & 0xff, n & 0xff),
            description: format!("primary interface of {}", instance_id),
            groups: vec![],
            private_ip_addresses: vec![PrivateIpAddress {
                private_ip_address: private_ip.to_string(),
                primary: true,
            }],
            attachment: Some(InterfaceAttachment {
                attachment_id: format!("eni-attach-{:08x}", n),
                instance_id: instance_id.to_string(),
                device_index: 0,
                status: AttachmentStatus::Attached,
            }),
            tags: vec![],
        };
        lock(&self.interfaces).insert(interface_id.clone(), iface);
        lock(&self.instances).insert(
            instance_id.to_string(),
            Instance {
                instance_id: instance_id.to_string(),
                network_interfaces: vec![InstanceInterface {
                    network_interface_id: interface_id.clone(),
                    device_index: 0,
                }],
            },
        );
        interface_id
    }

    pub fn add_interface(&self, iface: Interface) {
        lock(&self.interfaces).insert(iface.network_interface_id.clone(), iface);
    }

    pub fn add_address(&self, address: Address) {
        lock(&self.addresses).insert(address.allocation_id.clone(), address);
    }

    // Inspection and out-of-band changes

    pub fn address(&self, allocation_id: &str) -> Option<Address> {
        lock(&self.addresses).get(allocation_id).cloned()
    }

    pub fn addresses(&self) -> Vec<Address> {
        lock(&self.addresses).values().cloned().collect()
    }

    pub fn interface(&self, interface_id: &str) -> Option<Interface> {
        lock(&self.interfaces).get(interface_id).cloned()
    }

    pub fn interfaces(&self) -> Vec<Interface> {
        lock(&self.interfaces).values().cloned().collect()
    }

    /// Drop an association behind the controller's back
    pub fn remove_association(&self, allocation_id: &str) {
        if let Some(address) = lock(&self.addresses).get_mut(allocation_id) {
            address.association_id = None;
            address.network_interface_id = None;
            address.private_ip_address = None;
        }
    }

    /// Delete an interface behind the controller's back
    pub fn remove_interface(&self, interface_id: &str) {
        lock(&self.interfaces).remove(interface_id);
    }

    /// Force an attachment into a transitional status
    pub fn set_attachment_status(&self, interface_id: &str, status: AttachmentStatus) {
        if let Some(attachment) = lock(&self.interfaces)
            .get_mut(interface_id)
            .and_then(|i| i.attachment.as_mut())
        {
            attachment.status = status;
        }
    }

    pub fn set_tags(&self, allocation_id: &str, tags: Vec<Tag>) {
        if let Some(address) = lock(&self.addresses).get_mut(allocation_id) {
            address.tags = tags;
        }
    }

    // Call log

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        lock(&self.calls).iter().filter(|c| c.is_mutating()).cloned().collect()
    }

    pub fn operations(&self) -> Vec<&'static str> {
        lock(&self.calls).iter().map(|c| c.operation).collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

#[async_trait::async_trait]
impl CloudClientTrait for MockCloudClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_token(&self) -> Result<(), CloudError> {
        self.enter("validate_token", "")
    }

    async fn allocate_address(&self, request: AllocateAddressRequest) -> Result<Address, CloudError> {
        address::allocate_address(self, request)
    }

    async fn describe_address(&self, allocation_id: &str) -> Result<Address, CloudError> {
        address::describe_address(self, allocation_id)
    }

    async fn associate_address(&self, allocation_id: &str, request: AssociateAddressRequest) -> Result<Association, CloudError> {
        address::associate_address(self, allocation_id, request)
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<(), CloudError> {
        address::disassociate_address(self, association_id)
    }

    async fn release_address(&self, allocation_id: &str) -> Result<(), CloudError> {
        address::release_address(self, allocation_id)
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), CloudError> {
        address::create_tags(self, resource_id, tags)
    }

    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<(), CloudError> {
        address::delete_tags(self, resource_id, keys)
    }

    async fn create_network_interface(&self, request: CreateInterfaceRequest) -> Result<Interface, CloudError> {
        interface::create_network_interface(self, request)
    }

    async fn describe_network_interface(&self, interface_id: &str) -> Result<Interface, CloudError> {
        interface::describe_network_interface(self, interface_id)
    }

    async fn query_network_interfaces(&self, filters: &[(&str, &str)]) -> Result<Vec<Interface>, CloudError> {
        interface::query_network_interfaces(self, filters)
    }

    async fn modify_network_interface(&self, interface_id: &str, request: ModifyInterfaceRequest) -> Result<Interface, CloudError> {
        interface::modify_network_interface(self, interface_id, request)
    }

    async fn assign_private_ip_addresses(&self, interface_id: &str, count: u32) -> Result<(), CloudError> {
        interface::assign_private_ip_addresses(self, interface_id, count)
    }

    async fn unassign_private_ip_addresses(&self, interface_id: &str, addresses: &[String]) -> Result<(), CloudError> {
        interface::unassign_private_ip_addresses(self, interface_id, addresses)
    }

    async fn attach_network_interface(&self, interface_id: &str, request: AttachInterfaceRequest) -> Result<InterfaceAttachment, CloudError> {
        interface::attach_network_interface(self, interface_id, request)
    }

    async fn detach_network_interface(&self, attachment_id: &str) -> Result<(), CloudError> {
        interface::detach_network_interface(self, attachment_id)
    }

    async fn delete_network_interface(&self, interface_id: &str) -> Result<(), CloudError> {
        interface::delete_network_interface(self, interface_id)
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        interface::describe_instance(self, instance_id)
    }

    async fn query_security_groups(&self, filters: &[(&str, &str)]) -> Result<Vec<SecurityGroup>, CloudError> {
        interface::query_security_groups(self, filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_reuses_client_token() {
        let mock = MockCloudClient::new("http://mock-cloud");
        let request = AllocateAddressRequest {
            client_token: Some("uid-1".to_string()),
            ..Default::default()
        };

        let first = mock.allocate_address(request.clone()).await.unwrap();
        let second = mock.allocate_address(request).await.unwrap();

        assert_eq!(first.allocation_id, second.allocation_id);
        assert_eq!(mock.addresses().len(), 1);
    }

    #[tokio::test]
    async fn test_release_refuses_associated_address() {
        let mock = MockCloudClient::new("http://mock-cloud");
        let interface_id = mock.add_instance("i-1", "10.1.0.5");
        let address = mock.allocate_address(AllocateAddressRequest::default()).await.unwrap();
        let association = mock
            .associate_address(
                &address.allocation_id,
                AssociateAddressRequest {
                    network_interface_id: interface_id,
                    private_ip_address: "10.1.0.5".to_string(),
                    allow_reassociation: false,
                },
            )
            .await
            .unwrap();

        let err = mock.release_address(&address.allocation_id).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidRequest(_)));

        mock.disassociate_address(&association.association_id).await.unwrap();
        mock.release_address(&address.allocation_id).await.unwrap();
        assert!(mock.release_address(&address.allocation_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mock = MockCloudClient::new("http://mock-cloud");
        mock.fail_next("validate_token", CloudError::Throttled("slow down".to_string()));

        assert!(mock.validate_token().await.unwrap_err().is_transient());
        assert!(mock.validate_token().await.is_ok());
        assert!(mock.mutating_calls().is_empty());
        assert_eq!(mock.operations(), vec!["validate_token", "validate_token"]);
    }

    #[tokio::test]
    async fn test_settling_defers_address_changes() {
        let mock = MockCloudClient::new("http://mock-cloud").with_settling();
        let interface_id = mock.add_instance("i-1", "10.1.0.5");

        mock.assign_private_ip_addresses(&interface_id, 2).await.unwrap();
        assert_eq!(mock.interface(&interface_id).unwrap().private_addresses().len(), 1);

        let described = mock.describe_network_interface(&interface_id).await.unwrap();
        assert_eq!(described.private_addresses().len(), 3);
    }
}
