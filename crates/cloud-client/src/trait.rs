//! CloudClient trait for mocking
//!
//! The concrete `CloudClient` implements this trait; controllers hold a
//! `Box<dyn CloudClientTrait>` so tests can swap in `MockCloudClient`.

use crate::error::CloudError;
use crate::models::*;

/// Provider network API operations
///
/// Every mutating call is idempotent by resource id or client token. Calls
/// against a resource that no longer exists fail with [`CloudError::NotFound`].
#[async_trait::async_trait]
pub trait CloudClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Validate the API token
    async fn validate_token(&self) -> Result<(), CloudError>;

    // Addresses
    async fn allocate_address(&self, request: AllocateAddressRequest) -> Result<Address, CloudError>;
    async fn describe_address(&self, allocation_id: &str) -> Result<Address, CloudError>;
    async fn associate_address(&self, allocation_id: &str, request: AssociateAddressRequest) -> Result<Association, CloudError>;
    async fn disassociate_address(&self, association_id: &str) -> Result<(), CloudError>;
    async fn release_address(&self, allocation_id: &str) -> Result<(), CloudError>;

    // Tags
    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), CloudError>;
    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<(), CloudError>;

    // Network interfaces
    async fn create_network_interface(&self, request: CreateInterfaceRequest) -> Result<Interface, CloudError>;
    async fn describe_network_interface(&self, interface_id: &str) -> Result<Interface, CloudError>;
    async fn query_network_interfaces(&self, filters: &[(&str, &str)]) -> Result<Vec<Interface>, CloudError>;
    async fn modify_network_interface(&self, interface_id: &str, request: ModifyInterfaceRequest) -> Result<Interface, CloudError>;
    async fn assign_private_ip_addresses(&self, interface_id: &str, count: u32) -> Result<(), CloudError>;
    async fn unassign_private_ip_addresses(&self, interface_id: &str, addresses: &[String]) -> Result<(), CloudError>;
    async fn attach_network_interface(&self, interface_id: &str, request: AttachInterfaceRequest) -> Result<InterfaceAttachment, CloudError>;
    async fn detach_network_interface(&self, attachment_id: &str) -> Result<(), CloudError>;
    async fn delete_network_interface(&self, interface_id: &str) -> Result<(), CloudError>;

    // Instances and security groups
    async fn describe_instance(&self, instance_id: &str) -> Result<Instance, CloudError>;
    async fn query_security_groups(&self, filters: &[(&str, &str)]) -> Result<Vec<SecurityGroup>, CloudError>;
}
