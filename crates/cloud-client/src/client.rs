//! Cloud provider API client
//!
//! REST client for the provider's network API:
//! `/v1/addresses`, `/v1/network-interfaces`, `/v1/instances`, `/v1/security-groups`.

use crate::cloud_trait::CloudClientTrait;
use crate::common::HttpClient;
use crate::error::CloudError;
use crate::models::*;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Cloud provider API client
#[derive(Debug, Clone)]
pub struct CloudClient {
    http: HttpClient,
}

impl CloudClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "http://cloud-api.cloudops:80")
    /// * `token` - bearer token for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http: HttpClient::new(client, base_url, token),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.http.base_url()
    }
}

#[async_trait::async_trait]
impl CloudClientTrait for CloudClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    /// Lightweight authenticated request against the status endpoint.
    async fn validate_token(&self) -> Result<(), CloudError> {
        debug!("Validating cloud API token and connectivity");
        let _: serde_json::Value = self.http.get("/v1/status").await?;
        debug!("Token validated successfully");
        Ok(())
    }

    async fn allocate_address(&self, request: AllocateAddressRequest) -> Result<Address, CloudError> {
        let body = serde_json::to_value(&request)?;
        let address: Address = self.http.post("/v1/addresses", &body).await?;
        info!("Allocated address {} ({})", address.allocation_id, address.public_ip);
        Ok(address)
    }

    async fn describe_address(&self, allocation_id: &str) -> Result<Address, CloudError> {
        self.http
            .get(&format!("/v1/addresses/{}", urlencoding::encode(allocation_id)))
            .await
    }

    async fn associate_address(
        &self,
        allocation_id: &str,
        request: AssociateAddressRequest,
    ) -> Result<Association, CloudError> {
        let body = serde_json::to_value(&request)?;
        self.http
            .post(
                &format!("/v1/addresses/{}/associate", urlencoding::encode(allocation_id)),
                &body,
            )
            .await
    }

    async fn disassociate_address(&self, association_id: &str) -> Result<(), CloudError> {
        self.http
            .delete(&format!("/v1/associations/{}", urlencoding::encode(association_id)))
            .await
    }

    async fn release_address(&self, allocation_id: &str) -> Result<(), CloudError> {
        self.http
            .delete(&format!("/v1/addresses/{}", urlencoding::encode(allocation_id)))
            .await
    }

    async fn create_tags(&self, resource_id: &str, tags: &[Tag]) -> Result<(), CloudError> {
        let body = serde_json::json!({ "tags": tags });
        self.http
            .post_empty(&format!("/v1/resources/{}/tags", urlencoding::encode(resource_id)), &body)
            .await
    }

    async fn delete_tags(&self, resource_id: &str, keys: &[String]) -> Result<(), CloudError> {
        let filters: Vec<(&str, &str)> = keys.iter().map(|k| ("key", k.as_str())).collect();
        let path = self.http.with_query(
            &format!("/v1/resources/{}/tags", urlencoding::encode(resource_id)),
            &filters,
        );
        self.http.delete(&path).await
    }

    async fn create_network_interface(&self, request: CreateInterfaceRequest) -> Result<Interface, CloudError> {
        let body = serde_json::to_value(&request)?;
        let iface: Interface = self.http.post("/v1/network-interfaces", &body).await?;
        info!("Created network interface {} in {}", iface.network_interface_id, iface.subnet_id);
        Ok(iface)
    }

    async fn describe_network_interface(&self, interface_id: &str) -> Result<Interface, CloudError> {
        self.http
            .get(&format!("/v1/network-interfaces/{}", urlencoding::encode(interface_id)))
            .await
    }

    async fn query_network_interfaces(&self, filters: &[(&str, &str)]) -> Result<Vec<Interface>, CloudError> {
        let path = self.http.with_query("/v1/network-interfaces", filters);
        self.http.fetch_all_pages(&path).await
    }

    async fn modify_network_interface(
        &self,
        interface_id: &str,
        request: ModifyInterfaceRequest,
    ) -> Result<Interface, CloudError> {
        let body = serde_json::to_value(&request)?;
        self.http
            .patch(&format!("/v1/network-interfaces/{}", urlencoding::encode(interface_id)), &body)
            .await
    }

    async fn assign_private_ip_addresses(&self, interface_id: &str, count: u32) -> Result<(), CloudError> {
        let body = serde_json::json!({ "secondaryPrivateIpAddressCount": count });
        self.http
            .post_empty(
                &format!("/v1/network-interfaces/{}/private-ip-addresses", urlencoding::encode(interface_id)),
                &body,
            )
            .await
    }

    async fn unassign_private_ip_addresses(&self, interface_id: &str, addresses: &[String]) -> Result<(), CloudError> {
        let body = serde_json::json!({ "privateIpAddresses": addresses });
        self.http
            .post_empty(
                &format!(
                    "/v1/network-interfaces/{}/private-ip-addresses/unassign",
                    urlencoding::encode(interface_id)
                ),
                &body,
            )
            .await
    }

    async fn attach_network_interface(
        &self,
        interface_id: &str,
        request: AttachInterfaceRequest,
    ) -> Result<InterfaceAttachment, CloudError> {
        let body = serde_json::to_value(&request)?;
        self.http
            .post(
                &format!("/v1/network-interfaces/{}/attach", urlencoding::encode(interface_id)),
                &body,
            )
            .await
    }

    async fn detach_network_interface(&self, attachment_id: &str) -> Result<(), CloudError> {
        self.http
            .delete(&format!("/v1/attachments/{}", urlencoding::encode(attachment_id)))
            .await
    }

    async fn delete_network_interface(&self, interface_id: &str) -> Result<(), CloudError> {
        self.http
            .delete(&format!("/v1/network-interfaces/{}", urlencoding::encode(interface_id)))
            .await
    }

    async fn describe_instance(&self, instance_id: &str) -> Result<Instance, CloudError> {
        self.http
            .get(&format!("/v1/instances/{}", urlencoding::encode(instance_id)))
            .await
    }

    async fn query_security_groups(&self, filters: &[(&str, &str)]) -> Result<Vec<SecurityGroup>, CloudError> {
        let path = self.http.with_query("/v1/security-groups", filters);
        self.http.fetch_all_pages(&path).await
    }
}
