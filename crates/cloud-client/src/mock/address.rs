//! Floating address and tag operations for MockCloudClient

use super::{MockCloudClient, lock};
use crate::error::CloudError;
use crate::models::*;

pub(crate) fn allocate_address(
    client: &MockCloudClient,
    request: AllocateAddressRequest,
) -> Result<Address, CloudError> {
    let token = request.client_token.clone().unwrap_or_default();
    client.enter("allocate_address", &token)?;

    if !token.is_empty() {
        let existing = lock(&client.client_tokens).get(&token).cloned();
        if let Some(allocation_id) = existing {
            if let Some(address) = client.address(&allocation_id) {
                return Ok(address);
            }
        }
    }

    let n = client.next_id();
    let public_ip = match &request.address {
        Some(ip) => {
            if lock(&client.addresses).values().any(|a| &a.public_ip == ip) {
                return Err(CloudError::InvalidRequest(format!("address {} is already allocated", ip)));
            }
            ip.clone()
        }
        None => format!("203.0.113.{}", n % 250 + 1),
    };
    let address = Address {
        allocation_id: format!("eipalloc-{:08x}", n),
        public_ip,
        association_id: None,
        network_interface_id: None,
        private_ip_address: None,
        tags: vec![],
    };
    lock(&client.addresses).insert(address.allocation_id.clone(), address.clone());
    if !token.is_empty() {
        lock(&client.client_tokens).insert(token, address.allocation_id.clone());
    }
    Ok(address)
}

pub(crate) fn describe_address(client: &MockCloudClient, allocation_id: &str) -> Result<Address, CloudError> {
    client.enter("describe_address", allocation_id)?;
    client
        .address(allocation_id)
        .ok_or_else(|| CloudError::NotFound(format!("address {}", allocation_id)))
}

pub(crate) fn associate_address(
    client: &MockCloudClient,
    allocation_id: &str,
    request: AssociateAddressRequest,
) -> Result<Association, CloudError> {
    client.enter("associate_address", allocation_id)?;

    let iface = client
        .interface(&request.network_interface_id)
        .ok_or_else(|| CloudError::NotFound(format!("network interface {}", request.network_interface_id)))?;
    if !iface.private_addresses().contains(&request.private_ip_address) {
        return Err(CloudError::InvalidRequest(format!(
            "{} does not carry {}",
            request.network_interface_id, request.private_ip_address
        )));
    }

    let mut addresses = lock(&client.addresses);
    let address = addresses
        .get_mut(allocation_id)
        .ok_or_else(|| CloudError::NotFound(format!("address {}", allocation_id)))?;
    if address.association_id.is_some() && !request.allow_reassociation {
        return Err(CloudError::InvalidRequest(format!("address {} is already associated", allocation_id)));
    }

    let association_id = format!("eipassoc-{:08x}", client.next_id());
    address.association_id = Some(association_id.clone());
    address.network_interface_id = Some(request.network_interface_id);
    address.private_ip_address = Some(request.private_ip_address);
    Ok(Association { association_id })
}

pub(crate) fn disassociate_address(client: &MockCloudClient, association_id: &str) -> Result<(), CloudError> {
    client.enter("disassociate_address", association_id)?;
    let mut addresses = lock(&client.addresses);
    let address = addresses
        .values_mut()
        .find(|a| a.association_id.as_deref() == Some(association_id))
        .ok_or_else(|| CloudError::NotFound(format!("association {}", association_id)))?;
    address.association_id = None;
    address.network_interface_id = None;
    address.private_ip_address = None;
    Ok(())
}

pub(crate) fn release_address(client: &MockCloudClient, allocation_id: &str) -> Result<(), CloudError> {
    client.enter("release_address", allocation_id)?;
    let mut addresses = lock(&client.addresses);
    match addresses.get(allocation_id) {
        None => Err(CloudError::NotFound(format!("address {}", allocation_id))),
        Some(address) if address.association_id.is_some() => Err(CloudError::InvalidRequest(format!(
            "address {} is still associated",
            allocation_id
        ))),
        Some(_) => {
            addresses.remove(allocation_id);
            Ok(())
        }
    }
}

fn with_tags<F>(client: &MockCloudClient, resource_id: &str, f: F) -> Result<(), CloudError>
where
    F: FnOnce(&mut Vec<Tag>),
{
    if let Some(address) = lock(&client.addresses).get_mut(resource_id) {
        f(&mut address.tags);
        return Ok(());
    }
    if let Some(iface) = lock(&client.interfaces).get_mut(resource_id) {
        f(&mut iface.tags);
        return Ok(());
    }
    Err(CloudError::NotFound(format!("resource {}", resource_id)))
}

pub(crate) fn create_tags(client: &MockCloudClient, resource_id: &str, tags: &[Tag]) -> Result<(), CloudError> {
    client.enter("create_tags", resource_id)?;
    with_tags(client, resource_id, |existing| {
        for tag in tags {
            existing.retain(|t| t.key != tag.key);
            existing.push(tag.clone());
        }
        existing.sort();
    })
}

pub(crate) fn delete_tags(client: &MockCloudClient, resource_id: &str, keys: &[String]) -> Result<(), CloudError> {
    client.enter("delete_tags", resource_id)?;
    with_tags(client, resource_id, |existing| {
        existing.retain(|t| !keys.contains(&t.key));
    })
}
