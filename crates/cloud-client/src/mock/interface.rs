//! Network interface, instance and security group operations for MockCloudClient

use super::{MockCloudClient, PendingChange, lock};
use crate::error::CloudError;
use crate::models::*;

fn not_found(interface_id: &str) -> CloudError {
    CloudError::NotFound(format!("network interface {}", interface_id))
}

fn next_private_ip(client: &MockCloudClient) -> String {
    let n = client.next_id();
    format!("10.0.{}.{}", (n / 250) % 250, n % 250 + 1)
}

fn settling(client: &MockCloudClient) -> bool {
    *lock(&client.settling)
}

fn apply(iface: &mut Interface, change: PendingChange) {
    match change {
        PendingChange::Add(ips) => {
            iface.private_ip_addresses.extend(ips.into_iter().map(|ip| PrivateIpAddress {
                private_ip_address: ip,
                primary: false,
            }));
        }
        PendingChange::Remove(ips) => {
            iface
                .private_ip_addresses
                .retain(|a| a.primary || !ips.contains(&a.private_ip_address));
        }
    }
}

/// Apply now, or queue for the next describe when settling
fn change_addresses(client: &MockCloudClient, interface_id: &str, change: PendingChange) -> Result<(), CloudError> {
    if settling(client) {
        lock(&client.pending).entry(interface_id.to_string()).or_default().push(change);
        return Ok(());
    }
    let mut interfaces = lock(&client.interfaces);
    let iface = interfaces.get_mut(interface_id).ok_or_else(|| not_found(interface_id))?;
    apply(iface, change);
    Ok(())
}

fn group_identifiers(client: &MockCloudClient, ids: &[String]) -> Vec<GroupIdentifier> {
    let groups = lock(&client.security_groups);
    ids.iter()
        .map(|id| GroupIdentifier {
            group_id: id.clone(),
            group_name: groups
                .iter()
                .find(|g| &g.group_id == id)
                .map(|g| g.group_name.clone())
                .unwrap_or_default(),
        })
        .collect()
}

pub(crate) fn create_network_interface(
    client: &MockCloudClient,
    request: CreateInterfaceRequest,
) -> Result<Interface, CloudError> {
    let token = request.client_token.clone().unwrap_or_default();
    client.enter("create_network_interface", &token)?;
    if request.subnet_id.is_empty() {
        return Err(CloudError::InvalidRequest("subnetId is required".to_string()));
    }

    if !token.is_empty() {
        let existing = lock(&client.client_tokens).get(&token).cloned();
        if let Some(interface_id) = existing {
            if let Some(iface) = client.interface(&interface_id) {
                return Ok(iface);
            }
        }
    }

    let n = client.next_id();
    let interface_id = format!("eni-{:08x}", n);
    let mut iface = Interface {
        network_interface_id: interface_id.clone(),
        subnet_id: request.subnet_id,
        mac_address: format!("02:00:00:00:{:02x}:{:02x}", (n >> 8) & 0xff, n & 0xff),
        description: request.description,
        groups: group_identifiers(client, &request.groups),
        private_ip_addresses: vec![PrivateIpAddress {
            private_ip_address: next_private_ip(client),
            primary: true,
        }],
        attachment: None,
        tags: request.tags,
    };
    let secondary: Vec<String> = (0..request.secondary_private_ip_address_count.unwrap_or(0))
        .map(|_| next_private_ip(client))
        .collect();
    if settling(client) && !secondary.is_empty() {
        lock(&client.pending)
            .entry(interface_id.clone())
            .or_default()
            .push(PendingChange::Add(secondary));
    } else {
        apply(&mut iface, PendingChange::Add(secondary));
    }

    lock(&client.interfaces).insert(interface_id.clone(), iface.clone());
    if !token.is_empty() {
        lock(&client.client_tokens).insert(token, interface_id);
    }
    Ok(iface)
}

pub(crate) fn describe_network_interface(client: &MockCloudClient, interface_id: &str) -> Result<Interface, CloudError> {
    client.enter("describe_network_interface", interface_id)?;
    let pending = lock(&client.pending).remove(interface_id).unwrap_or_default();
    let mut interfaces = lock(&client.interfaces);
    let iface = interfaces.get_mut(interface_id).ok_or_else(|| not_found(interface_id))?;
    for change in pending {
        apply(iface, change);
    }
    Ok(iface.clone())
}

pub(crate) fn query_network_interfaces(
    client: &MockCloudClient,
    filters: &[(&str, &str)],
) -> Result<Vec<Interface>, CloudError> {
    client.enter(
        "query_network_interfaces",
        &filters.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(","),
    )?;
    let interfaces = lock(&client.interfaces);
    Ok(interfaces
        .values()
        .filter(|iface| {
            filters.iter().all(|(key, value)| match *key {
                "private-ip-address" => iface
                    .private_ip_addresses
                    .iter()
                    .any(|a| a.private_ip_address == *value),
                "attachment.instance-id" => iface
                    .attachment
                    .as_ref()
                    .is_some_and(|a| a.instance_id == *value),
                "subnet-id" => iface.subnet_id == *value,
                _ => true,
            })
        })
        .cloned()
        .collect())
}

pub(crate) fn modify_network_interface(
    client: &MockCloudClient,
    interface_id: &str,
    request: ModifyInterfaceRequest,
) -> Result<Interface, CloudError> {
    client.enter("modify_network_interface", interface_id)?;
    let groups = request.groups.as_deref().map(|ids| group_identifiers(client, ids));
    let mut interfaces = lock(&client.interfaces);
    let iface = interfaces.get_mut(interface_id).ok_or_else(|| not_found(interface_id))?;
    if let Some(description) = request.description {
        iface.description = description;
    }
    if let Some(groups) = groups {
        iface.groups = groups;
    }
    Ok(iface.clone())
}

pub(crate) fn assign_private_ip_addresses(client: &MockCloudClient, interface_id: &str, count: u32) -> Result<(), CloudError> {
    client.enter("assign_private_ip_addresses", interface_id)?;
    if client.interface(interface_id).is_none() {
        return Err(not_found(interface_id));
    }
    let ips: Vec<String> = (0..count).map(|_| next_private_ip(client)).collect();
    change_addresses(client, interface_id, PendingChange::Add(ips))
}

pub(crate) fn unassign_private_ip_addresses(
    client: &MockCloudClient,
    interface_id: &str,
    addresses: &[String],
) -> Result<(), CloudError> {
    client.enter(
        "unassign_private_ip_addresses",
        &format!("{}:{}", interface_id, addresses.join(",")),
    )?;
    let iface = client.interface(interface_id).ok_or_else(|| not_found(interface_id))?;
    if iface
        .private_ip_addresses
        .iter()
        .any(|a| a.primary && addresses.contains(&a.private_ip_address))
    {
        return Err(CloudError::InvalidRequest("cannot unassign the primary address".to_string()));
    }
    change_addresses(client, interface_id, PendingChange::Remove(addresses.to_vec()))
}

pub(crate) fn attach_network_interface(
    client: &MockCloudClient,
    interface_id: &str,
    request: AttachInterfaceRequest,
) -> Result<InterfaceAttachment, CloudError> {
    client.enter("attach_network_interface", interface_id)?;
    let mut instances = lock(&client.instances);
    let instance = instances
        .get_mut(&request.instance_id)
        .ok_or_else(|| CloudError::NotFound(format!("instance {}", request.instance_id)))?;
    if instance.network_interfaces.iter().any(|i| i.device_index == request.device_index) {
        return Err(CloudError::InvalidRequest(format!(
            "device index {} is in use on {}",
            request.device_index, request.instance_id
        )));
    }

    let mut interfaces = lock(&client.interfaces);
    let iface = interfaces.get_mut(interface_id).ok_or_else(|| not_found(interface_id))?;
    if iface.attachment.is_some() {
        return Err(CloudError::InvalidRequest(format!("{} is already attached", interface_id)));
    }
    let attachment = InterfaceAttachment {
        attachment_id: format!("eni-attach-{:08x}", client.next_id()),
        instance_id: request.instance_id.clone(),
        device_index: request.device_index,
        status: AttachmentStatus::Attached,
    };
    iface.attachment = Some(attachment.clone());
    instance.network_interfaces.push(InstanceInterface {
        network_interface_id: interface_id.to_string(),
        device_index: request.device_index,
    });
    Ok(attachment)
}

pub(crate) fn detach_network_interface(client: &MockCloudClient, attachment_id: &str) -> Result<(), CloudError> {
    client.enter("detach_network_interface", attachment_id)?;
    let (interface_id, attachment) = {
        let mut interfaces = lock(&client.interfaces);
        let iface = interfaces
            .values_mut()
            .find(|i| i.attachment.as_ref().is_some_and(|a| a.attachment_id == attachment_id))
            .ok_or_else(|| CloudError::NotFound(format!("attachment {}", attachment_id)))?;
        (iface.network_interface_id.clone(), iface.attachment.take())
    };
    if let Some(attachment) = attachment {
        if let Some(instance) = lock(&client.instances).get_mut(&attachment.instance_id) {
            instance.network_interfaces.retain(|i| i.network_interface_id != interface_id);
        }
    }
    Ok(())
}

pub(crate) fn delete_network_interface(client: &MockCloudClient, interface_id: &str) -> Result<(), CloudError> {
    client.enter("delete_network_interface", interface_id)?;
    let mut interfaces = lock(&client.interfaces);
    match interfaces.get(interface_id) {
        None => Err(not_found(interface_id)),
        Some(iface) if iface.attachment.is_some() => Err(CloudError::InvalidRequest(format!(
            "{} is still attached",
            interface_id
        ))),
        Some(_) => {
            interfaces.remove(interface_id);
            lock(&client.pending).remove(interface_id);
            Ok(())
        }
    }
}

pub(crate) fn describe_instance(client: &MockCloudClient, instance_id: &str) -> Result<Instance, CloudError> {
    client.enter("describe_instance", instance_id)?;
    lock(&client.instances)
        .get(instance_id)
        .cloned()
        .ok_or_else(|| CloudError::NotFound(format!("instance {}", instance_id)))
}

pub(crate) fn query_security_groups(
    client: &MockCloudClient,
    filters: &[(&str, &str)],
) -> Result<Vec<SecurityGroup>, CloudError> {
    client.enter(
        "query_security_groups",
        &filters.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(","),
    )?;
    Ok(lock(&client.security_groups)
        .iter()
        .filter(|g| {
            filters.iter().all(|(key, value)| match *key {
                "group-name" => g.group_name == *value,
                "group-id" => g.group_id == *value,
                _ => true,
            })
        })
        .cloned()
        .collect())
}
