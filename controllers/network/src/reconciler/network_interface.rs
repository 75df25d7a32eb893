//! NetworkInterface reconciliation.
//!
//! Creates the provider interface, then converges description, security
//! groups, secondary address count and attachment, one change per pass.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{has_finalizer, is_deleting, record_key, tolerate_not_found};
use cloud_client::{
    AttachInterfaceRequest, AttachmentStatus, CreateInterfaceRequest, Interface, InterfaceAttachment,
    ModifyInterfaceRequest, tags_from_map,
};
use crds::{ENIAttachmentStatus, NetworkInterface, NetworkInterfaceStatus};
use kube_runtime::controller::Action;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Reconciles the NetworkInterface `namespace/name`.
    pub async fn reconcile_network_interface(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        let Some(eni) = self.network_interfaces.get(namespace, name).await? else {
            debug!("NetworkInterface {}/{} no longer exists", namespace, name);
            return Ok(Action::await_change());
        };
        debug!("Reconciling NetworkInterface {}/{}", namespace, name);

        if is_deleting(&eni) {
            if !has_finalizer(&eni, &self.config.finalizer) {
                return Ok(Action::await_change());
            }
            return self.finalize_network_interface(&eni).await;
        }

        if self.ensure_finalizer(self.network_interfaces.as_ref(), &eni).await? {
            return Ok(Action::await_change());
        }

        let groups = self.resolve_security_groups(&eni).await?;
        let status = eni.status.clone().unwrap_or_default();
        let Some(interface_id) = status.network_interface_id.clone() else {
            return self.create_interface(&eni, groups).await;
        };

        let iface = match self.cloud_client.describe_network_interface(&interface_id).await {
            Ok(iface) => iface,
            Err(e) if e.is_not_found() => {
                warn!(
                    "NetworkInterface {}: {} is gone from the provider, recreating",
                    record_key(&eni),
                    interface_id
                );
                self.write_interface_status(&eni, NetworkInterfaceStatus::default()).await?;
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e.into()),
        };

        if iface.description != eni.spec.description {
            self.cloud_client
                .modify_network_interface(
                    &interface_id,
                    ModifyInterfaceRequest {
                        description: Some(eni.spec.description.clone()),
                        groups: None,
                    },
                )
                .await?;
            info!("Updated description of {} for NetworkInterface {}", interface_id, record_key(&eni));
            return Ok(Action::requeue(Duration::ZERO));
        }

        if iface.group_ids() != groups.iter().cloned().collect::<BTreeSet<_>>() {
            self.cloud_client
                .modify_network_interface(
                    &interface_id,
                    ModifyInterfaceRequest {
                        description: None,
                        groups: Some(groups.clone()),
                    },
                )
                .await?;
            info!(
                "Updated security groups of {} for NetworkInterface {}: {}",
                interface_id,
                record_key(&eni),
                groups.join(",")
            );
            return Ok(Action::requeue(Duration::ZERO));
        }

        let actual = iface.private_addresses();
        let desired = eni.desired_address_count();
        if actual.len() < desired {
            let deficit = u32::try_from(desired - actual.len())
                .map_err(|e| ControllerError::InvalidState(e.to_string()))?;
            self.cloud_client
                .assign_private_ip_addresses(&interface_id, deficit)
                .await?;
            info!(
                "Assigned {} secondary address(es) to {} for NetworkInterface {}",
                deficit,
                interface_id,
                record_key(&eni)
            );
            return Ok(Action::requeue(self.config.settle_delay));
        }
        if actual.len() > desired {
            // Highest index first; the primary is never in the excess
            let excess: Vec<String> = actual[desired..].iter().rev().cloned().collect();
            self.cloud_client
                .unassign_private_ip_addresses(&interface_id, &excess)
                .await?;
            info!(
                "Unassigned {} from {} for NetworkInterface {}",
                excess.join(","),
                interface_id,
                record_key(&eni)
            );
            return Ok(Action::requeue(self.config.settle_delay));
        }

        if status.private_ip_addresses != actual || status.mac_address.as_deref() != Some(iface.mac_address.as_str()) {
            info!("Refreshing addresses of NetworkInterface {}: {}", record_key(&eni), actual.join(","));
            self.write_interface_status(
                &eni,
                NetworkInterfaceStatus {
                    mac_address: Some(iface.mac_address.clone()),
                    private_ip_addresses: actual,
                    ..status
                },
            )
            .await?;
            return Ok(Action::await_change());
        }

        self.reconcile_attachment(&eni, &iface).await
    }

    /// Deletion path: detach, delete, clear the observed section, drop the finalizer
    async fn finalize_network_interface(&self, eni: &NetworkInterface) -> Result<Action, ControllerError> {
        let status = eni.status.clone().unwrap_or_default();
        let Some(interface_id) = status.network_interface_id.clone() else {
            self.release_finalizer(self.network_interfaces.as_ref(), eni).await?;
            return Ok(Action::await_change());
        };
        info!("Finalizing NetworkInterface {} ({})", record_key(eni), interface_id);

        let iface = match self.cloud_client.describe_network_interface(&interface_id).await {
            Ok(iface) => iface,
            Err(e) if e.is_not_found() => {
                info!("{} already deleted for NetworkInterface {}", interface_id, record_key(eni));
                self.write_interface_status(eni, NetworkInterfaceStatus::default()).await?;
                return Ok(Action::await_change());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(attachment) = &iface.attachment {
            match attachment.status {
                AttachmentStatus::Attaching | AttachmentStatus::Detaching => {
                    debug!("{} is {:?}, waiting", interface_id, attachment.status);
                    return Ok(Action::requeue(self.config.detach_delay));
                }
                AttachmentStatus::Attached => {
                    self.detach(eni, attachment).await?;
                    self.write_interface_status(
                        eni,
                        NetworkInterfaceStatus {
                            attachment: None,
                            ..status
                        },
                    )
                    .await?;
                    return Ok(Action::requeue(self.config.detach_delay));
                }
                AttachmentStatus::Detached => {}
            }
        }

        tolerate_not_found(
            self.cloud_client.delete_network_interface(&interface_id).await,
            &format!("network interface {}", interface_id),
        )?;
        info!("Deleted {} for NetworkInterface {}", interface_id, record_key(eni));
        self.write_interface_status(eni, NetworkInterfaceStatus::default()).await?;
        Ok(Action::await_change())
    }

    async fn write_interface_status(
        &self,
        eni: &NetworkInterface,
        status: NetworkInterfaceStatus,
    ) -> Result<(), ControllerError> {
        let mut updated = eni.clone();
        updated.status = Some(status);
        self.network_interfaces.update_status(&updated).await
    }

    async fn create_interface(&self, eni: &NetworkInterface, groups: Vec<String>) -> Result<Action, ControllerError> {
        let secondary = eni.spec.secondary_private_ip_address_count;
        let iface = self
            .cloud_client
            .create_network_interface(CreateInterfaceRequest {
                subnet_id: eni.spec.subnet_id.clone(),
                groups,
                description: eni.spec.description.clone(),
                secondary_private_ip_address_count: (secondary > 0).then_some(secondary),
                tags: tags_from_map(&self.config.default_tags),
                client_token: eni.metadata.uid.clone(),
            })
            .await?;
        let addresses = iface.private_addresses();
        info!(
            "Created {} in {} for NetworkInterface {} with {} address(es)",
            iface.network_interface_id,
            iface.subnet_id,
            record_key(eni),
            addresses.len()
        );

        let settled = addresses.len() == eni.desired_address_count();
        self.write_interface_status(
            eni,
            NetworkInterfaceStatus {
                network_interface_id: Some(iface.network_interface_id),
                mac_address: Some(iface.mac_address),
                private_ip_addresses: addresses,
                attachment: None,
            },
        )
        .await?;
        if settled {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(self.config.settle_delay))
        }
    }

    /// Security group identifiers for `spec.securityGroups`, resolving names by lookup
    async fn resolve_security_groups(&self, eni: &NetworkInterface) -> Result<Vec<String>, ControllerError> {
        let mut ids = Vec::with_capacity(eni.spec.security_groups.len());
        for group in &eni.spec.security_groups {
            if group.starts_with("sg-") {
                ids.push(group.clone());
                continue;
            }
            let matches = self
                .cloud_client
                .query_security_groups(&[("group-name", group.as_str())])
                .await?;
            match matches.as_slice() {
                [sg] => ids.push(sg.group_id.clone()),
                [] => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "security group {} not found",
                        group
                    )));
                }
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "security group name {} matches {} groups",
                        group,
                        matches.len()
                    )));
                }
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn detach(&self, eni: &NetworkInterface, attachment: &InterfaceAttachment) -> Result<(), ControllerError> {
        tolerate_not_found(
            self.cloud_client
                .detach_network_interface(&attachment.attachment_id)
                .await,
            &format!("attachment {}", attachment.attachment_id),
        )?;
        info!(
            "Detached NetworkInterface {} from {}",
            record_key(eni),
            attachment.instance_id
        );
        Ok(())
    }

    async fn reconcile_attachment(&self, eni: &NetworkInterface, iface: &Interface) -> Result<Action, ControllerError> {
        if let Some(attachment) = iface
            .attachment
            .as_ref()
            .filter(|a| matches!(a.status, AttachmentStatus::Attaching | AttachmentStatus::Detaching))
        {
            debug!(
                "NetworkInterface {} attachment is {:?}, waiting",
                record_key(eni),
                attachment.status
            );
            return Ok(Action::requeue(self.config.detach_delay));
        }

        let status = eni.status.clone().unwrap_or_default();
        let desired = eni.spec.attachment.as_ref().map(|a| a.workload_name.as_str());
        match (iface.live_attachment(), desired) {
            (Some(attachment), None) => {
                self.detach(eni, attachment).await?;
                Ok(Action::requeue(self.config.detach_delay))
            }
            (None, None) => {
                if status.attachment.is_some() {
                    self.write_interface_status(
                        eni,
                        NetworkInterfaceStatus {
                            attachment: None,
                            ..status
                        },
                    )
                    .await?;
                    return Ok(Action::await_change());
                }
                debug!("NetworkInterface {} is up to date", record_key(eni));
                Ok(Action::requeue(self.config.resync_interval))
            }
            (None, Some(workload)) => self.attach(eni, iface, workload).await,
            (Some(attachment), Some(workload)) => {
                let namespace = eni.metadata.namespace.clone().unwrap_or_default();
                let (_, ip) = self.addressed_workload(&namespace, workload).await?;
                let instance_id = self.instance_owning(&ip).await?;
                if instance_id != attachment.instance_id {
                    info!(
                        "NetworkInterface {} is attached to {} but {} runs on {}",
                        record_key(eni),
                        attachment.instance_id,
                        workload,
                        instance_id
                    );
                    self.detach(eni, attachment).await?;
                    return Ok(Action::requeue(self.config.detach_delay));
                }

                let observed = ENIAttachmentStatus {
                    workload_name: workload.to_string(),
                    instance_id,
                };
                if status.attachment.as_ref() != Some(&observed) {
                    self.write_interface_status(
                        eni,
                        NetworkInterfaceStatus {
                            attachment: Some(observed),
                            ..status
                        },
                    )
                    .await?;
                    return Ok(Action::await_change());
                }
                debug!("NetworkInterface {} is up to date", record_key(eni));
                Ok(Action::requeue(self.config.resync_interval))
            }
        }
    }

    async fn attach(&self, eni: &NetworkInterface, iface: &Interface, workload: &str) -> Result<Action, ControllerError> {
        let namespace = eni.metadata.namespace.clone().unwrap_or_default();
        let (_, ip) = self.addressed_workload(&namespace, workload).await?;
        let instance_id = self.instance_owning(&ip).await?;
        let instance = self.cloud_client.describe_instance(&instance_id).await?;
        let device_index = u32::try_from(instance.network_interfaces.len())
            .map_err(|e| ControllerError::InvalidState(e.to_string()))?;

        let attachment = self
            .cloud_client
            .attach_network_interface(
                &iface.network_interface_id,
                AttachInterfaceRequest {
                    instance_id: instance_id.clone(),
                    device_index,
                },
            )
            .await?;
        info!(
            "Attached NetworkInterface {} to {} at device {} ({})",
            record_key(eni),
            instance_id,
            device_index,
            attachment.attachment_id
        );

        let status = eni.status.clone().unwrap_or_default();
        self.write_interface_status(
            eni,
            NetworkInterfaceStatus {
                attachment: Some(ENIAttachmentStatus {
                    workload_name: workload.to_string(),
                    instance_id,
                }),
                ..status
            },
        )
        .await?;
        Ok(Action::await_change())
    }
}
