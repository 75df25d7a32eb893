//! ElasticIP reconciliation.
//!
//! One transition per invocation, re-derived from the record and a single
//! describe of the allocation. Every transition is persisted before the next
//! provider effect is attempted, so a crash at any point resumes from the
//! recorded state.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{has_finalizer, is_deleting, record_key, tag_diff, tolerate_not_found};
use cloud_client::{Address, AllocateAddressRequest, AssociateAddressRequest};
use crds::{AssignmentTarget, EIPState, ElasticIP, ElasticIPStatus, ResolvedAssignment};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

/// Where an assignment target currently resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binding {
    pub interface_id: String,
    pub private_ip: String,
    pub workload_name: Option<String>,
    pub workload_uid: Option<String>,
}

/// Status carried into `state` with the binding dropped
fn unbound(status: &ElasticIPStatus, state: EIPState) -> ElasticIPStatus {
    ElasticIPStatus {
        state,
        allocation_id: status.allocation_id.clone(),
        public_ip_address: status.public_ip_address.clone(),
        ..Default::default()
    }
}

impl Reconciler {
    /// Reconciles the ElasticIP `namespace/name`.
    pub async fn reconcile_elastic_ip(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        let Some(eip) = self.elastic_ips.get(namespace, name).await? else {
            debug!("ElasticIP {}/{} no longer exists", namespace, name);
            return Ok(Action::await_change());
        };
        debug!("Reconciling ElasticIP {}/{} in state {}", namespace, name, eip.state());

        if is_deleting(&eip) {
            if !has_finalizer(&eip, &self.config.finalizer) {
                return Ok(Action::await_change());
            }
            return self.finalize_elastic_ip(&eip).await;
        }

        // Reject a malformed assignment before touching anything
        let target = eip
            .spec
            .assignment
            .as_ref()
            .map(|a| a.target())
            .transpose()?;

        if self.ensure_finalizer(self.elastic_ips.as_ref(), &eip).await? {
            return Ok(Action::await_change());
        }

        let state = eip.state();
        if state == EIPState::Allocating {
            return self.allocate(&eip).await;
        }

        let status = eip.status.clone().unwrap_or_default();
        // A vanished allocation is left for the author to sort out
        let Some(address) = self.describe_allocation(&status).await? else {
            let allocation_id = status.allocation_id.as_deref().unwrap_or("<none>");
            warn!(
                "ElasticIP {}: allocation {} not found in the provider, assuming it was released",
                record_key(&eip),
                allocation_id
            );
            return Err(ControllerError::DependencyNotReady(format!(
                "allocation {} of ElasticIP {} not found",
                allocation_id,
                record_key(&eip)
            )));
        };

        match state {
            EIPState::Allocating => self.allocate(&eip).await,
            EIPState::Allocated => self.on_allocated(&eip, target, &address).await,
            EIPState::Assigning => match target {
                Some(target) => self.associate(&eip, &target, &address, false).await,
                None => self.transition(&eip, unbound(&status, EIPState::Allocated)).await,
            },
            EIPState::Assigned => self.on_assigned(&eip, target, &address).await,
            EIPState::Reassigning => match target {
                Some(target) => self.associate(&eip, &target, &address, true).await,
                None => self.transition(&eip, unbound(&status, EIPState::Unassigning)).await,
            },
            EIPState::Unassigning => self.unassign(&eip, Some(&address)).await,
            EIPState::Releasing => Err(ControllerError::InvalidState(format!(
                "ElasticIP {} is releasing without a deletion request",
                record_key(&eip)
            ))),
        }
    }

    /// Deletion path: unbind, release, then let the record go
    async fn finalize_elastic_ip(&self, eip: &ElasticIP) -> Result<Action, ControllerError> {
        let status = eip.status.clone().unwrap_or_default();
        info!("Finalizing ElasticIP {} in state {}", record_key(eip), eip.state());
        match eip.state() {
            EIPState::Allocating => {
                self.release_finalizer(self.elastic_ips.as_ref(), eip).await?;
                Ok(Action::await_change())
            }
            EIPState::Allocated => self.transition(eip, unbound(&status, EIPState::Releasing)).await,
            EIPState::Assigning | EIPState::Assigned | EIPState::Reassigning => {
                self.transition(eip, unbound(&status, EIPState::Unassigning)).await
            }
            EIPState::Unassigning => {
                let address = self.describe_allocation(&status).await?;
                self.unassign(eip, address.as_ref()).await
            }
            EIPState::Releasing => {
                if let Some(allocation_id) = status.allocation_id.as_deref() {
                    tolerate_not_found(
                        self.cloud_client.release_address(allocation_id).await,
                        &format!("allocation {}", allocation_id),
                    )?;
                    info!("Released {} for ElasticIP {}", allocation_id, record_key(eip));
                }
                self.release_finalizer(self.elastic_ips.as_ref(), eip).await?;
                Ok(Action::await_change())
            }
        }
    }

    /// Persist `status` and log the state change
    async fn transition(&self, eip: &ElasticIP, status: ElasticIPStatus) -> Result<Action, ControllerError> {
        let from = eip.state();
        let to = status.state;
        let mut updated = eip.clone();
        updated.status = Some(status);
        self.elastic_ips.update_status(&updated).await?;
        info!("ElasticIP {}: {} -> {}", record_key(eip), from, to);
        Ok(Action::await_change())
    }

    /// `None` when nothing is recorded or the provider no longer has it
    async fn describe_allocation(&self, status: &ElasticIPStatus) -> Result<Option<Address>, ControllerError> {
        let Some(allocation_id) = status.allocation_id.as_deref() else {
            return Ok(None);
        };
        match self.cloud_client.describe_address(allocation_id).await {
            Ok(address) => Ok(Some(address)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn allocate(&self, eip: &ElasticIP) -> Result<Action, ControllerError> {
        // A requested address wins over the pool
        let request = AllocateAddressRequest {
            public_ipv4_pool: match eip.spec.public_ip_address {
                Some(_) => None,
                None => eip.spec.public_ipv4_pool.clone(),
            },
            address: eip.spec.public_ip_address.clone(),
            client_token: eip.metadata.uid.clone(),
        };
        let address = self.cloud_client.allocate_address(request).await?;
        info!(
            "Allocated {} ({}) for ElasticIP {}",
            address.public_ip,
            address.allocation_id,
            record_key(eip)
        );
        self.transition(
            eip,
            ElasticIPStatus {
                state: EIPState::Allocated,
                allocation_id: Some(address.allocation_id),
                public_ip_address: Some(address.public_ip),
                ..Default::default()
            },
        )
        .await
    }

    /// Bring provider tags in line with `spec.tags`. Returns whether anything changed.
    async fn reconcile_tags(&self, eip: &ElasticIP, address: &Address) -> Result<bool, ControllerError> {
        // Unset tags are left alone
        let Some(desired) = eip.spec.tags.as_ref() else {
            return Ok(false);
        };
        let diff = tag_diff(desired, &address.tags);
        if diff.is_empty() {
            return Ok(false);
        }
        if !diff.create.is_empty() {
            self.cloud_client
                .create_tags(&address.allocation_id, &diff.create)
                .await?;
        }
        if !diff.delete.is_empty() {
            self.cloud_client
                .delete_tags(&address.allocation_id, &diff.delete)
                .await?;
        }
        info!(
            "Updated tags of {} for ElasticIP {}: {} set, {} removed",
            address.allocation_id,
            record_key(eip),
            diff.create.len(),
            diff.delete.len()
        );
        Ok(true)
    }

    async fn on_allocated(
        &self,
        eip: &ElasticIP,
        target: Option<AssignmentTarget>,
        address: &Address,
    ) -> Result<Action, ControllerError> {
        self.reconcile_tags(eip, address).await?;
        if target.is_some() {
            let status = eip.status.clone().unwrap_or_default();
            return self.transition(eip, unbound(&status, EIPState::Assigning)).await;
        }
        debug!("ElasticIP {} is allocated with nothing to assign", record_key(eip));
        Ok(Action::requeue(self.config.resync_interval))
    }

    async fn on_assigned(
        &self,
        eip: &ElasticIP,
        target: Option<AssignmentTarget>,
        address: &Address,
    ) -> Result<Action, ControllerError> {
        let status = eip.status.clone().unwrap_or_default();
        let Some(target) = target else {
            return self.transition(eip, unbound(&status, EIPState::Unassigning)).await;
        };

        if let Some(reason) = self.assignment_drift(eip, &target, &status, address).await? {
            info!("ElasticIP {}: {}, reassigning", record_key(eip), reason);
            return self
                .transition(
                    eip,
                    ElasticIPStatus {
                        state: EIPState::Reassigning,
                        association_id: None,
                        ..status
                    },
                )
                .await;
        }

        self.reconcile_tags(eip, address).await?;
        debug!("ElasticIP {} is assigned and up to date", record_key(eip));
        Ok(Action::requeue(self.config.resync_interval))
    }

    /// Why the recorded binding no longer holds, if it doesn't
    async fn assignment_drift(
        &self,
        eip: &ElasticIP,
        target: &AssignmentTarget,
        status: &ElasticIPStatus,
        address: &Address,
    ) -> Result<Option<String>, ControllerError> {
        let requested = status.assignment.as_ref().map(|a| &a.requested);
        if requested != eip.spec.assignment.as_ref() {
            return Ok(Some("assignment changed".to_string()));
        }
        match (&address.association_id, &status.association_id) {
            (None, _) => return Ok(Some("association is gone in the provider".to_string())),
            (Some(live), Some(recorded)) if live != recorded => {
                return Ok(Some(format!("association replaced by {} in the provider", live)));
            }
            (Some(live), None) => {
                return Ok(Some(format!("association {} is not recorded", live)));
            }
            _ => {}
        }

        if let AssignmentTarget::Workload { name } = target {
            let namespace = eip.namespace().unwrap_or_default();
            match self.workloads.locate(&namespace, name).await? {
                None => return Ok(Some(format!("workload {} is gone", name))),
                Some(workload) if status.workload_uid.as_deref() != Some(workload.uid.as_str()) => {
                    return Ok(Some(format!("workload {} was replaced", name)));
                }
                Some(_) => {}
            }
        }
        Ok(None)
    }

    /// Bind the allocation to `target`, adopting a matching live association
    async fn associate(
        &self,
        eip: &ElasticIP,
        target: &AssignmentTarget,
        address: &Address,
        allow_reassociation: bool,
    ) -> Result<Action, ControllerError> {
        let namespace = eip.namespace().unwrap_or_default();
        let binding = self.resolve_target(&namespace, target).await?;

        let already_bound = address.network_interface_id.as_deref() == Some(binding.interface_id.as_str())
            && address.private_ip_address.as_deref() == Some(binding.private_ip.as_str());
        let association_id = match &address.association_id {
            Some(live) if already_bound => {
                info!("ElasticIP {}: adopting existing association {}", record_key(eip), live);
                live.clone()
            }
            _ => {
                let association = self
                    .cloud_client
                    .associate_address(
                        &address.allocation_id,
                        AssociateAddressRequest {
                            network_interface_id: binding.interface_id.clone(),
                            private_ip_address: binding.private_ip.clone(),
                            allow_reassociation,
                        },
                    )
                    .await?;
                info!(
                    "Associated {} with {} on {} ({})",
                    address.public_ip, binding.private_ip, binding.interface_id, association.association_id
                );
                association.association_id
            }
        };

        let status = eip.status.clone().unwrap_or_default();
        self.transition(
            eip,
            ElasticIPStatus {
                state: EIPState::Assigned,
                allocation_id: status.allocation_id,
                public_ip_address: status.public_ip_address,
                association_id: Some(association_id),
                assignment: Some(ResolvedAssignment {
                    requested: eip.spec.assignment.clone().unwrap_or_default(),
                    workload_name: binding.workload_name,
                    private_ip_address: binding.private_ip,
                    network_interface_id: binding.interface_id,
                }),
                workload_uid: binding.workload_uid,
            },
        )
        .await
    }

    /// Drop whatever association the provider reports, then return to `allocated`
    async fn unassign(&self, eip: &ElasticIP, address: Option<&Address>) -> Result<Action, ControllerError> {
        if let Some(association_id) = address.and_then(|a| a.association_id.as_deref()) {
            tolerate_not_found(
                self.cloud_client.disassociate_address(association_id).await,
                &format!("association {}", association_id),
            )?;
            info!("Disassociated {} for ElasticIP {}", association_id, record_key(eip));
        }
        let status = eip.status.clone().unwrap_or_default();
        self.transition(eip, unbound(&status, EIPState::Allocated)).await
    }

    /// Resolve an assignment target to an interface and private address
    pub(crate) async fn resolve_target(
        &self,
        namespace: &str,
        target: &AssignmentTarget,
    ) -> Result<Binding, ControllerError> {
        match target {
            AssignmentTarget::Interface { name, index } => {
                let eni = self
                    .network_interfaces
                    .get(namespace, name)
                    .await?
                    .ok_or_else(|| {
                        ControllerError::DependencyNotReady(format!("NetworkInterface {}/{} not found", namespace, name))
                    })?;
                let status = eni.status.clone().unwrap_or_default();
                let interface_id = status.network_interface_id.clone().ok_or_else(|| {
                    ControllerError::DependencyNotReady(format!(
                        "NetworkInterface {}/{} has not been created yet",
                        namespace, name
                    ))
                })?;
                match status.private_ip_addresses.get(*index) {
                    Some(ip) => Ok(Binding {
                        interface_id,
                        private_ip: ip.clone(),
                        workload_name: None,
                        workload_uid: None,
                    }),
                    // Secondary addresses still settling
                    None if *index < eni.desired_address_count() => {
                        Err(ControllerError::DependencyNotReady(format!(
                            "NetworkInterface {}/{} has {} of {} addresses",
                            namespace,
                            name,
                            status.private_ip_addresses.len(),
                            eni.desired_address_count()
                        )))
                    }
                    None => Err(ControllerError::InvalidConfig(format!(
                        "address index {} out of range for NetworkInterface {}/{} with {} addresses",
                        index,
                        namespace,
                        name,
                        eni.desired_address_count()
                    ))),
                }
            }
            AssignmentTarget::PrivateAddress(ip) => {
                let iface = self.interface_with_address(ip).await?;
                Ok(Binding {
                    interface_id: iface.network_interface_id,
                    private_ip: ip.clone(),
                    workload_name: None,
                    workload_uid: None,
                })
            }
            AssignmentTarget::Workload { name } => {
                let (workload, ip) = self.addressed_workload(namespace, name).await?;
                let iface = self.interface_with_address(&ip).await?;
                Ok(Binding {
                    interface_id: iface.network_interface_id,
                    private_ip: ip,
                    workload_name: Some(name.clone()),
                    workload_uid: Some(workload.uid),
                })
            }
        }
    }
}
