//! Unit tests for NetworkInterface reconciler

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use cloud_client::{AttachmentStatus, MockCloudClient, Tag};
    use crds::ENIAttachmentSpec;
    use kube_runtime::controller::Action;
    use std::collections::BTreeSet;
    use std::time::Duration;

    const RESYNC: Duration = Duration::from_secs(300);
    const SETTLE: Duration = Duration::from_secs(5);
    const DETACH: Duration = Duration::from_secs(3);

    async fn step(h: &Harness, name: &str) -> Action {
        h.reconciler
            .reconcile_network_interface("default", name)
            .await
            .unwrap()
    }

    async fn converge(h: &Harness, name: &str) {
        for _ in 0..10 {
            if step(h, name).await == Action::requeue(RESYNC) {
                return;
            }
        }
        panic!("NetworkInterface {} did not converge", name);
    }

    fn interface_id(h: &Harness, name: &str) -> String {
        h.eni_status(name).network_interface_id.unwrap()
    }

    fn settling_harness() -> Harness {
        Harness::with_cloud(MockCloudClient::new("http://mock-cloud").with_settling())
    }

    #[tokio::test]
    async fn test_creates_interface() {
        // Setup
        let h = Harness::new();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 2, None));

        // Execute: finalizer, then create
        assert_eq!(step(&h, "eni-a").await, Action::await_change());
        assert!(h.cloud.calls().is_empty());
        assert_eq!(step(&h, "eni-a").await, Action::await_change());

        // Assert
        let status = h.eni_status("eni-a");
        let iface = h.cloud.interface(&interface_id(&h, "eni-a")).unwrap();
        assert_eq!(status.private_ip_addresses, iface.private_addresses());
        assert_eq!(status.private_ip_addresses.len(), 3);
        assert_eq!(status.mac_address.as_deref(), Some(iface.mac_address.as_str()));
        assert_eq!(iface.subnet_id, "subnet-1");
        assert_eq!(iface.description, "test interface");
        assert_eq!(iface.tags, vec![Tag::new("managed-by", "cloudops")]);
        assert_eq!(iface.group_ids(), BTreeSet::from(["sg-0001".to_string()]));

        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));
    }

    #[tokio::test]
    async fn test_creation_waits_for_secondary_addresses() {
        let h = settling_harness();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 2, None));
        step(&h, "eni-a").await;

        assert_eq!(step(&h, "eni-a").await, Action::requeue(SETTLE));
        assert_eq!(h.eni_status("eni-a").private_ip_addresses.len(), 1);

        // Provider has settled: the address list is refreshed
        assert_eq!(step(&h, "eni-a").await, Action::await_change());
        assert_eq!(h.eni_status("eni-a").private_ip_addresses.len(), 3);
        assert!(h.cloud.mutating_calls().iter().all(|c| c.operation == "create_network_interface"));
    }

    #[tokio::test]
    async fn test_excess_addresses_are_unassigned_highest_first() {
        let h = settling_harness();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 2, None));
        converge(&h, "eni-a").await;
        let addresses = h.eni_status("eni-a").private_ip_addresses;
        assert_eq!(addresses.len(), 3);
        let id = interface_id(&h, "eni-a");

        h.network_interfaces.edit("default", "eni-a", |eni| {
            eni.spec.secondary_private_ip_address_count = 0;
        });
        h.cloud.clear_calls();

        assert_eq!(step(&h, "eni-a").await, Action::requeue(SETTLE));
        let calls = h.cloud.mutating_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].operation, "unassign_private_ip_addresses");
        assert_eq!(calls[0].target, format!("{}:{},{}", id, addresses[2], addresses[1]));

        step(&h, "eni-a").await;
        assert_eq!(h.eni_status("eni-a").private_ip_addresses, vec![addresses[0].clone()]);
        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));
    }

    #[tokio::test]
    async fn test_missing_addresses_are_assigned() {
        let h = Harness::new();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, None));
        converge(&h, "eni-a").await;

        h.network_interfaces.edit("default", "eni-a", |eni| {
            eni.spec.secondary_private_ip_address_count = 2;
        });

        assert_eq!(step(&h, "eni-a").await, Action::requeue(SETTLE));
        assert!(h.cloud.operations().contains(&"assign_private_ip_addresses"));
        step(&h, "eni-a").await;
        assert_eq!(h.eni_status("eni-a").private_ip_addresses.len(), 3);
    }

    #[tokio::test]
    async fn test_description_then_group_drift() {
        let h = Harness::new();
        h.cloud.add_security_group("sg-0002", "web");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, None));
        converge(&h, "eni-a").await;
        let id = interface_id(&h, "eni-a");

        h.network_interfaces.edit("default", "eni-a", |eni| {
            eni.spec.description = "frontend".to_string();
            eni.spec.security_groups = vec!["web".to_string()];
        });

        // One change per pass, description first
        assert_eq!(step(&h, "eni-a").await, Action::requeue(Duration::ZERO));
        let iface = h.cloud.interface(&id).unwrap();
        assert_eq!(iface.description, "frontend");
        assert_eq!(iface.group_ids(), BTreeSet::from(["sg-0001".to_string()]));

        assert_eq!(step(&h, "eni-a").await, Action::requeue(Duration::ZERO));
        let iface = h.cloud.interface(&id).unwrap();
        assert_eq!(iface.group_ids(), BTreeSet::from(["sg-0002".to_string()]));

        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));
    }

    #[tokio::test]
    async fn test_unresolved_group_name_is_config_error() {
        let h = Harness::new();
        let mut eni = create_test_network_interface("eni-a", "default", 0, None);
        eni.spec.security_groups = vec!["no-such-group".to_string()];
        h.network_interfaces.insert(eni);
        step(&h, "eni-a").await;

        let err = h
            .reconciler
            .reconcile_network_interface("default", "eni-a")
            .await
            .unwrap_err();

        assert!(err.is_config_error(), "{}", err);
        assert!(h.cloud.mutating_calls().is_empty());
        assert!(h.eni_status("eni-a").network_interface_id.is_none());
    }

    #[tokio::test]
    async fn test_attaches_to_workload_instance() {
        let h = Harness::new();
        h.add_workload("web-0", "uid-web-0", "i-1", "10.1.0.5");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, Some("web-0")));

        converge(&h, "eni-a").await;

        let attachment = h.eni_status("eni-a").attachment.unwrap();
        assert_eq!(attachment.instance_id, "i-1");
        assert_eq!(attachment.workload_name, "web-0");
        let live = h.cloud.interface(&interface_id(&h, "eni-a")).unwrap().attachment.unwrap();
        assert_eq!(live.instance_id, "i-1");
        assert_eq!(live.device_index, 1);
    }

    #[tokio::test]
    async fn test_attachment_replacement_detaches_then_attaches() {
        let h = Harness::new();
        h.add_workload("web-0", "uid-web-0", "i-1", "10.1.0.5");
        h.add_workload("web-1", "uid-web-1", "i-2", "10.1.0.6");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, Some("web-0")));
        converge(&h, "eni-a").await;
        let id = interface_id(&h, "eni-a");

        h.network_interfaces.edit("default", "eni-a", |eni| {
            eni.spec.attachment = Some(ENIAttachmentSpec {
                workload_name: "web-1".to_string(),
            });
        });
        h.cloud.clear_calls();

        // Detach only
        assert_eq!(step(&h, "eni-a").await, Action::requeue(DETACH));
        let ops: Vec<_> = h.cloud.mutating_calls().into_iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec!["detach_network_interface"]);
        assert!(h.cloud.interface(&id).unwrap().attachment.is_none());

        // Attach on the next pass
        h.cloud.clear_calls();
        step(&h, "eni-a").await;
        let ops: Vec<_> = h.cloud.mutating_calls().into_iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec!["attach_network_interface"]);
        assert_eq!(h.eni_status("eni-a").attachment.unwrap().instance_id, "i-2");
        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));
    }

    #[tokio::test]
    async fn test_removed_attachment_detaches_and_clears_status() {
        let h = Harness::new();
        h.add_workload("web-0", "uid-web-0", "i-1", "10.1.0.5");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, Some("web-0")));
        converge(&h, "eni-a").await;

        h.network_interfaces.edit("default", "eni-a", |eni| eni.spec.attachment = None);

        assert_eq!(step(&h, "eni-a").await, Action::requeue(DETACH));
        assert_eq!(step(&h, "eni-a").await, Action::await_change());
        assert!(h.eni_status("eni-a").attachment.is_none());
        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));
    }

    #[tokio::test]
    async fn test_transitional_attachment_is_waited_out() {
        let h = Harness::new();
        h.add_workload("web-0", "uid-web-0", "i-1", "10.1.0.5");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, Some("web-0")));
        converge(&h, "eni-a").await;
        h.cloud
            .set_attachment_status(&interface_id(&h, "eni-a"), AttachmentStatus::Attaching);
        h.cloud.clear_calls();

        assert_eq!(step(&h, "eni-a").await, Action::requeue(DETACH));
        assert!(h.cloud.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unattached_workload_interface_is_not_ready() {
        let h = Harness::new();
        h.workloads.set("default", "web-0", "uid-web-0", Some("10.1.0.99"));
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, Some("web-0")));
        step(&h, "eni-a").await;
        step(&h, "eni-a").await;

        let err = h
            .reconciler
            .reconcile_network_interface("default", "eni-a")
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::DependencyNotReady(_)), "{}", err);
    }

    #[tokio::test]
    async fn test_converged_interface_is_idempotent() {
        let h = Harness::new();
        h.add_workload("web-0", "uid-web-0", "i-1", "10.1.0.5");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 1, Some("web-0")));
        converge(&h, "eni-a").await;
        h.cloud.clear_calls();
        let writes = h.network_interfaces.writes();

        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));
        assert_eq!(step(&h, "eni-a").await, Action::requeue(RESYNC));

        assert!(h.cloud.mutating_calls().is_empty());
        assert_eq!(h.network_interfaces.writes(), writes);
    }

    #[tokio::test]
    async fn test_deletion_detaches_then_deletes() {
        let h = Harness::new();
        h.add_workload("web-0", "uid-web-0", "i-1", "10.1.0.5");
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, Some("web-0")));
        converge(&h, "eni-a").await;
        let id = interface_id(&h, "eni-a");
        h.cloud.clear_calls();

        h.network_interfaces.request_deletion("default", "eni-a");

        assert_eq!(step(&h, "eni-a").await, Action::requeue(DETACH));
        assert!(h.eni_status("eni-a").attachment.is_none());
        assert_eq!(step(&h, "eni-a").await, Action::await_change());
        assert!(h.network_interface("eni-a").is_some());
        step(&h, "eni-a").await;

        assert!(h.network_interface("eni-a").is_none());
        assert!(h.cloud.interface(&id).is_none());
        let ops: Vec<_> = h.cloud.mutating_calls().into_iter().map(|c| c.operation).collect();
        assert_eq!(ops, vec!["detach_network_interface", "delete_network_interface"]);
    }

    #[tokio::test]
    async fn test_deletion_tolerates_vanished_interface() {
        let h = Harness::new();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, None));
        converge(&h, "eni-a").await;
        h.cloud.remove_interface(&interface_id(&h, "eni-a"));

        h.network_interfaces.request_deletion("default", "eni-a");
        step(&h, "eni-a").await;
        step(&h, "eni-a").await;

        assert!(h.network_interface("eni-a").is_none());
    }

    #[tokio::test]
    async fn test_deletion_before_creation_drops_finalizer() {
        let h = Harness::new();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, None));
        step(&h, "eni-a").await;

        h.network_interfaces.request_deletion("default", "eni-a");
        step(&h, "eni-a").await;

        assert!(h.network_interface("eni-a").is_none());
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_vanished_interface_is_recreated() {
        let h = Harness::new();
        h.network_interfaces
            .insert(create_test_network_interface("eni-a", "default", 0, None));
        converge(&h, "eni-a").await;
        let first = interface_id(&h, "eni-a");

        h.cloud.remove_interface(&first);

        step(&h, "eni-a").await;
        assert!(h.eni_status("eni-a").network_interface_id.is_none());
        step(&h, "eni-a").await;
        let second = interface_id(&h, "eni-a");
        assert_ne!(first, second);
        assert!(h.cloud.interface(&second).is_some());
    }
}
