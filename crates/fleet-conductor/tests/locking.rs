//! Reservation lock: fail-fast acquisition, re-entrancy, guaranteed
//! release and stale-holder takeover.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tracing::Level;

use fleet_conductor::{begin_inspection, ConductorError, DriverRegistry, TaskManager};
use fleet_state::{ProvisionEvent, ProvisionState};
use fleet_store::{ConductorRegistry, Node, NodeStore, StoreError};

use common::*;

const M: ProvisionState = ProvisionState::Manageable;

#[test]
fn acquire_and_release() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);

    let task = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(task.node().reservation.as_ref(), Some(manager.host()));
    assert_eq!(cluster.node(&id).reservation.as_ref(), Some(manager.host()));
    assert_eq!(task.driver().name(), DRIVER);

    manager.release(task).unwrap();
    assert_eq!(cluster.node(&id).reservation, None);
    assert_eq!(manager.hold_count(&id, manager.host()), 0);
}

#[test]
fn unusable_config_is_rejected() {
    let cluster = Cluster::new();
    let mut config = config("cond-a");
    config.workers_pool_size = 0;

    let err = TaskManager::new(
        config,
        cluster.nodes.clone(),
        cluster.conductors.clone(),
        cluster.inventory.clone(),
        DriverRegistry::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ConductorError::Config(_)));
}

#[test]
fn live_holder_causes_conflict() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let peer = cluster.register_peer("cond-b", Duration::from_secs(5));
    cluster.reserve(&id, &peer);

    let err = manager.acquire(&id, manager.host()).unwrap_err();
    assert!(matches!(
        err,
        ConductorError::LockConflict { node, ref holder } if node == id && *holder == peer
    ));
    assert_eq!(cluster.node(&id).reservation, Some(peer));
}

#[test]
fn conflict_is_reported_per_holder() {
    let cluster = Cluster::new();
    let driver = Arc::new(FakeDriver::returning(None));
    let a = cluster.manager(config("cond-a"), Arc::clone(&driver));
    let b = cluster.manager(config("cond-b"), driver);
    let id = cluster.node_in(M, None);

    let held = a.acquire(&id, a.host()).unwrap();
    let err = b.acquire(&id, b.host()).unwrap_err();
    assert!(matches!(err, ConductorError::LockConflict { ref holder, .. } if holder == a.host()));

    drop(held);
    let task = b.acquire(&id, b.host()).unwrap();
    assert_eq!(task.holder(), b.host());
}

#[test]
fn stale_holder_is_taken_over_with_warning() {
    let (captured, _guard) = CapturedEvents::install();
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let peer = cluster.register_peer("cond-b", Duration::from_secs(3600));
    cluster.reserve(&id, &peer);

    let task = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(task.node().reservation.as_ref(), Some(manager.host()));
    assert!(captured.contains(Level::WARN, "taking over reservation of dead conductor"));
}

#[test]
fn unknown_holder_is_taken_over() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    cluster.reserve(&id, &host("vanished"));

    let task = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(cluster.node(&id).reservation.as_ref(), Some(manager.host()));
    drop(task);
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn offline_holder_is_taken_over() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let peer = cluster.register_peer("cond-b", Duration::ZERO);
    cluster.conductors.unregister(&peer).unwrap();
    let id = cluster.node_in(M, None);
    cluster.reserve(&id, &peer);

    assert!(manager.acquire(&id, manager.host()).is_ok());
}

#[test]
fn same_holder_reenters() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);

    let outer = manager.acquire(&id, manager.host()).unwrap();
    let inner = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(manager.hold_count(&id, manager.host()), 2);

    inner.release().unwrap();
    assert_eq!(cluster.node(&id).reservation.as_ref(), Some(manager.host()));
    assert_eq!(manager.hold_count(&id, manager.host()), 1);

    outer.release().unwrap();
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn leftover_own_reservation_is_adopted() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    cluster.reserve(&id, manager.host());

    let task = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(manager.hold_count(&id, manager.host()), 1);
    task.release().unwrap();
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn dropped_task_releases() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);

    {
        let _task = manager.acquire(&id, manager.host()).unwrap();
        assert!(cluster.node(&id).is_reserved());
    }
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn panic_while_holding_releases() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _task = manager.acquire(&id, manager.host()).unwrap();
        panic!("workflow bug");
    }));
    assert!(result.is_err());
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn unknown_node_is_not_found() {
    let (_cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = fleet_core::NodeId::new();
    let err = manager.acquire(&id, manager.host()).unwrap_err();
    assert!(matches!(err, ConductorError::NotFound(n) if n == id));
}

#[test]
fn unknown_driver_takes_no_reservation() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.nodes.create(Node::new("idrac")).unwrap().id;

    let err = manager.acquire(&id, manager.host()).unwrap_err();
    assert!(matches!(err, ConductorError::DriverNotFound(ref name) if name == "idrac"));
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn concurrent_acquisition_has_one_winner() {
    let cluster = Cluster::new();
    let driver = Arc::new(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let managers: Vec<_> = (0..6)
        .map(|i| cluster.manager(config(&format!("cond-{i}")), Arc::clone(&driver)))
        .collect();
    let barrier = Arc::new(std::sync::Barrier::new(managers.len()));

    let handles: Vec<_> = managers
        .into_iter()
        .map(|manager| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                // Keep the winner's task alive past the race.
                let result = manager.acquire(&id, manager.host());
                let won = result.is_ok();
                std::thread::sleep(Duration::from_millis(100));
                drop(result);
                won
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(cluster.node(&id).reservation, None);
}

// ─── Durable Updates ─────────────────────────────────────────────────

#[test]
fn update_persists_and_bumps_version() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let mut task = manager.acquire(&id, manager.host()).unwrap();
    let version = task.node().version;

    task.update(|node| {
        node.apply_event(ProvisionEvent::Inspect)?;
        Ok(())
    })
    .unwrap();

    let stored = cluster.node(&id);
    assert_eq!(stored.provision_state, ProvisionState::Inspecting);
    assert_eq!(stored.version, version + 1);
    assert_eq!(task.node(), &stored);
}

#[test]
fn failed_update_writes_nothing() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(ProvisionState::Available, None);
    let mut task = manager.acquire(&id, manager.host()).unwrap();
    let before = cluster.node(&id);

    let err = task
        .update(|node| {
            node.last_error = Some("half-written".to_string());
            node.apply_event(ProvisionEvent::Wait)?;
            Ok(())
        })
        .unwrap_err();

    assert!(matches!(err, ConductorError::InvalidStateTransition(_)));
    assert_eq!(cluster.node(&id), before);
}

#[test]
fn update_after_takeover_reports_lost_reservation() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let mut task = manager.acquire(&id, manager.host()).unwrap();

    let intruder = host("cond-b");
    cluster
        .nodes
        .swap_reservation(&id, Some(manager.host()), Some(&intruder))
        .unwrap();

    let err = task.update(|_| Ok(())).unwrap_err();
    assert!(matches!(err, ConductorError::ReservationLost { .. }));
    let err = task.release().unwrap_err();
    assert!(matches!(err, ConductorError::ReservationLost { .. }));
    assert_eq!(cluster.node(&id).reservation, Some(intruder));
}

#[test]
fn refresh_sees_concurrent_writes() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let mut task = manager.acquire(&id, manager.host()).unwrap();

    let mut copy = cluster.node(&id);
    copy.maintenance = true;
    cluster.nodes.save(&copy).unwrap();

    assert!(!task.node().maintenance);
    assert!(task.refresh().unwrap().maintenance);
}

#[test]
fn stale_save_is_rejected() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(M, None);
    let stale = cluster.node(&id);
    let _task = manager.acquire(&id, manager.host()).unwrap();

    let err = cluster.nodes.save(&stale).unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));
}

// ─── Recovery ────────────────────────────────────────────────────────

#[test]
fn clear_own_reservations_spares_open_tasks_and_peers() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let leftover = cluster.node_in(M, None);
    let open = cluster.node_in(M, None);
    let peers = cluster.node_in(M, None);
    cluster.reserve(&leftover, manager.host());
    let _task = manager.acquire(&open, manager.host()).unwrap();
    let peer = cluster.register_peer("cond-b", Duration::ZERO);
    cluster.reserve(&peers, &peer);

    assert_eq!(manager.clear_own_reservations().unwrap(), 1);
    assert_eq!(cluster.node(&leftover).reservation, None);
    assert_eq!(cluster.node(&open).reservation.as_ref(), Some(manager.host()));
    assert_eq!(cluster.node(&peers).reservation, Some(peer));
}

#[test]
fn reaper_clears_only_dead_holders() {
    let (captured, _guard) = CapturedEvents::install();
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let live = cluster.register_peer("cond-live", Duration::from_secs(5));
    let dead = cluster.register_peer("cond-dead", Duration::from_secs(3600));
    let live_node = cluster.node_in(M, None);
    let dead_node = cluster.node_in(M, None);
    let gone_node = cluster.node_in(M, None);
    cluster.reserve(&live_node, &live);
    cluster.reserve(&dead_node, &dead);
    cluster.reserve(&gone_node, &host("cond-gone"));

    assert_eq!(manager.reap_stale_reservations().unwrap(), 2);
    assert_eq!(cluster.node(&live_node).reservation, Some(live));
    assert_eq!(cluster.node(&dead_node).reservation, None);
    assert_eq!(cluster.node(&gone_node).reservation, None);
    assert!(captured.contains(Level::WARN, "cleared reservation of dead conductor"));
}

// ─── Orphaned Workflows ──────────────────────────────────────────────

fn inspecting_reserved_by(cluster: &Cluster, holder: &fleet_core::ConductorId) -> fleet_core::NodeId {
    let id = cluster.node_in(ProvisionState::Inspecting, Some(M));
    cluster.reserve(&id, holder);
    id
}

#[test]
fn restart_fails_inspection_left_running() {
    let (captured, _guard) = CapturedEvents::install();
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = inspecting_reserved_by(&cluster, manager.host());

    assert_eq!(manager.clear_own_reservations().unwrap(), 1);

    let node = cluster.node(&id);
    assert_eq!(node.provision_state, ProvisionState::InspectFail);
    assert_eq!(node.target_provision_state, Some(M));
    assert_eq!(
        node.last_error.as_deref(),
        Some("Inspection was aborted due to conductor restart")
    );
    assert_eq!(node.reservation, None);
    assert!(captured.contains(Level::ERROR, "Inspection was aborted due to conductor restart"));

    let mut task = manager.acquire(&id, manager.host()).unwrap();
    begin_inspection(&mut task).unwrap();
    assert_eq!(task.node().provision_state, ProvisionState::Inspecting);
}

#[test]
fn reaper_fails_inspection_of_dead_conductor() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let dead = cluster.register_peer("cond-dead", Duration::from_secs(3600));
    let id = inspecting_reserved_by(&cluster, &dead);

    assert_eq!(manager.reap_stale_reservations().unwrap(), 1);

    let node = cluster.node(&id);
    assert_eq!(node.provision_state, ProvisionState::InspectFail);
    assert_eq!(
        node.last_error.as_deref(),
        Some("Inspection was aborted due to conductor failure")
    );
    assert_eq!(node.reservation, None);
}

#[test]
fn reaper_leaves_waiting_inspections_alone() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let dead = cluster.register_peer("cond-dead", Duration::from_secs(3600));
    let id = cluster.node_in(ProvisionState::InspectWait, Some(M));
    cluster.reserve(&id, &dead);

    assert_eq!(manager.reap_stale_reservations().unwrap(), 1);
    let node = cluster.node(&id);
    assert_eq!(node.provision_state, ProvisionState::InspectWait);
    assert_eq!(node.last_error, None);
}

#[test]
fn takeover_fails_verification_of_dead_conductor() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = cluster.node_in(ProvisionState::Verifying, Some(M));
    cluster.reserve(&id, &host("vanished"));

    let task = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(task.node().provision_state, ProvisionState::Enroll);
    assert_eq!(task.node().target_provision_state, None);
    assert_eq!(
        task.node().last_error.as_deref(),
        Some("Verification was aborted due to conductor failure")
    );
    assert_eq!(cluster.node(&id), *task.node());
}

#[test]
fn adopted_inspection_is_failed() {
    let (cluster, manager, _driver) = single(FakeDriver::returning(None));
    let id = inspecting_reserved_by(&cluster, manager.host());

    let task = manager.acquire(&id, manager.host()).unwrap();
    assert_eq!(task.node().provision_state, ProvisionState::InspectFail);
    assert_eq!(task.node().reservation.as_ref(), Some(manager.host()));
    task.release().unwrap();
    assert_eq!(cluster.node(&id).reservation, None);
}

#[test]
fn failed_recovery_leaves_the_node_unreserved() {
    let cluster = Cluster::new();
    let nodes = FaultyNodeStore::over(&cluster);
    let manager = cluster.manager_over(
        nodes.clone(),
        config("cond-a"),
        Arc::new(FakeDriver::returning(None)),
    );
    let id = cluster.node_in(ProvisionState::Inspecting, Some(M));
    cluster.reserve(&id, &host("vanished"));
    nodes.fail_saves_of(id);

    let err = manager.acquire(&id, manager.host()).unwrap_err();
    assert!(matches!(err, ConductorError::Store(StoreError::Backend(_))));
    let node = cluster.node(&id);
    assert_eq!(node.reservation, None);
    assert_eq!(node.provision_state, ProvisionState::Inspecting);
    assert_eq!(manager.hold_count(&id, manager.host()), 0);
}
