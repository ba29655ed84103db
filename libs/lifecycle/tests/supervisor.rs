//! Supervisor behavior: promotion, failure propagation, recovery, close.

use std::sync::Arc;

use domino_lifecycle::{
    ConfigurationStore, Lifecycle, LifecycleError, LifecycleFactory, LifecycleStatus, NodeState,
};
use domino_testing::{
    eventually, init_tracing, settle, wait_for_state, CloseLog, FakeLifecycle, LeafMonitor,
    ScriptedConfigLeaf, ScriptedLeaf, StatusRecorder, DEFAULT_TIMEOUT,
};
use rstest::rstest;
use serde_json::json;

fn factory() -> LifecycleFactory {
    init_tracing();
    LifecycleFactory::from_current().unwrap()
}

fn leaves(factory: &LifecycleFactory, n: usize) -> (Vec<Arc<dyn Lifecycle>>, Vec<LeafMonitor>) {
    (0..n)
        .map(|_| {
            let (leaf, monitor) = ScriptedLeaf::new();
            (factory.leaf("Worker", leaf).unwrap().into_child(), monitor)
        })
        .unzip()
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(8)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn promotion_requires_every_child(#[case] ready: usize) {
    let factory = factory();
    let store = ConfigurationStore::new();
    let (mut children, monitors) = leaves(&factory, ready);
    let (late_leaf, _late_monitor) = ScriptedConfigLeaf::new();
    let late = factory
        .configuration_reactive_leaf("Listener", "listener", Arc::new(store.clone()), late_leaf)
        .unwrap();
    children.push(late.clone().into_child());

    let root = factory.supervisor("Root", children).unwrap();
    let recorder = StatusRecorder::following(factory.registry(), [root.name()]);
    root.start();

    for monitor in &monitors {
        assert!(eventually(DEFAULT_TIMEOUT, || monitor.held() == 1).await);
    }
    settle().await;
    assert_eq!(root.current_state(), NodeState::Created);
    assert!(recorder.statuses_of(root.name()).is_empty());

    store.publish("listener", json!({ "port": 8080 }));
    assert!(wait_for_state(&root, NodeState::Started).await);
    assert!(root.children().iter().all(|c| c.is_running()));
    assert_eq!(recorder.statuses_of(root.name()), vec![LifecycleStatus::Up]);
}

#[tokio::test]
async fn supervisor_without_children_starts_immediately() {
    let factory = factory();
    let root = factory.supervisor("Root", Vec::new()).unwrap();

    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_child_stops_siblings_but_not_unrelated_composite() {
    let factory = factory();

    let (a, a_monitor) = ScriptedLeaf::new();
    let (b, b_monitor) = ScriptedLeaf::new();
    let (c, _c_monitor) = ScriptedLeaf::failing();
    let composite = factory
        .supervisor(
            "Composite",
            vec![
                factory.leaf("A", a).unwrap().into_child(),
                factory.leaf("B", b).unwrap().into_child(),
                factory.leaf("C", c).unwrap().into_child(),
            ],
        )
        .unwrap();
    let parent = factory
        .supervisor("Parent", vec![composite.clone().into_child()])
        .unwrap();

    let (d, d_monitor) = ScriptedLeaf::new();
    let unrelated = factory
        .supervisor("Unrelated", vec![factory.leaf("D", d).unwrap().into_child()])
        .unwrap();

    let recorder = StatusRecorder::following(factory.registry(), [parent.name()]);
    unrelated.start();
    parent.start();

    assert!(wait_for_state(&composite, NodeState::StoppedDueToError).await);
    assert!(wait_for_state(&parent, NodeState::StoppedDueToError).await);
    for child in &composite.children()[..2] {
        assert!(wait_for_state(child.as_ref(), NodeState::StoppedByParent).await);
    }
    assert_eq!(a_monitor.held(), 0);
    assert_eq!(b_monitor.held(), 0);
    assert_eq!(recorder.statuses_of(parent.name()), vec![LifecycleStatus::Error]);

    assert!(wait_for_state(&unrelated, NodeState::Started).await);
    settle().await;
    assert_eq!(unrelated.current_state(), NodeState::Started);
    assert_eq!(d_monitor.held(), 1);
}

#[tokio::test]
async fn stop_is_terminal_safe() {
    let factory = factory();
    let (children, monitors) = leaves(&factory, 2);
    let root = factory.supervisor("Root", children).unwrap();
    let recorder = StatusRecorder::following(factory.registry(), [root.name()]);

    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);

    root.stop();
    assert!(wait_for_state(&root, NodeState::StoppedByParent).await);
    root.stop();
    root.stop();
    settle().await;

    assert_eq!(root.current_state(), NodeState::StoppedByParent);
    for monitor in &monitors {
        assert_eq!(monitor.releases(), 1);
    }
    assert_eq!(
        recorder.statuses_of(root.name()),
        vec![LifecycleStatus::Up, LifecycleStatus::Down]
    );
}

#[tokio::test]
async fn restart_after_stop() {
    let factory = factory();
    let (children, monitors) = leaves(&factory, 2);
    let root = factory.supervisor("Root", children).unwrap();

    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);
    root.stop();
    assert!(wait_for_state(&root, NodeState::StoppedByParent).await);
    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);

    for monitor in &monitors {
        assert_eq!(monitor.acquisitions(), 2);
        assert_eq!(monitor.held(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runtime_child_error_propagates_and_restart_recovers() {
    let factory = factory();
    let (children, monitors) = leaves(&factory, 2);
    let root = factory.supervisor("Root", children).unwrap();

    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);

    assert!(monitors[0].inject_error("connection reset"));
    assert!(wait_for_state(&root, NodeState::StoppedDueToError).await);
    assert!(wait_for_state(root.children()[1].as_ref(), NodeState::StoppedByParent).await);
    assert_eq!(monitors[1].held(), 0);

    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);
    assert_eq!(monitors[0].acquisitions(), 2);
    assert_eq!(monitors[1].acquisitions(), 2);
}

#[tokio::test]
async fn child_self_healing_restores_parent() {
    let factory = factory();
    let store = ConfigurationStore::new();
    let (leaf, _monitor) = ScriptedConfigLeaf::new();
    let listener = factory
        .configuration_reactive_leaf("Listener", "listener", Arc::new(store.clone()), leaf)
        .unwrap();
    let (mut children, _monitors) = leaves(&factory, 1);
    children.push(listener.clone().into_child());
    let root = factory.supervisor("Root", children).unwrap();

    store.publish("listener", json!({ "port": 1 }));
    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);

    store.publish("listener", json!({ "port": 2, "fail": true }));
    assert!(wait_for_state(&root, NodeState::StoppedDueToError).await);

    store.publish("listener", json!({ "port": 3 }));
    assert!(wait_for_state(&listener, NodeState::Started).await);
    assert!(wait_for_state(&root, NodeState::Started).await);
}

#[tokio::test]
async fn owned_resources_follow_children() {
    let factory = factory();
    let store = ConfigurationStore::new();
    let (leaf, _) = ScriptedConfigLeaf::new();
    let listener = factory
        .configuration_reactive_leaf("Listener", "listener", Arc::new(store.clone()), leaf)
        .unwrap();
    let (own, own_monitor) = ScriptedLeaf::new();
    let gateway = factory
        .resource_owning_supervisor("Gateway", vec![listener.into_child()], own)
        .unwrap();

    gateway.start();
    settle().await;
    assert_eq!(own_monitor.acquisitions(), 0);

    store.publish("listener", json!({ "port": 8080 }));
    assert!(wait_for_state(&gateway, NodeState::Started).await);
    assert_eq!(own_monitor.held(), 1);

    gateway.stop();
    assert!(wait_for_state(&gateway, NodeState::StoppedByParent).await);
    assert_eq!(own_monitor.held(), 0);
}

#[tokio::test]
async fn owned_resource_failure_stops_children() {
    let factory = factory();
    let (children, monitors) = leaves(&factory, 2);
    let (own, own_monitor) = ScriptedLeaf::new();
    let gateway = factory
        .resource_owning_supervisor("Gateway", children, own)
        .unwrap();

    gateway.start();
    assert!(wait_for_state(&gateway, NodeState::Started).await);

    assert!(own_monitor.inject_error("heartbeat lost"));
    assert!(wait_for_state(&gateway, NodeState::StoppedDueToError).await);
    for child in gateway.children() {
        assert!(wait_for_state(child.as_ref(), NodeState::StoppedByParent).await);
    }
    settle().await;
    assert_eq!(gateway.current_state(), NodeState::StoppedDueToError);
    assert_eq!(own_monitor.held(), 0);
    assert!(monitors.iter().all(|p| p.held() == 0));

    gateway.start();
    assert!(wait_for_state(&gateway, NodeState::Started).await);
    assert_eq!(own_monitor.acquisitions(), 2);
}

#[tokio::test]
async fn failed_owned_acquisition_is_an_error() {
    let factory = factory();
    let (children, _monitors) = leaves(&factory, 1);
    let (own, own_monitor) = ScriptedLeaf::failing();
    let gateway = factory
        .resource_owning_supervisor("Gateway", children, own)
        .unwrap();

    gateway.start();
    assert!(wait_for_state(&gateway, NodeState::StoppedDueToError).await);
    assert!(wait_for_state(gateway.children()[0].as_ref(), NodeState::StoppedByParent).await);
    assert_eq!(own_monitor.held(), 0);
}

#[tokio::test]
async fn close_visits_children_in_reverse_despite_failures() {
    let factory = factory();
    let log = CloseLog::default();
    let a = FakeLifecycle::new("A", &log);
    let b = FakeLifecycle::failing_close("B", &log);
    let c = FakeLifecycle::new("C", &log);
    let root = factory
        .supervisor(
            "Root",
            vec![
                a.clone() as Arc<dyn Lifecycle>,
                b.clone() as Arc<dyn Lifecycle>,
                c.clone() as Arc<dyn Lifecycle>,
            ],
        )
        .unwrap();

    root.close().unwrap();
    root.wait_closed().await;

    let closed: Vec<String> = log.lock().iter().map(|n| n.kind().to_string()).collect();
    assert_eq!(closed, vec!["C", "B", "A"]);
    assert!(a.is_closed());
}

#[tokio::test]
async fn close_cascades_through_tree() {
    let factory = factory();
    let (children, monitors) = leaves(&factory, 2);
    let inner = factory.supervisor("Inner", children).unwrap();
    let root = factory
        .supervisor("Root", vec![inner.clone().into_child()])
        .unwrap();

    root.start();
    assert!(wait_for_state(&root, NodeState::Started).await);

    root.close().unwrap();
    root.wait_closed().await;
    inner.wait_closed().await;

    assert!(monitors.iter().all(|p| p.held() == 0));
    assert!(inner.is_closed());
    assert!(!factory.registry().is_registered(root.name()));
    assert!(!factory.registry().is_registered(inner.name()));
}

#[tokio::test]
async fn duplicate_child_rejected() {
    let factory = factory();
    let (leaf, _) = ScriptedLeaf::new();
    let db = factory.leaf("DbConn", leaf).unwrap().into_child();

    let err = factory
        .supervisor("Root", vec![Arc::clone(&db), db])
        .unwrap_err();
    assert!(matches!(err, LifecycleError::DuplicateChild { .. }));
}

#[tokio::test]
async fn shared_child_serves_two_parents() {
    let factory = factory();
    let (leaf, monitor) = ScriptedLeaf::new();
    let db = factory.leaf("DbConn", leaf).unwrap().into_child();

    let left = factory.supervisor("Left", vec![Arc::clone(&db)]).unwrap();
    let right = factory.supervisor("Right", vec![db]).unwrap();

    left.start();
    assert!(wait_for_state(&left, NodeState::Started).await);
    right.start();
    assert!(wait_for_state(&right, NodeState::Started).await);
    assert_eq!(monitor.acquisitions(), 1);
}

#[tokio::test]
async fn display_shows_tree() {
    let factory = factory();
    let (children, _) = leaves(&factory, 2);
    let root = factory.supervisor("Root", children).unwrap();

    assert_eq!(
        root.to_string(),
        "Root_1: Created [Worker_1: Created, Worker_2: Created]"
    );
}
