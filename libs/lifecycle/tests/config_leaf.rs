//! Configuration-reactive leaves: first apply, in-place reconfiguration,
//! idempotence, self-healing and the stop/resume path.

use std::sync::Arc;

use domino_lifecycle::{
    ConfigurationFeed, ConfigurationStore, Lifecycle, LifecycleFactory, LifecycleHandle,
    LifecycleStatus, NodeState,
};
use domino_testing::{
    eventually, init_tracing, settle, wait_for_state, ConfigMonitor, ManualFeed,
    ScriptedConfigLeaf, StatusRecorder, DEFAULT_TIMEOUT,
};
use serde_json::json;

const KEY: &str = "listener";

struct Fixture {
    factory: LifecycleFactory,
    node: LifecycleHandle,
    monitor: ConfigMonitor,
}

fn listener_on(feed: Arc<dyn ConfigurationFeed>) -> Fixture {
    init_tracing();
    let factory = LifecycleFactory::from_current().unwrap();
    let (leaf, monitor) = ScriptedConfigLeaf::new();
    let node = factory
        .configuration_reactive_leaf("Listener", KEY, feed, leaf)
        .unwrap();
    Fixture {
        factory,
        node,
        monitor,
    }
}

async fn started_on_store(port: u16) -> (ConfigurationStore, Fixture) {
    let store = ConfigurationStore::new();
    let fixture = listener_on(Arc::new(store.clone()));
    fixture.node.start();
    store.publish(KEY, json!({ "port": port }));
    assert!(wait_for_state(&fixture.node, NodeState::Started).await);
    (store, fixture)
}

#[tokio::test]
async fn start_waits_for_first_configuration() {
    let store = ConfigurationStore::new();
    let Fixture { node, monitor, .. } = listener_on(Arc::new(store.clone()));

    node.start();
    settle().await;
    assert_eq!(node.current_state(), NodeState::Created);
    assert_eq!(monitor.apply_count(), 0);
    assert_eq!(store.listener_count(), 1);

    store.publish(KEY, json!({ "port": 8080 }));
    assert!(wait_for_state(&node, NodeState::Started).await);

    let applies = monitor.applies();
    assert_eq!(applies.len(), 1);
    assert_eq!(applies[0].new, json!({ "port": 8080 }));
    assert_eq!(applies[0].old, None);
}

#[tokio::test]
async fn configuration_before_start_is_ignored_until_start() {
    let store = ConfigurationStore::new();
    store.publish(KEY, json!({ "port": 8080 }));
    let Fixture { node, monitor, .. } = listener_on(Arc::new(store.clone()));

    settle().await;
    assert_eq!(store.listener_count(), 0);
    assert_eq!(monitor.apply_count(), 0);

    // The store replays its snapshot on registration.
    node.start();
    assert!(wait_for_state(&node, NodeState::Started).await);
    assert_eq!(monitor.apply_count(), 1);
}

#[tokio::test]
async fn unrelated_keys_are_ignored() {
    let store = ConfigurationStore::new();
    let Fixture { node, monitor, .. } = listener_on(Arc::new(store.clone()));

    node.start();
    store.publish("database", json!({ "url": "postgres://db" }));
    settle().await;

    assert_eq!(node.current_state(), NodeState::Created);
    assert_eq!(monitor.apply_count(), 0);
}

#[tokio::test]
async fn identical_configuration_applied_once() {
    let feed = ManualFeed::new();
    let Fixture { node, monitor, .. } = listener_on(Arc::new(feed.clone()));

    node.start();
    assert!(eventually(DEFAULT_TIMEOUT, || feed.listener_count() == 1).await);

    feed.push_value(KEY, json!({ "port": 8080 }));
    feed.push_value(KEY, json!({ "port": 8080 }));
    assert!(wait_for_state(&node, NodeState::Started).await);
    settle().await;

    assert_eq!(monitor.apply_count(), 1);
}

#[tokio::test]
async fn repeated_failing_configuration_is_not_reapplied() {
    let feed = ManualFeed::new();
    let Fixture { node, monitor, .. } = listener_on(Arc::new(feed.clone()));
    let failing = json!({ "port": 1, "fail": true });

    node.start();
    assert!(eventually(DEFAULT_TIMEOUT, || feed.listener_count() == 1).await);

    feed.push_value(KEY, failing.clone());
    assert!(wait_for_state(&node, NodeState::StoppedDueToError).await);
    feed.push_value(KEY, failing);
    settle().await;

    assert_eq!(monitor.apply_count(), 1);
    assert_eq!(node.current_state(), NodeState::StoppedDueToError);
}

#[tokio::test]
async fn reconfiguration_happens_in_place() {
    let (store, Fixture { factory, node, monitor }) = started_on_store(8080).await;
    let recorder = StatusRecorder::following(factory.registry(), [node.name()]);

    store.publish(KEY, json!({ "port": 9090 }));
    assert!(eventually(DEFAULT_TIMEOUT, || monitor.apply_count() == 2).await);
    settle().await;

    let applies = monitor.applies();
    assert_eq!(applies[1].new, json!({ "port": 9090 }));
    assert_eq!(applies[1].old, Some(json!({ "port": 8080 })));
    assert_eq!(node.current_state(), NodeState::Started);
    assert_eq!(monitor.held(), 1);
    // No restart: the status never left UP.
    assert!(recorder.statuses_of(node.name()).is_empty());
}

#[tokio::test]
async fn failed_apply_demotes_then_next_good_configuration_heals() {
    let (store, Fixture { node, monitor, .. }) = started_on_store(8080).await;

    store.publish(KEY, json!({ "port": 8081, "fail": true }));
    assert!(wait_for_state(&node, NodeState::StoppedDueToError).await);
    assert_eq!(monitor.held(), 0);

    store.publish(KEY, json!({ "port": 8082 }));
    assert!(wait_for_state(&node, NodeState::Started).await);

    let last = monitor.applies().pop().unwrap();
    assert_eq!(last.new, json!({ "port": 8082 }));
    assert_eq!(last.old, None, "resources were released by the failure");
    assert_eq!(monitor.held(), 1);
}

#[tokio::test]
async fn invalid_configuration_errors_running_node() {
    let (store, Fixture { node, monitor, .. }) = started_on_store(8080).await;

    store.publish(KEY, json!({ "invalid": true }));
    assert!(wait_for_state(&node, NodeState::StoppedDueToError).await);
    assert_eq!(monitor.apply_count(), 1);
    assert_eq!(monitor.held(), 0);
}

#[tokio::test]
async fn stop_retains_snapshot_and_start_reapplies() {
    let (_store, Fixture { node, monitor, .. }) = started_on_store(8080).await;

    node.stop();
    assert!(wait_for_state(&node, NodeState::StoppedByParent).await);
    assert_eq!(monitor.held(), 0);

    node.start();
    assert!(wait_for_state(&node, NodeState::Started).await);

    let last = monitor.applies().pop().unwrap();
    assert_eq!(last.new, json!({ "port": 8080 }));
    assert_eq!(last.old, None);
    assert_eq!(monitor.held(), 1);
}

#[tokio::test]
async fn updates_while_stopped_wait_for_next_start() {
    let (store, Fixture { node, monitor, .. }) = started_on_store(8080).await;

    node.stop();
    assert!(wait_for_state(&node, NodeState::StoppedByParent).await);
    store.publish(KEY, json!({ "port": 9000 }));
    settle().await;
    assert_eq!(monitor.apply_count(), 1);
    assert_eq!(node.current_state(), NodeState::StoppedByParent);

    node.start();
    assert!(wait_for_state(&node, NodeState::Started).await);
    assert_eq!(monitor.applies().pop().unwrap().new, json!({ "port": 9000 }));
}

#[tokio::test]
async fn subscribes_once_across_restarts() {
    let (store, Fixture { node, .. }) = started_on_store(8080).await;

    for _ in 0..3 {
        node.stop();
        assert!(wait_for_state(&node, NodeState::StoppedByParent).await);
        node.start();
        assert!(wait_for_state(&node, NodeState::Started).await);
    }
    assert_eq!(store.listener_count(), 1);
}

#[tokio::test]
async fn close_unregisters_from_feed() {
    let (store, Fixture { node, monitor, .. }) = started_on_store(8080).await;

    node.close().unwrap();
    node.wait_closed().await;

    assert_eq!(store.listener_count(), 0);
    assert_eq!(monitor.held(), 0);
    assert_eq!(node.status(), LifecycleStatus::Down);
}
