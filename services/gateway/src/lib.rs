//! Domino gateway.
//!
//! A small long-running service built as a supervision tree:
//!
//! ```text
//! Gateway (resource-owning supervisor, owns the heartbeat)
//!   ├── UpstreamConnection (leaf: TCP connection to the upstream)
//!   └── HttpListener       (configuration-reactive leaf: serves the configured body)
//! ```
//!
//! The gateway is `UP` only while the upstream connection is held and the
//! listener is serving. Losing the upstream stops the listener and puts the
//! gateway in `ERROR`; a new listener configuration is applied in place.
//! With [`Gateway::spawn_recovery`] a failed gateway is restarted with a
//! capped backoff until the upstream is reachable again.

use std::sync::Arc;

use domino_lifecycle::{
    ConfigValue, ConfigurationStore, Lifecycle, LifecycleFactory, LifecycleHandle, LifecycleStatus,
    RegistrationHandle, Result, StatusChange, StatusRegistry,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub mod heartbeat;
pub mod listener;
pub mod recovery;
pub mod settings;
pub mod upstream;

use heartbeat::{Heartbeat, HeartbeatStats};
use listener::{HttpListener, ListenerState};
use recovery::{run_recovery, RestartBackoff};
use settings::Settings;
use upstream::UpstreamConnection;

/// Configuration key watched by the HTTP listener.
pub const LISTENER_KEY: &str = "http_listener";

/// The assembled gateway tree.
pub struct Gateway {
    root: LifecycleHandle,
    upstream: LifecycleHandle,
    listener: LifecycleHandle,
    store: ConfigurationStore,
    registry: StatusRegistry,
    listener_state: ListenerState,
    heartbeat: HeartbeatStats,
}

impl Gateway {
    /// Build the tree. Nothing is started and no configuration is published.
    pub fn build(factory: &LifecycleFactory, settings: &Settings) -> Result<Self> {
        let store = ConfigurationStore::new();

        let upstream = factory.leaf(
            "UpstreamConnection",
            UpstreamConnection::new(settings.upstream_addr, settings.connect_timeout),
        )?;

        let (http, listener_state) = HttpListener::new();
        let listener = factory.configuration_reactive_leaf(
            "HttpListener",
            LISTENER_KEY,
            Arc::new(store.clone()),
            http,
        )?;

        let (heartbeat, stats) = Heartbeat::new(
            settings.heartbeat_interval,
            factory.registry().clone(),
            vec![upstream.name().clone(), listener.name().clone()],
        );
        let root = factory.resource_owning_supervisor(
            "Gateway",
            vec![upstream.clone().into_child(), listener.clone().into_child()],
            heartbeat,
        )?;

        Ok(Self {
            root,
            upstream,
            listener,
            store,
            registry: factory.registry().clone(),
            listener_state,
            heartbeat: stats,
        })
    }

    pub fn start(&self) {
        self.root.start();
    }

    /// Publish a listener section. Returns true if it differs from the current one.
    pub fn configure_listener(&self, section: ConfigValue) -> bool {
        self.store.publish(LISTENER_KEY, section)
    }

    /// Restart the gateway after failures, backing off between attempts.
    ///
    /// The task ends once the gateway is shut down.
    pub fn spawn_recovery(&self, backoff: RestartBackoff) -> JoinHandle<()> {
        let (registration, changes) = self.watch_status();
        tokio::spawn(run_recovery(
            self.root.clone(),
            backoff,
            registration,
            changes,
        ))
    }

    /// Follow the gateway's own status.
    pub fn watch_status(&self) -> (RegistrationHandle, mpsc::UnboundedReceiver<StatusChange>) {
        self.registry.watch(self.root.name())
    }

    pub fn status(&self) -> LifecycleStatus {
        self.root.status()
    }

    pub fn root(&self) -> &LifecycleHandle {
        &self.root
    }

    pub fn upstream(&self) -> &LifecycleHandle {
        &self.upstream
    }

    pub fn listener(&self) -> &LifecycleHandle {
        &self.listener
    }

    pub fn listener_state(&self) -> &ListenerState {
        &self.listener_state
    }

    pub fn heartbeat(&self) -> &HeartbeatStats {
        &self.heartbeat
    }

    /// Close the tree and wait for every coordinator to drain.
    pub async fn shutdown(&self) -> Result<()> {
        self.root.close()?;
        self.root.wait_closed().await;
        self.upstream.wait_closed().await;
        self.listener.wait_closed().await;
        Ok(())
    }
}
