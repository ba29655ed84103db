//! Status recording.

use std::sync::Arc;
use std::time::Duration;

use domino_lifecycle::{
    LifecycleStatus, NodeName, RegistrationHandle, StatusChange, StatusRegistry,
};
use parking_lot::Mutex;

use crate::wait::eventually;

/// Records every status published for the followed nodes, in order.
#[derive(Default)]
pub struct StatusRecorder {
    changes: Arc<Mutex<Vec<StatusChange>>>,
    handles: Mutex<Vec<RegistrationHandle>>,
}

impl StatusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow each of `names` in `registry`.
    pub fn following<'a>(
        registry: &StatusRegistry,
        names: impl IntoIterator<Item = &'a NodeName>,
    ) -> Self {
        let recorder = Self::new();
        for name in names {
            recorder.follow(registry, name);
        }
        recorder
    }

    pub fn follow(&self, registry: &StatusRegistry, name: &NodeName) {
        let changes = Arc::clone(&self.changes);
        let handle = registry.follow(
            name,
            Arc::new(move |change: &StatusChange| changes.lock().push(change.clone())),
        );
        self.handles.lock().push(handle);
    }

    /// All recorded changes.
    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes.lock().clone()
    }

    /// Statuses published by `name`, in order.
    pub fn statuses_of(&self, name: &NodeName) -> Vec<LifecycleStatus> {
        self.changes
            .lock()
            .iter()
            .filter(|c| &c.name == name)
            .map(|c| c.status)
            .collect()
    }

    /// `(name, status)` pairs in publication order.
    pub fn sequence(&self) -> Vec<(NodeName, LifecycleStatus)> {
        self.changes
            .lock()
            .iter()
            .map(|c| (c.name.clone(), c.status))
            .collect()
    }

    /// Wait until `name` has published `status` at least once.
    pub async fn wait_for(&self, name: &NodeName, status: LifecycleStatus, timeout: Duration) -> bool {
        eventually(timeout, || self.statuses_of(name).contains(&status)).await
    }

    pub fn clear(&self) {
        self.changes.lock().clear();
    }
}
