//! Status registry - process-wide directory of node statuses.
//!
//! Every node registers its name at construction and publishes a status
//! (UP/DOWN/ERROR) whenever its state changes. Other nodes, and external
//! collaborators, follow a name to be told about those changes.
//!
//! ## Rules
//!
//! - The registry is the only structure shared between nodes
//! - A status is published only when it differs from the previous one
//! - Listeners are invoked outside the registry lock, in publication order;
//!   a panicking listener is logged and the remaining listeners still run
//! - Names are issued by the registry, so every factory sharing a registry
//!   shares one numbering
//! - Following a name that is not registered yet is allowed; the listener
//!   fires once the node starts publishing

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use domino_id::{NameGenerator, NodeName};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{LifecycleError, Result};
use crate::event::StatusChange;
use crate::state::LifecycleStatus;

/// Callback invoked for every status change of a followed name.
pub type StatusListener = Arc<dyn Fn(&StatusChange) + Send + Sync>;

// =============================================================================
// Registration Handle
// =============================================================================

/// Keeps a listener registered; closing or dropping it unregisters.
#[must_use = "dropping a registration handle unregisters the listener"]
pub struct RegistrationHandle {
    unregister: Option<Box<dyn FnOnce() + Send>>,
}

impl RegistrationHandle {
    /// Creates a handle that runs `unregister` when closed or dropped.
    pub fn new(unregister: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unregister: Some(Box::new(unregister)),
        }
    }

    /// Creates a handle with nothing to unregister.
    pub fn noop() -> Self {
        Self { unregister: None }
    }

    /// Unregisters the listener now.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unregister) = self.unregister.take() {
            unregister();
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("active", &self.unregister.is_some())
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Subscriber {
    id: u64,
    listener: StatusListener,
}

struct Entry {
    status: LifecycleStatus,
    registered: bool,
    subscribers: Vec<Subscriber>,
}

impl Entry {
    fn unregistered() -> Self {
        Self {
            status: LifecycleStatus::Down,
            registered: false,
            subscribers: Vec::new(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: RwLock<HashMap<NodeName, Entry>>,
    names: NameGenerator,
    next_subscriber: AtomicU64,
}

/// Concurrent name → status directory with subscribe-by-name.
///
/// Cloning is cheap; clones share the same directory.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<RegistryInner>,
}

impl StatusRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next unused name for `kind`.
    pub(crate) fn issue_name(&self, kind: &str) -> Result<NodeName> {
        Ok(self.inner.names.next(kind)?)
    }

    /// Register a node name with an initial DOWN status.
    pub fn register(&self, name: &NodeName) -> Result<()> {
        let mut entries = self.inner.entries.write();
        let entry = entries
            .entry(name.clone())
            .or_insert_with(Entry::unregistered);

        if entry.registered {
            return Err(LifecycleError::DuplicateName { name: name.clone() });
        }

        entry.registered = true;
        entry.status = LifecycleStatus::Down;
        trace!(node = %name, "Registered");
        Ok(())
    }

    /// Remove a name and all of its followers.
    pub fn unregister(&self, name: &NodeName) {
        if self.inner.entries.write().remove(name).is_some() {
            debug!(node = %name, "Unregistered");
        }
    }

    /// Publish a status for `name`.
    ///
    /// Returns true if the status changed and followers were notified.
    pub fn update_status(&self, name: &NodeName, status: LifecycleStatus) -> bool {
        let (change, listeners) = {
            let mut entries = self.inner.entries.write();
            let Some(entry) = entries.get_mut(name).filter(|e| e.registered) else {
                debug!(node = %name, %status, "Ignoring status for unregistered node");
                return false;
            };

            if entry.status == status {
                return false;
            }

            let change = StatusChange {
                name: name.clone(),
                previous: entry.status,
                status,
            };
            entry.status = status;

            let listeners: Vec<StatusListener> = entry
                .subscribers
                .iter()
                .map(|s| Arc::clone(&s.listener))
                .collect();
            (change, listeners)
        };

        trace!(
            node = %name,
            previous = %change.previous,
            status = %change.status,
            followers = listeners.len(),
            "Status published"
        );

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&change))).is_err() {
                warn!(node = %name, status = %change.status, "Status listener panicked");
            }
        }
        true
    }

    /// Current status of a registered name.
    pub fn status(&self, name: &NodeName) -> Option<LifecycleStatus> {
        self.inner
            .entries
            .read()
            .get(name)
            .filter(|e| e.registered)
            .map(|e| e.status)
    }

    /// Returns true if `name` is currently registered.
    pub fn is_registered(&self, name: &NodeName) -> bool {
        self.status(name).is_some()
    }

    /// Registered names, in no particular order.
    pub fn names(&self) -> Vec<NodeName> {
        self.inner
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.registered)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of listeners currently following `name`.
    pub fn follower_count(&self, name: &NodeName) -> usize {
        self.inner
            .entries
            .read()
            .get(name)
            .map_or(0, |e| e.subscribers.len())
    }

    /// Follow status changes of `name`.
    ///
    /// The listener runs on the publishing node's coordinator and must not block.
    pub fn follow(&self, name: &NodeName, listener: StatusListener) -> RegistrationHandle {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        self.inner
            .entries
            .write()
            .entry(name.clone())
            .or_insert_with(Entry::unregistered)
            .subscribers
            .push(Subscriber { id, listener });

        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let name = name.clone();
        RegistrationHandle::new(move || {
            if let Some(registry) = registry.upgrade() {
                if let Some(entry) = registry.entries.write().get_mut(&name) {
                    entry.subscribers.retain(|s| s.id != id);
                }
            }
        })
    }

    /// Follow status changes of `name` through a channel.
    pub fn watch(
        &self,
        name: &NodeName,
    ) -> (RegistrationHandle, mpsc::UnboundedReceiver<StatusChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.follow(
            name,
            Arc::new(move |change: &StatusChange| {
                let _ = tx.send(change.clone());
            }),
        );
        (handle, rx)
    }
}

impl std::fmt::Debug for StatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRegistry")
            .field("nodes", &self.names().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn name(kind: &str) -> NodeName {
        NodeName::new(kind, 1).unwrap()
    }

    #[test]
    fn test_register_starts_down() {
        let registry = StatusRegistry::new();
        let db = name("Db");

        assert_eq!(registry.status(&db), None);
        registry.register(&db).unwrap();
        assert_eq!(registry.status(&db), Some(LifecycleStatus::Down));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = StatusRegistry::new();
        let db = name("Db");

        registry.register(&db).unwrap();
        let err = registry.register(&db).unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateName { .. }));
    }

    #[test]
    fn test_redundant_status_not_published() {
        let registry = StatusRegistry::new();
        let db = name("Db");
        registry.register(&db).unwrap();
        let (_handle, mut rx) = registry.watch(&db);

        assert!(!registry.update_status(&db, LifecycleStatus::Down));
        assert!(registry.update_status(&db, LifecycleStatus::Up));
        assert!(!registry.update_status(&db, LifecycleStatus::Up));
        assert!(registry.update_status(&db, LifecycleStatus::Error));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.previous, LifecycleStatus::Down);
        assert_eq!(first.status, LifecycleStatus::Up);
        assert_eq!(rx.try_recv().unwrap().status, LifecycleStatus::Error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_follow_before_register() {
        let registry = StatusRegistry::new();
        let db = name("Db");
        let (_handle, mut rx) = registry.watch(&db);

        // Not registered yet, so nothing is published.
        assert!(!registry.update_status(&db, LifecycleStatus::Up));

        registry.register(&db).unwrap();
        assert!(registry.update_status(&db, LifecycleStatus::Up));
        assert_eq!(rx.try_recv().unwrap().status, LifecycleStatus::Up);
    }

    #[test]
    fn test_dropping_handle_unregisters() {
        let registry = StatusRegistry::new();
        let db = name("Db");
        registry.register(&db).unwrap();

        let (handle, mut rx) = registry.watch(&db);
        assert_eq!(registry.follower_count(&db), 1);
        drop(handle);
        assert_eq!(registry.follower_count(&db), 0);

        registry.update_status(&db, LifecycleStatus::Up);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unregister_removes_name() {
        let registry = StatusRegistry::new();
        let db = name("Db");
        registry.register(&db).unwrap();
        let handle = registry.watch(&db).0;

        registry.unregister(&db);
        assert!(!registry.is_registered(&db));
        assert!(registry.names().is_empty());

        // Closing a handle for a removed name is harmless.
        handle.close();
    }

    #[test]
    fn test_concurrent_follow_and_publish() {
        let registry = StatusRegistry::new();
        let db = name("Db");
        registry.register(&db).unwrap();

        let followers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let db = db.clone();
                std::thread::spawn(move || registry.watch(&db))
            })
            .collect();
        let publisher = {
            let registry = registry.clone();
            let db = db.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    let status = if i % 2 == 0 {
                        LifecycleStatus::Up
                    } else {
                        LifecycleStatus::Down
                    };
                    registry.update_status(&db, status);
                }
            })
        };

        let handles: Vec<_> = followers.into_iter().map(|h| h.join().unwrap()).collect();
        publisher.join().unwrap();

        assert_eq!(registry.follower_count(&db), 8);
        assert_eq!(registry.status(&db), Some(LifecycleStatus::Down));
        drop(handles);
        assert_eq!(registry.follower_count(&db), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_publication() {
        let registry = StatusRegistry::new();
        let db = name("Db");
        registry.register(&db).unwrap();

        let _panicking = registry.follow(&db, Arc::new(|_: &StatusChange| panic!("listener bug")));
        let (_handle, mut rx) = registry.watch(&db);

        assert!(registry.update_status(&db, LifecycleStatus::Up));
        assert_eq!(rx.try_recv().unwrap().status, LifecycleStatus::Up);
        assert_eq!(registry.status(&db), Some(LifecycleStatus::Up));
    }

    #[test]
    fn test_clones_share_name_numbering() {
        let registry = StatusRegistry::new();
        let other = registry.clone();

        assert_eq!(registry.issue_name("Db").unwrap().to_string(), "Db_1");
        assert_eq!(other.issue_name("Db").unwrap().to_string(), "Db_2");
        assert_eq!(StatusRegistry::new().issue_name("Db").unwrap().to_string(), "Db_1");
    }
}
