//! In-memory configuration feed.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::{ConfigListener, ConfigMap, ConfigValue, ConfigurationFeed};
use crate::registry::RegistrationHandle;

#[derive(Default)]
struct StoreInner {
    current: ConfigMap,
    listeners: Vec<(u64, ConfigListener)>,
}

/// Holds the current configuration and pushes changes to listeners.
///
/// Newly registered listeners immediately receive the current snapshot
/// with every present key marked as changed. Listeners run under the store
/// lock, so pushes arrive in publication order; they must not call back
/// into the store.
#[derive(Clone, Default)]
pub struct ConfigurationStore {
    inner: Arc<Mutex<StoreInner>>,
    next_listener: Arc<AtomicU64>,
}

impl ConfigurationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.inner.lock().current.get(key).cloned()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Set a single key, notifying listeners if the value changed.
    pub fn publish(&self, key: impl Into<String>, value: ConfigValue) -> bool {
        let mut update = ConfigMap::new();
        update.insert(key.into(), value);
        self.publish_all(update)
    }

    /// Merge `update` into the current configuration.
    ///
    /// Only keys whose value differs are reported as changed; nothing is
    /// pushed when no key changed. Returns true if listeners were notified.
    pub fn publish_all(&self, update: ConfigMap) -> bool {
        let mut inner = self.inner.lock();
        let mut changed = BTreeSet::new();
        for (key, value) in update {
            if inner.current.get(&key) != Some(&value) {
                inner.current.insert(key.clone(), value);
                changed.insert(key);
            }
        }
        if changed.is_empty() {
            return false;
        }

        debug!(
            keys = ?changed,
            listeners = inner.listeners.len(),
            "Publishing configuration"
        );
        for (_, listener) in &inner.listeners {
            listener(&changed, &inner.current);
        }
        true
    }
}

impl ConfigurationFeed for ConfigurationStore {
    fn register_for_updates(&self, listener: ConfigListener) -> RegistrationHandle {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.lock();
            if !inner.current.is_empty() {
                let keys: BTreeSet<String> = inner.current.keys().cloned().collect();
                listener(&keys, &inner.current);
            }
            inner.listeners.push((id, listener));
        }

        let inner: Weak<Mutex<StoreInner>> = Arc::downgrade(&self.inner);
        RegistrationHandle::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.lock().listeners.retain(|(l, _)| *l != id);
            }
        })
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ConfigurationStore")
            .field("keys", &inner.current.keys().collect::<Vec<_>>())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}
