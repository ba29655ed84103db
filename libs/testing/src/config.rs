//! Scripted configuration-reactive leaf.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domino_lifecycle::{
    ConfigListener, ConfigMap, ConfigReactiveLeaf, ConfigValue, ConfigurationFeed,
    LifecycleError, NodeContext, RegistrationHandle, ResourceSet, Result,
};
use parking_lot::Mutex;
use serde_json::Value;

/// One call to `apply_new_configuration`.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub new: Value,
    pub old: Option<Value>,
}

#[derive(Default)]
struct MonitorInner {
    applies: Mutex<Vec<Applied>>,
    releases: AtomicUsize,
    held: AtomicUsize,
}

/// Observes a [`ScriptedConfigLeaf`].
#[derive(Clone, Default)]
pub struct ConfigMonitor {
    inner: Arc<MonitorInner>,
}

impl ConfigMonitor {
    /// Every apply call, successful or not.
    pub fn applies(&self) -> Vec<Applied> {
        self.inner.applies.lock().clone()
    }

    pub fn apply_count(&self) -> usize {
        self.inner.applies.lock().len()
    }

    /// Configurations that were applied, in order.
    pub fn applied_values(&self) -> Vec<Value> {
        self.inner
            .applies
            .lock()
            .iter()
            .map(|a| a.new.clone())
            .collect()
    }

    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    /// Resources currently held by the leaf.
    pub fn held(&self) -> usize {
        self.inner.held.load(Ordering::SeqCst)
    }
}

/// A configuration-reactive leaf over raw JSON.
///
/// - `{"invalid": true}` is rejected at parse time
/// - `{"fail": true}` parses but fails to apply
///
/// Each apply holds one counted resource; the previous one is released first.
pub struct ScriptedConfigLeaf {
    monitor: ConfigMonitor,
}

impl ScriptedConfigLeaf {
    pub fn new() -> (Self, ConfigMonitor) {
        let monitor = ConfigMonitor::default();
        (
            Self {
                monitor: monitor.clone(),
            },
            monitor,
        )
    }
}

fn flag(value: &Value, name: &str) -> bool {
    value.get(name).and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl ConfigReactiveLeaf for ScriptedConfigLeaf {
    type Config = Value;

    fn parse_configuration(&self, value: &ConfigValue) -> Result<Value> {
        if flag(value, "invalid") {
            return Err(LifecycleError::InvalidConfiguration(
                "scripted invalid configuration".to_string(),
            ));
        }
        Ok(value.clone())
    }

    async fn apply_new_configuration(
        &mut self,
        new: &Value,
        old: Option<&Value>,
        resources: &mut ResourceSet,
        _ctx: &NodeContext,
    ) -> Result<()> {
        let inner = Arc::clone(&self.monitor.inner);
        inner.applies.lock().push(Applied {
            new: new.clone(),
            old: old.cloned(),
        });

        resources.release_all();
        if flag(new, "fail") {
            return Err(LifecycleError::Reconfiguration(
                "scripted apply failure".to_string(),
            ));
        }

        inner.held.fetch_add(1, Ordering::SeqCst);
        let released = Arc::clone(&inner);
        resources.keep(move || {
            released.held.fetch_sub(1, Ordering::SeqCst);
            released.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(())
    }
}

/// A feed that pushes exactly what the test hands it, duplicates included.
#[derive(Clone, Default)]
pub struct ManualFeed {
    listeners: Arc<Mutex<Vec<(u64, ConfigListener)>>>,
    next_listener: Arc<AtomicU64>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `config`, reporting `changed` as the changed keys.
    pub fn push(&self, changed: &[&str], config: ConfigMap) {
        let changed: BTreeSet<String> = changed.iter().map(|k| k.to_string()).collect();
        let listeners: Vec<ConfigListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&changed, &config);
        }
    }

    /// Push a single key.
    pub fn push_value(&self, key: &str, value: Value) {
        let mut config = ConfigMap::new();
        config.insert(key.to_string(), value);
        self.push(&[key], config);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl ConfigurationFeed for ManualFeed {
    fn register_for_updates(&self, listener: ConfigListener) -> RegistrationHandle {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));

        let listeners = Arc::clone(&self.listeners);
        RegistrationHandle::new(move || listeners.lock().retain(|(l, _)| *l != id))
    }
}
