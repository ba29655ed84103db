//! Configuration feed consumed by configuration-reactive nodes.
//!
//! A feed pushes `(changed keys, full configuration)` pairs to registered
//! listeners. Each configuration-reactive node registers exactly one
//! listener, the first time it is started.

mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use store::ConfigurationStore;

use crate::registry::RegistrationHandle;

/// A single configuration section.
pub type ConfigValue = serde_json::Value;

/// Configuration sections by key.
pub type ConfigMap = BTreeMap<String, ConfigValue>;

/// Callback receiving configuration pushes.
pub type ConfigListener = Arc<dyn Fn(&BTreeSet<String>, &ConfigMap) + Send + Sync>;

/// Push-based source of configuration updates.
pub trait ConfigurationFeed: Send + Sync {
    /// Register `listener` for every future push.
    ///
    /// Implementations may deliver the current configuration immediately.
    fn register_for_updates(&self, listener: ConfigListener) -> RegistrationHandle;
}
