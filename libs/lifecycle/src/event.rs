//! Events delivered to a node's coordinator.

use std::collections::BTreeSet;

use domino_id::NodeName;

use crate::config::ConfigMap;
use crate::state::LifecycleStatus;

/// A status transition published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// The node whose status changed.
    pub name: NodeName,
    /// Status before the change.
    pub previous: LifecycleStatus,
    /// Status after the change.
    pub status: LifecycleStatus,
}

/// Events processed, one at a time, by a node's coordinator.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// Start the node (and its children).
    Start,

    /// Stop the node (and its children) and release its resources.
    Stop,

    /// A followed node changed status.
    StatusChanged(StatusChange),

    /// The configuration feed pushed an update.
    NewConfiguration {
        changed_keys: BTreeSet<String>,
        config: ConfigMap,
    },

    /// The node's own resources reported a failure after acquisition.
    ErrorReported {
        /// Resource generation the report was issued for.
        generation: u64,
        reason: String,
    },
}

impl LifecycleEvent {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::Stop => "stop",
            LifecycleEvent::StatusChanged(_) => "status_changed",
            LifecycleEvent::NewConfiguration { .. } => "new_configuration",
            LifecycleEvent::ErrorReported { .. } => "error_reported",
        }
    }
}
