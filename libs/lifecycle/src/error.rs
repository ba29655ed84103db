//! Errors for the lifecycle framework.

use domino_id::{IdError, NodeName};
use thiserror::Error;

/// Errors raised by lifecycle nodes, their hooks, and their construction.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A node could not acquire its resources.
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    /// Applying a new configuration failed.
    #[error("reconfiguration failed: {0}")]
    Reconfiguration(String),

    /// A configuration value could not be turned into the node's typed configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The node has already been closed.
    #[error("node {name} is already closed")]
    AlreadyClosed { name: NodeName },

    /// A name was registered twice in the same status registry.
    #[error("node {name} is already registered")]
    DuplicateName { name: NodeName },

    /// The same child was given to a supervisor more than once.
    #[error("child {child} appears more than once under {parent}")]
    DuplicateChild { parent: NodeName, child: NodeName },

    /// The supervision graph contains a cycle.
    #[error("supervision cycle detected through {name}")]
    CycleDetected { name: NodeName },

    /// No tokio runtime was available to run coordinators on.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// A node name could not be issued.
    #[error("invalid node name: {0}")]
    InvalidName(#[from] IdError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Returns true if the error came from a node that is already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, LifecycleError::AlreadyClosed { .. })
    }
}

/// Result alias used throughout the framework.
pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;
