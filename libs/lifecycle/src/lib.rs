//! # domino-lifecycle
//!
//! Supervision trees of long-lived components.
//!
//! A service is described as a tree of nodes. Leaves own resources
//! (connections, listeners, background tasks); supervisors own children and
//! are running only while every child is running. Each node is driven by its
//! own coordinator, which handles the node's events one at a time, so node
//! hooks never race with each other.
//!
//! ## States
//!
//! ```text
//! Created ──start──► Started ──stop──► StoppedByParent
//!    │                │  ▲                  │
//!    │ failure        │  └────── start ─────┘
//!    ▼                ▼
//! StoppedDueToError ◄─┘ failure
//!    │
//!    └── start / recovery ──► Started
//! ```
//!
//! Every state projects onto a status (UP, DOWN, ERROR) that is published to
//! the [`StatusRegistry`]; supervisors follow their children through it.
//!
//! ## Example
//!
//! ```ignore
//! let factory = LifecycleFactory::from_current()?;
//! let db = factory.leaf("DbConnection", Database::new(url))?;
//! let listener = factory.configuration_reactive_leaf("Listener", "listener", feed, Listener::default())?;
//! let root = factory.supervisor("Root", vec![db.into_child(), listener.into_child()])?;
//!
//! root.start();
//! // ...
//! root.close()?;
//! root.wait_closed().await;
//! ```

mod config;
mod coordinator;
mod error;
mod event;
mod factory;
mod node;
mod registry;
mod resources;
mod state;

pub use config::{
    ConfigListener, ConfigMap, ConfigValue, ConfigurationFeed, ConfigurationStore,
};
pub use error::{LifecycleError, Result};
pub use event::{LifecycleEvent, StatusChange};
pub use factory::LifecycleFactory;
pub use node::{ConfigReactiveLeaf, Leaf, Lifecycle, LifecycleHandle, NodeContext};
pub use registry::{RegistrationHandle, StatusListener, StatusRegistry};
pub use resources::ResourceSet;
pub use state::{LifecycleStatus, NodeState};

/// Re-export of the node name type.
pub use domino_id::NodeName;

/// Re-export so hook implementations need no direct dependency.
pub use async_trait::async_trait;
