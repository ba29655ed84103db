//! Lifecycle nodes.
//!
//! A node is a [`LifecycleHandle`] over shared state driven by its own
//! coordinator. The node's behavior comes from its [`NodeKind`]:
//!
//! | Kind                         | Children | Own resources | Config feed |
//! |------------------------------|----------|---------------|-------------|
//! | Leaf                         | no       | yes           | no          |
//! | Configuration-reactive leaf  | no       | yes           | yes         |
//! | Supervisor                   | yes      | no            | no          |
//! | Resource-owning supervisor   | yes      | yes           | no          |

mod config_leaf;
mod driver;
mod handle;
mod kind;
mod leaf;
mod supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use domino_id::NodeName;
use parking_lot::{Mutex, RwLock};
use tracing::info;

pub use config_leaf::ConfigReactiveLeaf;
pub use handle::{Lifecycle, LifecycleHandle};
pub use leaf::Leaf;

pub(crate) use config_leaf::ConfigLeafNode;
pub(crate) use driver::NodeDriver;
pub(crate) use kind::NodeKind;
pub(crate) use leaf::LeafNode;
pub(crate) use supervisor::SupervisorNode;

use crate::coordinator::{Coordinator, EventSender};
use crate::event::LifecycleEvent;
use crate::registry::{RegistrationHandle, StatusRegistry};
use crate::state::NodeState;

// =============================================================================
// Shared Node State
// =============================================================================

/// State shared between a node's handles and its coordinator.
///
/// The coordinator is the only writer of `state`; handles only read it.
pub(crate) struct NodeShared {
    pub(crate) name: NodeName,
    state: RwLock<NodeState>,
    pub(crate) coordinator: Coordinator,
    pub(crate) registry: StatusRegistry,
    pub(crate) children: Vec<Arc<dyn Lifecycle>>,
    registrations: Mutex<Vec<RegistrationHandle>>,
    closed: AtomicBool,
}

impl NodeShared {
    pub(crate) fn new(
        name: NodeName,
        coordinator: Coordinator,
        registry: StatusRegistry,
        children: Vec<Arc<dyn Lifecycle>>,
    ) -> Self {
        Self {
            name,
            state: RwLock::new(NodeState::Created),
            coordinator,
            registry,
            children,
            registrations: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> NodeState {
        *self.state.read()
    }

    /// Commit a transition and publish the new status if it changed.
    pub(crate) fn set_state(&self, next: NodeState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous == next {
            return;
        }

        info!(node = %self.name, from = %previous, to = %next, "State changed");
        self.registry.update_status(&self.name, next.status());
    }

    /// Keep a registration until the node is closed.
    pub(crate) fn keep_registration(&self, handle: RegistrationHandle) {
        let mut registrations = self.registrations.lock();
        if self.is_closed() {
            drop(registrations);
            handle.close();
            return;
        }
        registrations.push(handle);
    }

    pub(crate) fn release_registrations(&self) {
        let registrations = std::mem::take(&mut *self.registrations.lock());
        for handle in registrations.into_iter().rev() {
            handle.close();
        }
    }

    /// Mark closed; returns false if the node was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        // Taking the lock orders this against `keep_registration`.
        let _registrations = self.registrations.lock();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Node Context
// =============================================================================

/// Node-facing view handed to lifecycle hooks.
///
/// A context is tied to the resource generation it was issued for: errors
/// reported through a context whose resources have since been released are
/// ignored.
#[derive(Clone)]
pub struct NodeContext {
    shared: Arc<NodeShared>,
    generation: u64,
}

impl NodeContext {
    pub(crate) fn new(shared: Arc<NodeShared>) -> Self {
        Self {
            shared,
            generation: 0,
        }
    }

    pub(crate) fn with_generation(&self, generation: u64) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            generation,
        }
    }

    /// Name of the node this context belongs to.
    pub fn name(&self) -> &NodeName {
        &self.shared.name
    }

    /// Resource generation this context was issued for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The registry the node publishes to.
    pub fn registry(&self) -> &StatusRegistry {
        &self.shared.registry
    }

    /// Report that the node's resources failed after acquisition.
    ///
    /// The node moves to `StoppedDueToError` and releases its resources.
    /// Returns false if the node is closed.
    pub fn report_error(&self, reason: impl std::fmt::Display) -> bool {
        self.shared.coordinator.post(LifecycleEvent::ErrorReported {
            generation: self.generation,
            reason: reason.to_string(),
        })
    }

    pub(crate) fn sender(&self) -> EventSender {
        self.shared.coordinator.sender()
    }

    pub(crate) fn keep_registration(&self, handle: RegistrationHandle) {
        self.shared.keep_registration(handle);
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.shared.name)
            .field("generation", &self.generation)
            .finish()
    }
}
