//! The public node handle.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use domino_id::NodeName;
use tracing::{debug, info, warn};

use super::NodeShared;
use crate::error::{LifecycleError, Result};
use crate::event::LifecycleEvent;
use crate::state::{LifecycleStatus, NodeState};

/// Operations every node in a supervision tree supports.
///
/// `start` and `stop` only enqueue an event and return immediately; the
/// transition happens later on the node's coordinator. Both are idempotent.
pub trait Lifecycle: Send + Sync {
    /// Unique name of the node.
    fn name(&self) -> &NodeName;

    /// Request the node to start.
    fn start(&self);

    /// Request the node to stop and release its resources.
    fn stop(&self);

    /// Stop the node, shut down its coordinator, unregister its listeners,
    /// then close its children in reverse order. A node can be closed once.
    fn close(&self) -> Result<()>;

    /// Last committed state.
    fn current_state(&self) -> NodeState;

    fn is_running(&self) -> bool {
        self.current_state() == NodeState::Started
    }

    /// Direct children, in construction order.
    fn children(&self) -> &[Arc<dyn Lifecycle>] {
        &[]
    }
}

/// Handle to a node built by the [`LifecycleFactory`](crate::LifecycleFactory).
///
/// Cloning is cheap; clones refer to the same node.
///
/// Shut a node down with [`close`](Lifecycle::close). Dropping every handle
/// without closing releases the node only once nothing else refers to it;
/// a running resource task that keeps its [`NodeContext`](crate::NodeContext)
/// keeps the node alive until it is closed.
#[derive(Clone)]
pub struct LifecycleHandle {
    shared: Arc<NodeShared>,
}

impl LifecycleHandle {
    pub(crate) fn new(shared: Arc<NodeShared>) -> Self {
        Self { shared }
    }

    /// Status currently published for this node.
    pub fn status(&self) -> LifecycleStatus {
        self.current_state().status()
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Wait until the node's coordinator has drained its queue after `close`.
    pub async fn wait_closed(&self) {
        self.shared.coordinator.wait_terminated().await;
    }

    /// Erase into a child reference for a supervisor.
    pub fn into_child(self) -> Arc<dyn Lifecycle> {
        Arc::new(self)
    }
}

impl Lifecycle for LifecycleHandle {
    fn name(&self) -> &NodeName {
        &self.shared.name
    }

    fn start(&self) {
        if self.shared.is_closed() {
            debug!(node = %self.shared.name, "Ignoring start of closed node");
            return;
        }
        debug!(node = %self.shared.name, "Start requested");
        self.shared.coordinator.start();
        self.shared.coordinator.post(LifecycleEvent::Start);
    }

    fn stop(&self) {
        debug!(node = %self.shared.name, "Stop requested");
        self.shared.coordinator.post(LifecycleEvent::Stop);
    }

    fn close(&self) -> Result<()> {
        if !self.shared.mark_closed() {
            return Err(LifecycleError::AlreadyClosed {
                name: self.shared.name.clone(),
            });
        }
        info!(node = %self.shared.name, "Closing");

        self.shared.release_registrations();
        self.shared.coordinator.post(LifecycleEvent::Stop);
        self.shared.coordinator.close();

        for child in self.shared.children.iter().rev() {
            match catch_unwind(AssertUnwindSafe(|| child.close())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(node = %self.shared.name, child = %child.name(), error = %e, "Failed to close child");
                }
                Err(_) => {
                    warn!(node = %self.shared.name, child = %child.name(), "Closing child panicked");
                }
            }
        }
        Ok(())
    }

    fn current_state(&self) -> NodeState {
        self.shared.state()
    }

    fn children(&self) -> &[Arc<dyn Lifecycle>] {
        &self.shared.children
    }
}

fn write_tree(node: &dyn Lifecycle, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", node.name(), node.current_state())?;
    let children = node.children();
    if children.is_empty() {
        return Ok(());
    }

    f.write_str(" [")?;
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write_tree(child.as_ref(), f)?;
    }
    f.write_str("]")
}

impl std::fmt::Display for LifecycleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_tree(self, f)
    }
}

impl std::fmt::Debug for LifecycleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHandle")
            .field("name", &self.shared.name)
            .field("state", &self.shared.state())
            .field("children", &self.shared.children.len())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}
