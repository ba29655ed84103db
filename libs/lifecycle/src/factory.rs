//! Node construction.
//!
//! The factory is the only way to build nodes. It issues each node's name,
//! registers it with the status registry, validates the children of
//! composite nodes, and wires the node to a coordinator running on the
//! factory's runtime.

use std::collections::HashSet;
use std::sync::Arc;

use domino_id::NodeName;
use tokio::runtime::Handle;
use tracing::debug;

use crate::config::ConfigurationFeed;
use crate::coordinator::Coordinator;
use crate::error::{LifecycleError, Result};
use crate::node::{
    ConfigLeafNode, ConfigReactiveLeaf, Leaf, LeafNode, Lifecycle, LifecycleHandle, NodeDriver,
    NodeKind, NodeShared, SupervisorNode,
};
use crate::registry::StatusRegistry;

/// Builds lifecycle nodes into one registry.
///
/// Names are issued by the registry, so any number of factories (or clones)
/// sharing a registry never issue the same name twice.
#[derive(Clone)]
pub struct LifecycleFactory {
    registry: StatusRegistry,
    runtime: Handle,
}

impl LifecycleFactory {
    /// Create a factory whose coordinators run on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self::with_registry(runtime, StatusRegistry::new())
    }

    /// Create a factory on the runtime of the calling task.
    pub fn from_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| LifecycleError::NoRuntime(e.to_string()))
    }

    /// Create a factory publishing into an existing registry.
    pub fn with_registry(runtime: Handle, registry: StatusRegistry) -> Self {
        Self { registry, runtime }
    }

    /// The registry every node built here publishes to.
    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    /// Build a leaf node.
    pub fn leaf<L: Leaf>(&self, kind: &str, leaf: L) -> Result<LifecycleHandle> {
        let name = self.registry.issue_name(kind)?;
        let node = LeafNode::new(name.clone(), Box::new(leaf));
        self.build(name, Vec::new(), NodeKind::Leaf(node))
    }

    /// Build a leaf that follows `key` of `feed`.
    pub fn configuration_reactive_leaf<L: ConfigReactiveLeaf>(
        &self,
        kind: &str,
        key: impl Into<String>,
        feed: Arc<dyn ConfigurationFeed>,
        leaf: L,
    ) -> Result<LifecycleHandle> {
        let name = self.registry.issue_name(kind)?;
        let node = ConfigLeafNode::new(name.clone(), key.into(), feed, leaf);
        self.build(name, Vec::new(), NodeKind::ConfigReactiveLeaf(Box::new(node)))
    }

    /// Build a supervisor over `children`.
    pub fn supervisor(
        &self,
        kind: &str,
        children: Vec<Arc<dyn Lifecycle>>,
    ) -> Result<LifecycleHandle> {
        let name = self.registry.issue_name(kind)?;
        validate_children(&name, &children)?;
        let node = SupervisorNode::new(children.clone());
        self.build(name, children, NodeKind::Supervisor(node))
    }

    /// Build a supervisor that also acquires resources of its own once every
    /// child is started, and releases them before its children stop.
    pub fn resource_owning_supervisor<L: Leaf>(
        &self,
        kind: &str,
        children: Vec<Arc<dyn Lifecycle>>,
        resources: L,
    ) -> Result<LifecycleHandle> {
        let name = self.registry.issue_name(kind)?;
        validate_children(&name, &children)?;
        let node = SupervisorNode::new(children.clone());
        let own = LeafNode::new(name.clone(), Box::new(resources));
        self.build(
            name,
            children,
            NodeKind::ResourceOwningSupervisor(node, own),
        )
    }

    fn build(
        &self,
        name: NodeName,
        children: Vec<Arc<dyn Lifecycle>>,
        kind: NodeKind,
    ) -> Result<LifecycleHandle> {
        self.registry.register(&name)?;

        let coordinator = Coordinator::new(name.clone(), self.runtime.clone());
        let shared = Arc::new(NodeShared::new(
            name,
            coordinator,
            self.registry.clone(),
            children,
        ));
        shared
            .coordinator
            .install(Box::new(NodeDriver::new(&shared, kind)));

        debug!(node = %shared.name, children = shared.children.len(), "Node created");
        Ok(LifecycleHandle::new(shared))
    }
}

impl std::fmt::Debug for LifecycleFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleFactory")
            .field("registry", &self.registry)
            .finish()
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Reject duplicate children and any path leading back to `parent`.
///
/// Sharing a child between supervisors is allowed; only cycles are not.
/// Subtrees already checked are not walked again.
fn validate_children(parent: &NodeName, children: &[Arc<dyn Lifecycle>]) -> Result<()> {
    let mut seen = HashSet::new();
    for child in children {
        if !seen.insert(child.name().clone()) {
            return Err(LifecycleError::DuplicateChild {
                parent: parent.clone(),
                child: child.name().clone(),
            });
        }
    }

    let mut path = Vec::new();
    let mut checked = HashSet::new();
    for child in children {
        visit(child.as_ref(), parent, &mut path, &mut checked)?;
    }
    Ok(())
}

fn visit(
    node: &dyn Lifecycle,
    root: &NodeName,
    path: &mut Vec<NodeName>,
    checked: &mut HashSet<NodeName>,
) -> Result<()> {
    if node.name() == root || path.contains(node.name()) {
        return Err(LifecycleError::CycleDetected {
            name: node.name().clone(),
        });
    }
    if checked.contains(node.name()) {
        return Ok(());
    }

    path.push(node.name().clone());
    for child in node.children() {
        visit(child.as_ref(), root, path, checked)?;
    }
    path.pop();
    checked.insert(node.name().clone());
    Ok(())
}
