//! Leaf nodes: own resources, no children.

use async_trait::async_trait;
use domino_id::NodeName;
use tracing::{debug, info, warn};

use super::NodeContext;
use crate::error::Result;
use crate::resources::ResourceSet;
use crate::state::NodeState;

/// Resource acquisition hook for a leaf node.
///
/// Called on the node's coordinator each time the node starts. Everything
/// acquired must be recorded in `resources`; the framework releases the set
/// when the node stops or fails, including after a partial acquisition.
///
/// # Example
///
/// ```ignore
/// struct Database { url: String }
///
/// #[async_trait]
/// impl Leaf for Database {
///     async fn acquire_resources(&mut self, resources: &mut ResourceSet, _ctx: &NodeContext) -> Result<()> {
///         let pool = connect(&self.url).await?;
///         resources.hold(pool);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Leaf: Send + 'static {
    async fn acquire_resources(
        &mut self,
        resources: &mut ResourceSet,
        ctx: &NodeContext,
    ) -> Result<()>;
}

pub(crate) struct LeafNode {
    leaf: Box<dyn Leaf>,
    resources: ResourceSet,
}

impl LeafNode {
    pub(crate) fn new(owner: NodeName, leaf: Box<dyn Leaf>) -> Self {
        Self {
            leaf,
            resources: ResourceSet::new(owner),
        }
    }

    /// Acquire resources; on failure, whatever was acquired is released.
    pub(crate) async fn acquire(&mut self, ctx: &NodeContext) -> Result<()> {
        let scoped = ctx.with_generation(self.resources.generation());
        let result = self.leaf.acquire_resources(&mut self.resources, &scoped).await;
        if result.is_err() {
            self.resources.reset();
        }
        result
    }

    /// Acquire and map the outcome to the next state.
    pub(crate) async fn start(&mut self, ctx: &NodeContext) -> NodeState {
        match self.acquire(ctx).await {
            Ok(()) => {
                info!(node = %ctx.name(), resources = self.resources.len(), "Resources acquired");
                NodeState::Started
            }
            Err(e) => {
                warn!(node = %ctx.name(), error = %e, "Failed to acquire resources");
                NodeState::StoppedDueToError
            }
        }
    }

    pub(crate) fn release(&mut self) {
        self.resources.reset();
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.resources.generation() == generation
    }

    /// Handle an error reported by this node's resources while started.
    pub(crate) fn on_error_reported(
        &mut self,
        generation: u64,
        reason: &str,
        ctx: &NodeContext,
    ) -> NodeState {
        if !self.is_current(generation) {
            debug!(node = %ctx.name(), generation, "Ignoring error from released resources");
            return NodeState::Started;
        }
        warn!(node = %ctx.name(), reason, "Resources failed");
        self.release();
        NodeState::StoppedDueToError
    }
}
