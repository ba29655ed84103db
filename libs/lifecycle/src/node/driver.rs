//! Binds a node kind to its coordinator.
//!
//! The driver only holds a weak reference to the node's shared state: the
//! shared state owns the coordinator, and the coordinator owns the driver.
//! Once the last handle and context are gone the mailbox closes, the driver
//! is dropped and the node is released and unregistered.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use domino_id::NodeName;
use tracing::{debug, trace, warn};

use super::{NodeContext, NodeKind, NodeShared};
use crate::coordinator::EventProcessor;
use crate::error::Result;
use crate::event::LifecycleEvent;
use crate::registry::StatusRegistry;
use crate::state::NodeState;

pub(crate) struct NodeDriver {
    shared: Weak<NodeShared>,
    name: NodeName,
    registry: StatusRegistry,
    kind: NodeKind,
    terminated: bool,
}

impl NodeDriver {
    pub(crate) fn new(shared: &Arc<NodeShared>, kind: NodeKind) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            name: shared.name.clone(),
            registry: shared.registry.clone(),
            kind,
            terminated: false,
        }
    }
}

#[async_trait]
impl EventProcessor for NodeDriver {
    async fn process(&mut self, event: LifecycleEvent) -> Result<()> {
        let Some(shared) = self.shared.upgrade() else {
            debug!(node = %self.name, event = event.label(), "Node dropped, ignoring event");
            return Ok(());
        };
        let ctx = NodeContext::new(Arc::clone(&shared));
        let state = shared.state();
        trace!(node = %self.name, event = event.label(), %state, "Processing event");

        let next = self.kind.handle(state, event, &ctx).await;
        shared.set_state(next);
        Ok(())
    }

    fn force_failure(&mut self, reason: &str) {
        warn!(node = %self.name, reason, "Forcing node into error");
        self.kind.fail();
        if let Some(shared) = self.shared.upgrade() {
            shared.set_state(NodeState::StoppedDueToError);
        }
    }

    fn terminated(&mut self) {
        if std::mem::replace(&mut self.terminated, true) {
            return;
        }
        self.kind.release();
        self.registry.unregister(&self.name);
    }
}

impl Drop for NodeDriver {
    fn drop(&mut self) {
        // Reached without `terminated` when the node was dropped unclosed.
        self.terminated();
    }
}
