//! Node kinds and their transition table.

use tracing::{debug, warn};

use super::config_leaf::ConfigReactiveNode;
use super::{LeafNode, NodeContext, SupervisorNode};
use crate::event::LifecycleEvent;
use crate::state::NodeState;

pub(crate) enum NodeKind {
    Leaf(LeafNode),
    ConfigReactiveLeaf(Box<dyn ConfigReactiveNode>),
    Supervisor(SupervisorNode),
    ResourceOwningSupervisor(SupervisorNode, LeafNode),
}

impl NodeKind {
    /// Handle one event in `state` and return the next state.
    pub(crate) async fn handle(
        &mut self,
        state: NodeState,
        event: LifecycleEvent,
        ctx: &NodeContext,
    ) -> NodeState {
        use LifecycleEvent as E;
        use NodeState as S;

        match (self, state, event) {
            // ---- Leaf ----
            (
                NodeKind::Leaf(leaf),
                S::Created | S::StoppedByParent | S::StoppedDueToError,
                E::Start,
            ) => leaf.start(ctx).await,
            (NodeKind::Leaf(_), S::Started, E::Start) => state,
            (NodeKind::Leaf(leaf), S::Created | S::Started, E::Stop) => {
                leaf.release();
                S::StoppedByParent
            }
            (NodeKind::Leaf(_), S::StoppedByParent | S::StoppedDueToError, E::Stop) => state,
            (NodeKind::Leaf(leaf), S::Started, E::ErrorReported { generation, reason }) => {
                leaf.on_error_reported(generation, &reason, ctx)
            }

            // ---- Configuration-reactive leaf ----
            (NodeKind::ConfigReactiveLeaf(node), S::Created, E::Start) => {
                // Started by the first applied configuration.
                node.request_start(ctx);
                state
            }
            (NodeKind::ConfigReactiveLeaf(node), S::StoppedByParent, E::Start) => {
                node.request_start(ctx);
                if node.has_snapshot() {
                    node.reapply(ctx).await
                } else {
                    state
                }
            }
            (NodeKind::ConfigReactiveLeaf(node), S::Started | S::StoppedDueToError, E::Start) => {
                node.request_start(ctx);
                state
            }
            (NodeKind::ConfigReactiveLeaf(node), S::Created | S::Started, E::Stop) => {
                node.stop();
                S::StoppedByParent
            }
            (
                NodeKind::ConfigReactiveLeaf(node),
                S::StoppedByParent | S::StoppedDueToError,
                E::Stop,
            ) => {
                node.stop();
                state
            }
            (
                NodeKind::ConfigReactiveLeaf(node),
                _,
                E::NewConfiguration {
                    changed_keys,
                    config,
                },
            ) => {
                node.on_configuration(state, &changed_keys, &config, ctx)
                    .await
            }
            (
                NodeKind::ConfigReactiveLeaf(node),
                S::Started,
                E::ErrorReported { generation, reason },
            ) => node.on_error_reported(generation, &reason, ctx),

            // ---- Supervisors ----
            (NodeKind::Supervisor(sup), _, E::Start) => sup.start(state, ctx, None).await,
            (NodeKind::ResourceOwningSupervisor(sup, own), _, E::Start) => {
                sup.start(state, ctx, Some(own)).await
            }
            (NodeKind::Supervisor(sup), _, E::Stop) => sup.stop(state, ctx, None),
            (NodeKind::ResourceOwningSupervisor(sup, own), _, E::Stop) => {
                sup.stop(state, ctx, Some(own))
            }
            (NodeKind::Supervisor(sup), _, E::StatusChanged(change)) => {
                sup.on_child_status(state, &change, ctx, None).await
            }
            (NodeKind::ResourceOwningSupervisor(sup, own), _, E::StatusChanged(change)) => {
                sup.on_child_status(state, &change, ctx, Some(own)).await
            }
            (
                NodeKind::ResourceOwningSupervisor(sup, own),
                S::Started,
                E::ErrorReported { generation, reason },
            ) if own.is_current(generation) => sup.on_own_failure(&reason, own, ctx),

            // ---- Ignored ----
            (_, _, E::ErrorReported { generation, .. }) => {
                debug!(node = %ctx.name(), generation, %state, "Ignoring stale error report");
                state
            }
            (_, _, event @ (E::StatusChanged(_) | E::NewConfiguration { .. })) => {
                warn!(node = %ctx.name(), event = event.label(), %state, "Unexpected event");
                state
            }
        }
    }

    /// Release everything after a handler failure.
    pub(crate) fn fail(&mut self) {
        match self {
            NodeKind::Leaf(leaf) => leaf.release(),
            NodeKind::ConfigReactiveLeaf(node) => node.release(),
            NodeKind::Supervisor(sup) => sup.fail(None),
            NodeKind::ResourceOwningSupervisor(sup, own) => sup.fail(Some(own)),
        }
    }

    /// Release owned resources once the coordinator has terminated.
    pub(crate) fn release(&mut self) {
        match self {
            NodeKind::Leaf(leaf) | NodeKind::ResourceOwningSupervisor(_, leaf) => leaf.release(),
            NodeKind::ConfigReactiveLeaf(node) => node.release(),
            NodeKind::Supervisor(_) => {}
        }
    }
}
