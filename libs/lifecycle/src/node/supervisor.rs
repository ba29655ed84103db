//! Supervisors: composite nodes following their children.
//!
//! A supervisor is `Started` only while every child is `Started`. Any child
//! status change is re-evaluated from the children's current states rather
//! than from the event alone, so the outcome does not depend on the order in
//! which status changes arrive.
//!
//! ## Decision table (on child status change, while wanting to run)
//!
//! | Children                          | Outcome                                 |
//! |-----------------------------------|-----------------------------------------|
//! | all `Started`                     | promote (acquire own resources, if any) |
//! | any `StoppedDueToError`           | stop the others, `StoppedDueToError`    |
//! | a child just came UP, not started | restart children stopped by the parent  |
//! | otherwise                         | stop the others, `StoppedByParent`      |

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Lifecycle, LeafNode, NodeContext};
use crate::event::{LifecycleEvent, StatusChange};
use crate::registry::StatusListener;
use crate::state::{LifecycleStatus, NodeState};

pub(crate) struct SupervisorNode {
    children: Vec<Arc<dyn Lifecycle>>,
    subscribed: bool,
    wants_running: bool,
    own_failure: bool,
}

impl SupervisorNode {
    pub(crate) fn new(children: Vec<Arc<dyn Lifecycle>>) -> Self {
        Self {
            children,
            subscribed: false,
            wants_running: false,
            own_failure: false,
        }
    }

    pub(crate) async fn start(
        &mut self,
        state: NodeState,
        ctx: &NodeContext,
        own: Option<&mut LeafNode>,
    ) -> NodeState {
        self.wants_running = true;
        if state == NodeState::Started {
            return state;
        }
        self.own_failure = false;
        self.follow_children(ctx);

        info!(node = %ctx.name(), children = self.children.len(), "Starting children");
        for child in &self.children {
            child.start();
        }

        // Children that are already up will not publish again.
        if self.all_children_started() {
            self.promote(state, ctx, own).await
        } else {
            state
        }
    }

    pub(crate) fn stop(
        &mut self,
        state: NodeState,
        ctx: &NodeContext,
        own: Option<&mut LeafNode>,
    ) -> NodeState {
        self.wants_running = false;
        match state {
            NodeState::Created | NodeState::Started => {
                info!(node = %ctx.name(), "Stopping children");
                self.stop_active_children();
                if let Some(own) = own {
                    own.release();
                }
                NodeState::StoppedByParent
            }
            NodeState::StoppedByParent | NodeState::StoppedDueToError => {
                debug!(node = %ctx.name(), %state, "Already stopped");
                state
            }
        }
    }

    pub(crate) async fn on_child_status(
        &mut self,
        state: NodeState,
        change: &StatusChange,
        ctx: &NodeContext,
        own: Option<&mut LeafNode>,
    ) -> NodeState {
        if !self.children.iter().any(|c| c.name() == &change.name) {
            debug!(node = %ctx.name(), from = %change.name, "Ignoring status of unknown node");
            return state;
        }
        debug!(
            node = %ctx.name(),
            child = %change.name,
            status = %change.status,
            "Child status changed"
        );

        if !self.wants_running {
            // Stragglers that came up after a stop.
            self.stop_active_children();
            return state;
        }

        if self.own_failure {
            self.stop_active_children();
            return NodeState::StoppedDueToError;
        }

        if self.all_children_started() {
            return self.promote(state, ctx, own).await;
        }

        if self.any_child_failed() {
            if state != NodeState::StoppedDueToError {
                warn!(node = %ctx.name(), child = %change.name, "Child failed; stopping siblings");
            }
            self.stop_active_children();
            if let Some(own) = own {
                own.release();
            }
            return NodeState::StoppedDueToError;
        }

        if change.status == LifecycleStatus::Up && state != NodeState::Started {
            self.restart_stopped_children();
            return state;
        }

        self.stop_active_children();
        if let Some(own) = own {
            own.release();
        }
        NodeState::StoppedByParent
    }

    /// The owning flavor's own resources reported a failure.
    pub(crate) fn on_own_failure(
        &mut self,
        reason: &str,
        own: &mut LeafNode,
        ctx: &NodeContext,
    ) -> NodeState {
        warn!(node = %ctx.name(), reason, "Supervisor resources failed; stopping children");
        self.own_failure = true;
        own.release();
        self.stop_active_children();
        NodeState::StoppedDueToError
    }

    /// Forced failure after a handler error.
    pub(crate) fn fail(&mut self, own: Option<&mut LeafNode>) {
        self.own_failure = true;
        self.stop_active_children();
        if let Some(own) = own {
            own.release();
        }
    }

    async fn promote(
        &mut self,
        state: NodeState,
        ctx: &NodeContext,
        own: Option<&mut LeafNode>,
    ) -> NodeState {
        if state == NodeState::Started {
            return state;
        }
        if let Some(own) = own {
            if let Err(e) = own.acquire(ctx).await {
                warn!(node = %ctx.name(), error = %e, "Failed to acquire supervisor resources");
                self.own_failure = true;
                self.stop_active_children();
                return NodeState::StoppedDueToError;
            }
        }
        info!(node = %ctx.name(), "All children started");
        NodeState::Started
    }

    fn follow_children(&mut self, ctx: &NodeContext) {
        if self.subscribed {
            return;
        }
        self.subscribed = true;

        for child in &self.children {
            let sender = ctx.sender();
            let listener: StatusListener = Arc::new(move |change: &StatusChange| {
                sender.post(LifecycleEvent::StatusChanged(change.clone()));
            });
            ctx.keep_registration(ctx.registry().follow(child.name(), listener));
        }
        debug!(node = %ctx.name(), children = self.children.len(), "Following children");
    }

    fn all_children_started(&self) -> bool {
        self.children
            .iter()
            .all(|c| c.current_state() == NodeState::Started)
    }

    fn any_child_failed(&self) -> bool {
        self.children
            .iter()
            .any(|c| c.current_state() == NodeState::StoppedDueToError)
    }

    fn stop_active_children(&self) {
        for child in &self.children {
            if child.current_state().is_active() {
                child.stop();
            }
        }
    }

    fn restart_stopped_children(&self) {
        for child in &self.children {
            if child.current_state() == NodeState::StoppedByParent {
                child.start();
            }
        }
    }
}
