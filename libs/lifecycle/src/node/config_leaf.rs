//! Configuration-reactive leaves.
//!
//! A configuration-reactive leaf watches one key of a [`ConfigurationFeed`].
//! It registers with the feed the first time it is started and only becomes
//! `Started` once a configuration has been applied successfully. Afterwards
//! every distinct value pushed for its key is applied in place, without a
//! restart.
//!
//! ## Rules
//!
//! - A value equal to the last accepted snapshot is ignored
//! - The snapshot is replaced before applying; a failed apply is not rolled back
//! - A successful apply from `StoppedDueToError` recovers the node
//! - While stopped by its parent the node only records new values; the
//!   latest one is applied on the next start

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use domino_id::NodeName;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::NodeContext;
use crate::config::{ConfigListener, ConfigMap, ConfigValue, ConfigurationFeed};
use crate::error::{LifecycleError, Result};
use crate::event::LifecycleEvent;
use crate::resources::ResourceSet;
use crate::state::NodeState;

/// A leaf whose resources are derived from a configuration section.
#[async_trait]
pub trait ConfigReactiveLeaf: Send + 'static {
    /// Typed configuration for this node.
    type Config: DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Turn the raw section into the typed configuration.
    fn parse_configuration(&self, value: &ConfigValue) -> Result<Self::Config> {
        serde_json::from_value(value.clone())
            .map_err(|e| LifecycleError::InvalidConfiguration(e.to_string()))
    }

    /// Bring the node's resources in line with `new`.
    ///
    /// `old` is the previously applied configuration, or `None` when
    /// `resources` is empty (first apply, or after a stop or failure).
    async fn apply_new_configuration(
        &mut self,
        new: &Self::Config,
        old: Option<&Self::Config>,
        resources: &mut ResourceSet,
        ctx: &NodeContext,
    ) -> Result<()>;
}

/// Type-erased view of a [`ConfigLeafNode`], driven by the node kind.
#[async_trait]
pub(crate) trait ConfigReactiveNode: Send {
    /// Mark the node as wanting to run; subscribe to the feed once.
    fn request_start(&mut self, ctx: &NodeContext);

    fn has_snapshot(&self) -> bool;

    /// Apply the retained snapshot from scratch.
    async fn reapply(&mut self, ctx: &NodeContext) -> NodeState;

    /// Release resources and forget the pending start.
    fn stop(&mut self);

    fn release(&mut self);

    async fn on_configuration(
        &mut self,
        state: NodeState,
        changed_keys: &BTreeSet<String>,
        config: &ConfigMap,
        ctx: &NodeContext,
    ) -> NodeState;

    fn on_error_reported(&mut self, generation: u64, reason: &str, ctx: &NodeContext) -> NodeState;
}

pub(crate) struct ConfigLeafNode<L: ConfigReactiveLeaf> {
    leaf: L,
    key: String,
    feed: Arc<dyn ConfigurationFeed>,
    snapshot: Option<L::Config>,
    resources: ResourceSet,
    subscribed: bool,
    start_requested: bool,
}

impl<L: ConfigReactiveLeaf> ConfigLeafNode<L> {
    pub(crate) fn new(
        owner: NodeName,
        key: String,
        feed: Arc<dyn ConfigurationFeed>,
        leaf: L,
    ) -> Self {
        Self {
            leaf,
            key,
            feed,
            snapshot: None,
            resources: ResourceSet::new(owner),
            subscribed: false,
            start_requested: false,
        }
    }

    /// Stopped by the parent and not asked to start again.
    fn is_parked(&self, state: NodeState) -> bool {
        state == NodeState::StoppedByParent && !self.start_requested
    }

    async fn apply(
        &mut self,
        new: &L::Config,
        old: Option<&L::Config>,
        ctx: &NodeContext,
    ) -> NodeState {
        info!(node = %ctx.name(), key = %self.key, "Applying configuration");
        let scoped = ctx.with_generation(self.resources.generation());

        match self
            .leaf
            .apply_new_configuration(new, old, &mut self.resources, &scoped)
            .await
        {
            Ok(()) => {
                info!(node = %ctx.name(), key = %self.key, "Configuration applied");
                NodeState::Started
            }
            Err(e) => {
                warn!(node = %ctx.name(), key = %self.key, error = %e, "Failed to apply configuration");
                self.resources.reset();
                NodeState::StoppedDueToError
            }
        }
    }
}

#[async_trait]
impl<L: ConfigReactiveLeaf> ConfigReactiveNode for ConfigLeafNode<L> {
    fn request_start(&mut self, ctx: &NodeContext) {
        self.start_requested = true;
        if self.subscribed {
            return;
        }
        self.subscribed = true;

        let sender = ctx.sender();
        let key = self.key.clone();
        let listener: ConfigListener =
            Arc::new(move |changed: &BTreeSet<String>, config: &ConfigMap| {
                if changed.contains(&key) {
                    sender.post(LifecycleEvent::NewConfiguration {
                        changed_keys: changed.clone(),
                        config: config.clone(),
                    });
                }
            });

        let handle = self.feed.register_for_updates(listener);
        ctx.keep_registration(handle);
        debug!(node = %ctx.name(), key = %self.key, "Registered for configuration updates");
    }

    fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    async fn reapply(&mut self, ctx: &NodeContext) -> NodeState {
        let Some(snapshot) = self.snapshot.clone() else {
            return NodeState::StoppedByParent;
        };
        self.apply(&snapshot, None, ctx).await
    }

    fn stop(&mut self) {
        self.start_requested = false;
        self.resources.reset();
    }

    fn release(&mut self) {
        self.resources.reset();
    }

    async fn on_configuration(
        &mut self,
        state: NodeState,
        changed_keys: &BTreeSet<String>,
        config: &ConfigMap,
        ctx: &NodeContext,
    ) -> NodeState {
        if !changed_keys.contains(&self.key) {
            return state;
        }
        let Some(value) = config.get(&self.key) else {
            debug!(node = %ctx.name(), key = %self.key, "Configuration key removed; keeping current resources");
            return state;
        };

        let new = match self.leaf.parse_configuration(value) {
            Ok(new) => new,
            Err(e) => {
                warn!(node = %ctx.name(), key = %self.key, error = %e, "Rejected configuration");
                if self.is_parked(state) {
                    return state;
                }
                self.resources.reset();
                return NodeState::StoppedDueToError;
            }
        };

        if self.snapshot.as_ref() == Some(&new) {
            info!(node = %ctx.name(), key = %self.key, "Configuration had not changed");
            return state;
        }

        if self.is_parked(state) {
            debug!(node = %ctx.name(), key = %self.key, "Stopped; keeping configuration for the next start");
            self.snapshot = Some(new);
            return state;
        }

        // Resources were released on the way into these states.
        let previous = self.snapshot.replace(new.clone());
        let old = if state == NodeState::Started {
            previous
        } else {
            None
        };
        self.apply(&new, old.as_ref(), ctx).await
    }

    fn on_error_reported(&mut self, generation: u64, reason: &str, ctx: &NodeContext) -> NodeState {
        if self.resources.generation() != generation {
            debug!(node = %ctx.name(), generation, "Ignoring error from released resources");
            return NodeState::Started;
        }
        warn!(node = %ctx.name(), reason, "Resources failed");
        self.resources.reset();
        NodeState::StoppedDueToError
    }
}
