//! Node lifecycle states and their externally visible status.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node.
///
/// Transitions are governed by each node kind's event handling, not by any
/// ordering between the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Constructed; the coordinator has not driven the node yet.
    Created,
    /// The node (and, for composites, every child) is operational.
    Started,
    /// Deliberately stopped while healthy; resources released.
    StoppedByParent,
    /// Stopped because of an internal fault or a child's fault; resources released.
    StoppedDueToError,
}

impl NodeState {
    /// The status published to the registry for this state.
    pub const fn status(self) -> LifecycleStatus {
        match self {
            NodeState::Started => LifecycleStatus::Up,
            NodeState::Created | NodeState::StoppedByParent => LifecycleStatus::Down,
            NodeState::StoppedDueToError => LifecycleStatus::Error,
        }
    }

    /// Returns true for the states in which a node may still hold resources.
    pub const fn is_active(self) -> bool {
        matches!(self, NodeState::Created | NodeState::Started)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeState::Created => "Created",
            NodeState::Started => "Started",
            NodeState::StoppedByParent => "StoppedByParent",
            NodeState::StoppedDueToError => "StoppedDueToError",
        };
        f.write_str(s)
    }
}

/// Externally observable projection of a [`NodeState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStatus {
    Up,
    Down,
    Error,
}

impl From<NodeState> for LifecycleStatus {
    fn from(state: NodeState) -> Self {
        state.status()
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleStatus::Up => "UP",
            LifecycleStatus::Down => "DOWN",
            LifecycleStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(NodeState::Created, LifecycleStatus::Down)]
    #[case(NodeState::Started, LifecycleStatus::Up)]
    #[case(NodeState::StoppedByParent, LifecycleStatus::Down)]
    #[case(NodeState::StoppedDueToError, LifecycleStatus::Error)]
    fn test_status_projection(#[case] state: NodeState, #[case] expected: LifecycleStatus) {
        assert_eq!(LifecycleStatus::from(state), expected);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_string(&LifecycleStatus::Error).unwrap();
        assert_eq!(json, "\"ERROR\"");
    }

    #[test]
    fn test_active_states() {
        assert!(NodeState::Created.is_active());
        assert!(NodeState::Started.is_active());
        assert!(!NodeState::StoppedByParent.is_active());
        assert!(!NodeState::StoppedDueToError.is_active());
    }
}
