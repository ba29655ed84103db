//! Polling helpers.

use std::time::Duration;

use domino_lifecycle::{Lifecycle, NodeState};

/// Generous upper bound for a transition to become visible.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns the final value of `condition`.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return condition();
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Wait until `node` reaches `state`.
pub async fn wait_for_state(node: &dyn Lifecycle, state: NodeState) -> bool {
    eventually(DEFAULT_TIMEOUT, || node.current_state() == state).await
}

/// Give queued events a chance to run before asserting that nothing happened.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
