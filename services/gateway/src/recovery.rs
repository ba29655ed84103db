//! Gateway recovery.
//!
//! A failed gateway is started again after a capped exponential delay. The
//! delay grows with every restart that does not bring the gateway back up
//! and resets once it reports `UP`.

use std::time::Duration;

use domino_lifecycle::{
    Lifecycle, LifecycleHandle, LifecycleStatus, NodeState, RegistrationHandle, StatusChange,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Restarts logged at `warn` before escalating to `error`.
const QUIET_RESTARTS: u32 = 3;

/// Capped exponential delay between restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl RestartBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay before the `attempt`-th restart, counting from 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Restart `root` whenever it settles in `StoppedDueToError`.
///
/// Returns once the root is closed and its status stream ends.
pub(crate) async fn run_recovery(
    root: LifecycleHandle,
    backoff: RestartBackoff,
    _registration: RegistrationHandle,
    mut changes: mpsc::UnboundedReceiver<StatusChange>,
) {
    let mut restarts = 0u32;

    loop {
        if root.is_closed() {
            break;
        }

        let next = if root.current_state() == NodeState::StoppedDueToError {
            let delay = backoff.delay(restarts + 1);
            match tokio::time::timeout(delay, changes.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if root.is_closed() {
                        break;
                    }
                    if root.current_state() == NodeState::StoppedDueToError {
                        restarts += 1;
                        if restarts <= QUIET_RESTARTS {
                            warn!(
                                node = %root.name(),
                                restarts,
                                delay_ms = delay.as_millis() as u64,
                                "Restarting failed gateway"
                            );
                        } else {
                            error!(
                                node = %root.name(),
                                restarts,
                                delay_ms = delay.as_millis() as u64,
                                "Gateway keeps failing, restarting"
                            );
                        }
                        root.start();
                    }
                    continue;
                }
            }
        } else {
            changes.recv().await
        };

        match next {
            Some(change) if change.status == LifecycleStatus::Up => {
                if restarts > 0 {
                    info!(node = %root.name(), restarts, "Gateway recovered");
                }
                restarts = 0;
            }
            Some(_) => {}
            None => break,
        }
    }

    debug!(node = %root.name(), "Recovery stopped");
}
