//! Bare lifecycle double.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use domino_lifecycle::{Lifecycle, LifecycleError, NodeName, NodeState, Result};
use parking_lot::Mutex;

/// Order in which fakes were closed, shared between fakes.
pub type CloseLog = Arc<Mutex<Vec<NodeName>>>;

/// A node that does nothing but record `close` calls.
pub struct FakeLifecycle {
    name: NodeName,
    log: CloseLog,
    fail_on_close: bool,
    closed: AtomicBool,
}

impl FakeLifecycle {
    pub fn new(kind: &str, log: &CloseLog) -> Arc<Self> {
        Self::build(kind, log, false)
    }

    /// A fake whose `close` records the call, then fails.
    pub fn failing_close(kind: &str, log: &CloseLog) -> Arc<Self> {
        Self::build(kind, log, true)
    }

    fn build(kind: &str, log: &CloseLog, fail_on_close: bool) -> Arc<Self> {
        let name = match NodeName::new(kind, 1) {
            Ok(name) => name,
            Err(e) => panic!("invalid fake kind {kind:?}: {e}"),
        };
        Arc::new(Self {
            name,
            log: Arc::clone(log),
            fail_on_close,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Lifecycle for FakeLifecycle {
    fn name(&self) -> &NodeName {
        &self.name
    }

    fn start(&self) {}

    fn stop(&self) {}

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.log.lock().push(self.name.clone());
        if self.fail_on_close {
            return Err(LifecycleError::Internal(anyhow::anyhow!(
                "scripted close failure"
            )));
        }
        Ok(())
    }

    fn current_state(&self) -> NodeState {
        NodeState::Created
    }
}
