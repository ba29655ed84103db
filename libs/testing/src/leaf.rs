//! Scripted leaf.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domino_lifecycle::{Leaf, LifecycleError, NodeContext, ResourceSet, Result};
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct MonitorInner {
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    fail_acquire: AtomicBool,
    panic_acquire: AtomicBool,
    context: Mutex<Option<NodeContext>>,
}

/// Observes and steers a [`ScriptedLeaf`] from the test.
#[derive(Clone, Default)]
pub struct LeafMonitor {
    inner: Arc<MonitorInner>,
}

impl LeafMonitor {
    /// Number of `acquire_resources` calls so far.
    pub fn acquisitions(&self) -> usize {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of resource releases so far.
    pub fn releases(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }

    /// Acquisitions not yet released.
    pub fn held(&self) -> usize {
        self.acquisitions().saturating_sub(self.releases())
    }

    /// Make subsequent acquisitions fail (after acquiring one resource).
    pub fn fail_acquire(&self, fail: bool) {
        self.inner.fail_acquire.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent acquisitions panic.
    pub fn panic_acquire(&self, panic: bool) {
        self.inner.panic_acquire.store(panic, Ordering::SeqCst);
    }

    /// Report a runtime failure through the context of the last acquisition.
    pub fn inject_error(&self, reason: &str) -> bool {
        match self.inner.context.lock().as_ref() {
            Some(ctx) => ctx.report_error(reason),
            None => false,
        }
    }

    /// Context handed to the last acquisition.
    pub fn last_context(&self) -> Option<NodeContext> {
        self.inner.context.lock().clone()
    }
}

/// A leaf holding one counted resource per successful acquisition.
pub struct ScriptedLeaf {
    monitor: LeafMonitor,
}

impl ScriptedLeaf {
    /// Create a leaf and the monitor that observes it.
    pub fn new() -> (Self, LeafMonitor) {
        let monitor = LeafMonitor::default();
        (
            Self {
                monitor: monitor.clone(),
            },
            monitor,
        )
    }

    /// Create a leaf whose first acquisition fails.
    pub fn failing() -> (Self, LeafMonitor) {
        let (leaf, monitor) = Self::new();
        monitor.fail_acquire(true);
        (leaf, monitor)
    }
}

#[async_trait]
impl Leaf for ScriptedLeaf {
    async fn acquire_resources(
        &mut self,
        resources: &mut ResourceSet,
        ctx: &NodeContext,
    ) -> Result<()> {
        let inner = Arc::clone(&self.monitor.inner);
        inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        *inner.context.lock() = Some(ctx.clone());
        debug!(node = %ctx.name(), "[SCRIPTED] Acquiring resources");

        let released = Arc::clone(&inner);
        resources.keep(move || {
            released.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        if inner.panic_acquire.load(Ordering::SeqCst) {
            panic!("scripted acquisition panic");
        }
        if inner.fail_acquire.load(Ordering::SeqCst) {
            return Err(LifecycleError::ResourceAcquisition(
                "scripted acquisition failure".to_string(),
            ));
        }
        Ok(())
    }
}
