//! Coordinator - per-node serialized event processor.
//!
//! Each node owns one coordinator: an unbounded mailbox drained by a single
//! tokio task. Events for one node are handled one at a time, in the order
//! they were posted; different nodes run concurrently on the runtime's
//! worker pool.
//!
//! ## Lifecycle
//!
//! ```text
//! new() ──install()──► idle ──start()──► running ──close()──► draining ──► terminated
//!                        │                                                    ▲
//!                        └──────────────────── close() ───────────────────────┘
//! ```
//!
//! Events posted before `start()` are queued and delivered once the task runs.
//! After `close()` every post is a no-op; events already queued still drain.
//!
//! A handler error or panic never escapes the task: it is logged and the node
//! is forced into `StoppedDueToError`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domino_id::NodeName;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace};

use crate::error::Result;
use crate::event::LifecycleEvent;

// =============================================================================
// Processor Seam
// =============================================================================

/// Node-side handler driven by a coordinator.
#[async_trait]
pub(crate) trait EventProcessor: Send + 'static {
    /// Handle a single event.
    async fn process(&mut self, event: LifecycleEvent) -> Result<()>;

    /// Called after `process` failed or panicked.
    fn force_failure(&mut self, reason: &str);

    /// Called once, after the last event has been handled.
    fn terminated(&mut self);
}

pub(crate) enum Envelope {
    Event(LifecycleEvent),
    Shutdown,
}

// =============================================================================
// Event Sender
// =============================================================================

/// Cloneable posting side of a coordinator.
#[derive(Clone)]
pub(crate) struct EventSender {
    name: NodeName,
    tx: mpsc::UnboundedSender<Envelope>,
    closed: Arc<AtomicBool>,
}

impl EventSender {
    /// Enqueue an event. Never blocks; returns false if the coordinator is closed.
    pub(crate) fn post(&self, event: LifecycleEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            trace!(node = %self.name, event = event.label(), "Dropping event for closed coordinator");
            return false;
        }
        self.tx.send(Envelope::Event(event)).is_ok()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

struct Pending {
    rx: mpsc::UnboundedReceiver<Envelope>,
    processor: Option<Box<dyn EventProcessor>>,
}

pub(crate) struct Coordinator {
    sender: EventSender,
    pending: Mutex<Option<Pending>>,
    runtime: Handle,
    started: AtomicBool,
    terminated: Arc<watch::Sender<bool>>,
}

impl Coordinator {
    pub(crate) fn new(name: NodeName, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (terminated, _) = watch::channel(false);

        Self {
            sender: EventSender {
                name,
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            pending: Mutex::new(Some(Pending {
                rx,
                processor: None,
            })),
            runtime,
            started: AtomicBool::new(false),
            terminated: Arc::new(terminated),
        }
    }

    /// Attach the handler. Must happen before `start()`.
    pub(crate) fn install(&self, processor: Box<dyn EventProcessor>) {
        if let Some(pending) = self.pending.lock().as_mut() {
            pending.processor = Some(processor);
        }
    }

    pub(crate) fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub(crate) fn post(&self, event: LifecycleEvent) -> bool {
        self.sender.post(event)
    }

    /// Begin delivering events. Idempotent.
    pub(crate) fn start(&self) {
        let Some(pending) = self.pending.lock().take() else {
            return;
        };
        let name = self.sender.name.clone();
        let Some(processor) = pending.processor else {
            error!(node = %name, "Coordinator started without a processor");
            return;
        };

        self.started.store(true, Ordering::Release);
        let terminated = Arc::clone(&self.terminated);
        self.runtime
            .spawn(run_coordinator(name, pending.rx, processor, terminated));
    }

    /// Disable posting and let queued events drain. Idempotent.
    pub(crate) fn close(&self) {
        if self.sender.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sender.tx.send(Envelope::Shutdown);

        // Never started: nothing will drain the queue, terminate here.
        if let Some(pending) = self.pending.lock().take() {
            if let Some(mut processor) = pending.processor {
                processor.terminated();
            }
            self.terminated.send_replace(true);
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.sender.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        *self.terminated.borrow()
    }

    /// Wait until the task has drained its queue and exited.
    pub(crate) async fn wait_terminated(&self) {
        let mut rx = self.terminated.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

// =============================================================================
// Coordinator Loop
// =============================================================================

async fn run_coordinator(
    name: NodeName,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    mut processor: Box<dyn EventProcessor>,
    terminated: Arc<watch::Sender<bool>>,
) {
    debug!(node = %name, "Coordinator started");
    let mut events_processed: u64 = 0;

    while let Some(envelope) = rx.recv().await {
        let event = match envelope {
            Envelope::Event(event) => event,
            Envelope::Shutdown => break,
        };
        let label = event.label();
        events_processed += 1;

        match std::panic::AssertUnwindSafe(processor.process(event))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(node = %name, event = label, error = %e, "Event handler failed");
                processor.force_failure(&e.to_string());
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(node = %name, event = label, panic = %reason, "Event handler panicked");
                processor.force_failure(&reason);
            }
        }
    }

    processor.terminated();
    terminated.send_replace(true);
    debug!(node = %name, events_processed, "Coordinator stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
