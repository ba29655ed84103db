//! Gateway heartbeat.
//!
//! The gateway supervisor's own resource: a periodic log line reporting the
//! status of every child. It only runs while the whole gateway is up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domino_lifecycle::{
    Leaf, LifecycleStatus, NodeContext, NodeName, ResourceSet, Result, StatusRegistry,
};
use tracing::{info, warn};

/// Counts heartbeats, for observers outside the tree.
#[derive(Clone, Default)]
pub struct HeartbeatStats {
    beats: Arc<AtomicU64>,
}

impl HeartbeatStats {
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }
}

/// Heartbeat task owned by the gateway supervisor.
pub struct Heartbeat {
    interval: Duration,
    registry: StatusRegistry,
    watched: Vec<NodeName>,
    stats: HeartbeatStats,
}

impl Heartbeat {
    pub fn new(
        interval: Duration,
        registry: StatusRegistry,
        watched: Vec<NodeName>,
    ) -> (Self, HeartbeatStats) {
        let stats = HeartbeatStats::default();
        (
            Self {
                interval,
                registry,
                watched,
                stats: stats.clone(),
            },
            stats,
        )
    }
}

#[async_trait]
impl Leaf for Heartbeat {
    async fn acquire_resources(
        &mut self,
        resources: &mut ResourceSet,
        ctx: &NodeContext,
    ) -> Result<()> {
        info!(
            node = %ctx.name(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting heartbeat"
        );

        resources.spawn(run_heartbeat(
            ctx.name().clone(),
            self.interval,
            self.registry.clone(),
            self.watched.clone(),
            self.stats.clone(),
        ));
        Ok(())
    }
}

async fn run_heartbeat(
    node: NodeName,
    interval: Duration,
    registry: StatusRegistry,
    watched: Vec<NodeName>,
    stats: HeartbeatStats,
) {
    let mut interval_timer = tokio::time::interval(interval);
    let mut consecutive_unhealthy = 0u32;

    loop {
        interval_timer.tick().await;
        let beat = stats.beats.fetch_add(1, Ordering::SeqCst) + 1;

        let children: Vec<String> = watched
            .iter()
            .map(|name| match registry.status(name) {
                Some(status) => format!("{name}={status}"),
                None => format!("{name}=UNKNOWN"),
            })
            .collect();
        let healthy = watched
            .iter()
            .all(|name| registry.status(name) == Some(LifecycleStatus::Up));

        if healthy {
            consecutive_unhealthy = 0;
            info!(node = %node, beat, children = ?children, "Gateway heartbeat");
        } else {
            // The supervisor releases the heartbeat as soon as it sees the
            // child status; this only shows up in the window before that.
            consecutive_unhealthy += 1;
            warn!(
                node = %node,
                beat,
                children = ?children,
                consecutive_unhealthy,
                "Gateway heartbeat with unhealthy children"
            );
        }
    }
}
