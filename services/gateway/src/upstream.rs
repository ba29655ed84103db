//! Upstream connection leaf.
//!
//! Holds one TCP connection to the upstream for as long as the node is
//! started. A watcher task owns the socket and reports a runtime error
//! when the upstream closes it, so the gateway stops serving instead of
//! answering without a backend.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use domino_lifecycle::{Leaf, LifecycleError, NodeContext, ResourceSet, Result};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{info, trace, warn};

/// Keeps a connection to the upstream open.
pub struct UpstreamConnection {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl UpstreamConnection {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(LifecycleError::ResourceAcquisition(format!(
                "connect to {}: {e}",
                self.addr
            ))),
            Err(_) => Err(LifecycleError::ResourceAcquisition(format!(
                "connect to {} timed out after {:?}",
                self.addr, self.connect_timeout
            ))),
        }
    }
}

#[async_trait]
impl Leaf for UpstreamConnection {
    async fn acquire_resources(
        &mut self,
        resources: &mut ResourceSet,
        ctx: &NodeContext,
    ) -> Result<()> {
        let stream = self.connect().await?;
        let local_addr = stream.local_addr().map_err(anyhow::Error::from)?;
        info!(
            node = %ctx.name(),
            upstream = %self.addr,
            local = %local_addr,
            "Upstream connected"
        );

        resources.spawn(watch_connection(stream, self.addr, ctx.clone()));
        Ok(())
    }
}

/// Drain the upstream socket until it closes, then report the loss.
async fn watch_connection(mut stream: TcpStream, addr: SocketAddr, ctx: NodeContext) {
    let mut buf = [0u8; 512];
    let reason = loop {
        match stream.read(&mut buf).await {
            Ok(0) => break "upstream closed the connection".to_string(),
            Ok(n) => trace!(node = %ctx.name(), bytes = n, "Discarding upstream data"),
            Err(e) => break format!("upstream read failed: {e}"),
        }
    };

    warn!(node = %ctx.name(), upstream = %addr, reason = %reason, "Upstream connection lost");
    ctx.report_error(reason);
}
