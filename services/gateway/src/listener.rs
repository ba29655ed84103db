//! HTTP listener leaf.
//!
//! Binds the configured address and serves the configured body for every
//! method and path through an axum router. A new body or request limit is
//! picked up in place by the running server; only a new bind address
//! rebinds the socket.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use domino_lifecycle::{
    ConfigReactiveLeaf, ConfigValue, LifecycleError, NodeContext, ResourceSet, Result,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Bind attempts while a previous socket on the same address is torn down.
const BIND_ATTEMPTS: u32 = 10;
const BIND_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Listener configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Address to accept connections on.
    pub bind_addr: SocketAddr,

    /// Response body for every request.
    #[serde(default = "default_body")]
    pub body: String,

    /// Requests served concurrently; extra requests get `503`.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_body() -> String {
    "ok\n".to_string()
}

fn default_max_connections() -> usize {
    256
}

#[derive(Default)]
struct ListenerShared {
    body: RwLock<String>,
    max_connections: AtomicUsize,
    active: AtomicUsize,
    local_addr: RwLock<Option<SocketAddr>>,
}

/// Read-only view of a running [`HttpListener`].
#[derive(Clone, Default)]
pub struct ListenerState {
    shared: Arc<ListenerShared>,
}

impl ListenerState {
    /// The address actually bound, while the listener holds a socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.read()
    }

    /// Body currently served.
    pub fn body(&self) -> String {
        self.shared.body.read().clone()
    }

    /// Requests currently being answered.
    pub fn active_requests(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }
}

/// Configuration-reactive HTTP listener.
pub struct HttpListener {
    state: ListenerState,
}

impl HttpListener {
    pub fn new() -> (Self, ListenerState) {
        let state = ListenerState::default();
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }

    fn update_in_place(&self, config: &ListenerConfig) {
        let shared = &self.state.shared;
        *shared.body.write() = config.body.clone();
        shared
            .max_connections
            .store(config.max_connections, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigReactiveLeaf for HttpListener {
    type Config = ListenerConfig;

    fn parse_configuration(&self, value: &ConfigValue) -> Result<ListenerConfig> {
        let config: ListenerConfig = serde_json::from_value(value.clone())
            .map_err(|e| LifecycleError::InvalidConfiguration(e.to_string()))?;
        if config.max_connections == 0 {
            return Err(LifecycleError::InvalidConfiguration(
                "max_connections must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    async fn apply_new_configuration(
        &mut self,
        new: &ListenerConfig,
        old: Option<&ListenerConfig>,
        resources: &mut ResourceSet,
        ctx: &NodeContext,
    ) -> Result<()> {
        if let Some(old) = old {
            if old.bind_addr == new.bind_addr {
                self.update_in_place(new);
                info!(
                    node = %ctx.name(),
                    max_connections = new.max_connections,
                    "Listener updated in place"
                );
                return Ok(());
            }
        }

        resources.release_all();

        let listener = bind(new.bind_addr).await?;
        let local_addr = listener.local_addr().map_err(anyhow::Error::from)?;
        self.update_in_place(new);

        let shared = Arc::clone(&self.state.shared);
        *shared.local_addr.write() = Some(local_addr);
        resources.keep(move || {
            shared.local_addr.write().take();
            Ok(())
        });
        resources.spawn(serve(
            listener,
            router(Arc::clone(&self.state.shared)),
            ctx.clone(),
        ));

        info!(node = %ctx.name(), addr = %local_addr, "Listening");
        Ok(())
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let mut attempt = 1;
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            // A socket released a moment ago may still be closing.
            Err(e) if e.kind() == ErrorKind::AddrInUse && attempt < BIND_ATTEMPTS => {
                debug!(addr = %addr, attempt, "Address in use, retrying bind");
                attempt += 1;
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(LifecycleError::ResourceAcquisition(format!(
                    "bind {addr}: {e}"
                )))
            }
        }
    }
}

/// Serve until the task is aborted; a server that stops on its own is a failure.
async fn serve(listener: TcpListener, app: Router, ctx: NodeContext) {
    let reason = match axum::serve(listener, app).await {
        Ok(()) => "HTTP server stopped".to_string(),
        Err(e) => format!("HTTP server failed: {e}"),
    };
    warn!(node = %ctx.name(), reason = %reason, "Listener lost");
    ctx.report_error(reason);
}

fn router(shared: Arc<ListenerShared>) -> Router {
    Router::new()
        .fallback(serve_body)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&shared),
            limit_requests,
        ))
        .with_state(shared)
}

async fn serve_body(State(shared): State<Arc<ListenerShared>>) -> impl IntoResponse {
    let body = shared.body.read().clone();
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

/// Holds a request slot for the duration of the inner handler.
async fn limit_requests(
    State(shared): State<Arc<ListenerShared>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(_slot) = RequestSlot::try_acquire(&shared) else {
        debug!(path = %request.uri().path(), "Request limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    next.run(request).await
}

/// Decrements the active request count when dropped.
struct RequestSlot {
    shared: Arc<ListenerShared>,
}

impl RequestSlot {
    fn try_acquire(shared: &Arc<ListenerShared>) -> Option<Self> {
        let limit = shared.max_connections.load(Ordering::SeqCst);
        shared
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < limit).then_some(active + 1)
            })
            .ok()?;
        Some(Self {
            shared: Arc::clone(shared),
        })
    }
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
    }
}
