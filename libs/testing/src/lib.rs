//! # domino-testing
//!
//! Test doubles and helpers for exercising lifecycle trees.
//!
//! - [`ScriptedLeaf`] / [`LeafMonitor`]: a leaf whose acquisitions can be made
//!   to fail and whose resources can report runtime errors
//! - [`ScriptedConfigLeaf`] / [`ConfigMonitor`]: a configuration-reactive leaf
//!   over raw JSON values, and [`ManualFeed`] to push values verbatim
//! - [`FakeLifecycle`]: a bare node that only records `close` calls
//! - [`StatusRecorder`]: the sequence of published statuses per node
//! - [`eventually`] / [`wait_for_state`]: polling for asynchronous transitions

mod config;
mod fake;
mod leaf;
mod recorder;
mod wait;

pub use config::{Applied, ConfigMonitor, ManualFeed, ScriptedConfigLeaf};
pub use fake::{CloseLog, FakeLifecycle};
pub use leaf::{LeafMonitor, ScriptedLeaf};
pub use recorder::StatusRecorder;
pub use wait::{eventually, settle, wait_for_state, DEFAULT_TIMEOUT};

/// Install a test-friendly tracing subscriber, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
