//! Domino gateway binary.
//!
//! Builds the gateway tree, publishes the listener section and runs until
//! `Ctrl-C`. On `SIGHUP` the listener section is re-read and applied in
//! place. A failed gateway is restarted with the configured backoff.

use anyhow::{Context, Result};
use domino_gateway::settings::Settings;
use domino_gateway::Gateway;
use domino_lifecycle::LifecycleFactory;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the fallback log level applies
    let settings = Settings::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| settings.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        upstream = %settings.upstream_addr,
        heartbeat_interval_secs = settings.heartbeat_interval.as_secs(),
        restart_backoff_ms = settings.restart_backoff.initial.as_millis() as u64,
        listener_config = ?settings.listener_config_path,
        "Starting domino gateway"
    );

    let factory = LifecycleFactory::from_current().context("failed to create lifecycle factory")?;
    let gateway = Gateway::build(&factory, &settings).context("failed to build gateway")?;
    info!(tree = %gateway.root(), "Gateway built");

    let section = settings
        .load_listener_section()
        .context("failed to load listener configuration")?;
    gateway.configure_listener(section);

    let (_status_registration, mut status_rx) = gateway.watch_status();
    tokio::spawn(async move {
        while let Some(change) = status_rx.recv().await {
            info!(
                node = %change.name,
                previous = %change.previous,
                status = %change.status,
                "Gateway status changed"
            );
        }
    });

    let recovery = gateway.spawn_recovery(settings.restart_backoff);
    gateway.start();

    run_until_shutdown(&gateway, &settings).await?;

    info!("Shutting down gateway");
    if let Err(e) = gateway.shutdown().await {
        error!(error = %e, "Gateway shutdown failed");
        recovery.abort();
    }
    if let Err(e) = recovery.await {
        warn!(error = %e, "Recovery task did not finish cleanly");
    }
    info!("Gateway stopped");

    Ok(())
}

#[cfg(unix)]
async fn run_until_shutdown(gateway: &Gateway, settings: &Settings) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("Received shutdown signal");
                return Ok(());
            }
            _ = hangup.recv() => reload(gateway, settings),
        }
    }
}

#[cfg(not(unix))]
async fn run_until_shutdown(_gateway: &Gateway, _settings: &Settings) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Received shutdown signal");
    Ok(())
}

#[cfg(unix)]
fn reload(gateway: &Gateway, settings: &Settings) {
    info!("Received SIGHUP, reloading listener configuration");
    match settings.load_listener_section() {
        Ok(section) => {
            if gateway.configure_listener(section) {
                info!("Listener configuration changed");
            } else {
                info!("Listener configuration unchanged");
            }
        }
        Err(e) => warn!(error = %e, "Keeping current listener configuration"),
    }
}
