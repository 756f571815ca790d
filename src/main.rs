//! Dockgen daemon entry point.
//!
//! Watches running containers, derives routing configuration from their
//! labels and regenerates the configured templates when it changes.

use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

mod config;
mod debounce;
mod error;
mod generator;
mod hostnames;
mod monitor;
mod registry;
mod runtime;
mod signals;
mod templates;
mod types;

use config::{Config, MonitorMode};
use debounce::Debouncer;
use generator::Generator;
use monitor::Monitor;
use registry::{reconcile, Registry, Snapshot};
use runtime::DockerRuntime;
use templates::Templates;

/// Capacity of the monitor -> registry event channel.
const EVENT_BUFFER: usize = 128;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting Dockgen: {:?} monitor, {} template(s), {} signal target(s), proxy tag {:?}",
        cfg.monitor,
        cfg.templates.len(),
        cfg.signals.len(),
        cfg.proxy_tag
    );
    let debug = cfg.debug_flags();

    // Templates must parse before anything is watched
    let templates = Templates::load(&cfg.templates).await?;

    let runtime = Arc::new(DockerRuntime::connect()?);
    let cancel = CancellationToken::new();

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
    let (arm_tx, arm_rx) = mpsc::channel(EVENT_BUFFER);
    let (trigger_tx, trigger_rx) = Debouncer::channel();

    // Monitor
    let monitor = match cfg.monitor {
        MonitorMode::Streaming => Monitor::streaming(Arc::clone(&runtime), cfg.resync_interval()),
        MonitorMode::Polling => Monitor::polling(Arc::clone(&runtime), cfg.poll_interval()),
    };
    let mut monitor_handle = tokio::spawn(monitor.run(event_tx, cancel.clone()));

    // Registry
    let registry = Registry::new(cfg.proxy_tag.clone()).with_debug(debug.containers);
    let reconcile_handle = tokio::spawn(reconcile(
        registry,
        event_rx,
        snapshot_tx,
        arm_tx,
        cancel.clone(),
    ));

    // Debounce
    let debouncer = Debouncer::new(cfg.debounce_quiet(), cfg.debounce_ceiling());
    let debounce_handle = tokio::spawn(debouncer.run(arm_rx, trigger_tx, cancel.clone()));

    // Render loop
    let generator = Generator::new(Arc::clone(&runtime), templates)
        .with_signals(cfg.signals.clone())
        .with_users(cfg.users.clone())
        .with_tag_filter(cfg.proxy_tag.is_some())
        .with_debug(debug);
    let mut render_handle = tokio::spawn(generator.run(trigger_rx, snapshot_rx, cancel.clone()));

    let mut sigterm = signal(SignalKind::terminate())?;
    let outcome: anyhow::Result<()> = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received SIGINT, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            }
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
            Ok(())
        }
        res = &mut monitor_handle => match res {
            Ok(Ok(())) => Err(anyhow!("Container monitor stopped unexpectedly")),
            Ok(Err(e)) => Err(anyhow!("Error monitoring containers: {}", e)),
            Err(e) => Err(anyhow!("Container monitor panicked: {}", e)),
        },
        res = &mut render_handle => match res {
            Ok(Ok(())) => Err(anyhow!("Render loop stopped unexpectedly")),
            Ok(Err(e)) => Err(anyhow!("Error generating templates: {}", e)),
            Err(e) => Err(anyhow!("Render loop panicked: {}", e)),
        },
    };

    cancel.cancel();

    // Let an in-flight render finish before the runtime goes away.
    if !render_handle.is_finished() {
        if let Ok(Err(e)) = render_handle.await {
            error!("Error generating templates: {}", e);
        }
    }
    if !monitor_handle.is_finished() {
        let _ = monitor_handle.await;
    }
    let _ = reconcile_handle.await;
    let _ = debounce_handle.await;
    drop(runtime);

    match outcome {
        Ok(()) => {
            info!("Shutdown complete.");
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e)
        }
    }
}
