//! Event router daemon.
//!
//! Loads the TOML configuration, builds the routing core, then runs the
//! background tasks until SIGINT/SIGTERM:
//! - rule sweeper (TTL expiry)
//! - config watcher + reload loop
//! - admin API (when enabled)
//!
//! SIGHUP re-reads the configuration file on demand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use event_router::admin::{serve_admin, AdminState};
use event_router::config::{load_config, ConfigWatcher, RouterConfig};
use event_router::expr::FunctionRegistry;
use event_router::forward::ForwarderRegistry;
use event_router::lifecycle::signals::{next_signal, Signal};
use event_router::lifecycle::{RouterRuntime, Shutdown};
use event_router::observability::{logging, metrics};
use event_router::rules::RuleSweeper;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "event-router")]
#[command(about = "Rule-driven event router", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => RouterConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "event-router starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let runtime = RouterRuntime::build(&config, FunctionRegistry::new(), ForwarderRegistry::with_echo());
    let shutdown = Shutdown::new();

    let sweeper = RuleSweeper::new(runtime.registry.clone(), config.registry.sweep_interval());
    tokio::spawn(sweeper.run(shutdown.subscribe()));

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(&runtime, &config.admin.api_key);
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let current = Arc::new(std::sync::Mutex::new(config));

    // Keep the watcher alive for the process lifetime.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => {
                    tokio::spawn(reload_loop(runtime.clone(), current.clone(), updates, shutdown.subscribe()));
                    Some(handle)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable; hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    loop {
        match next_signal().await? {
            Signal::Reload => match &args.config {
                Some(path) => match load_config(path) {
                    Ok(next) => apply_reload(&runtime, &current, next),
                    Err(e) => tracing::error!(error = %e, "Reload failed; keeping current configuration"),
                },
                None => tracing::info!("No config file; nothing to reload"),
            },
            Signal::Shutdown => break,
        }
    }

    tracing::info!("Shutting down");
    shutdown.trigger();
    let remaining = shutdown.drain(DRAIN_TIMEOUT).await;
    tracing::info!(remaining, "Shutdown complete");
    Ok(())
}

async fn reload_loop(
    runtime: RouterRuntime,
    current: Arc<std::sync::Mutex<RouterConfig>>,
    mut updates: mpsc::UnboundedReceiver<RouterConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            next = updates.recv() => match next {
                Some(next) => apply_reload(&runtime, &current, next),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}

fn apply_reload(runtime: &RouterRuntime, current: &std::sync::Mutex<RouterConfig>, next: RouterConfig) {
    let mut current = current.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if *current == next {
        return;
    }
    let report = runtime.reload(&current, &next);
    tracing::info!(
        added = report.added.len(),
        updated = report.updated.len(),
        removed = report.removed.len(),
        rejected = report.rejected.len(),
        "Configuration reloaded"
    );
    *current = next;
}
