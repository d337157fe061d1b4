//! Topology daemon
//!
//! Main entry point for topologyd. Restores the persisted topology, then
//! applies discovery and liveness events from the inbound bus and
//! publishes topology notifications on the outbound bus.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use topo_common::{spawn_handler, EventBus};
use topologyd::config::DEFAULT_CONFIG_PATH;
use topologyd::ingress;
use topologyd::{
    Dispatcher, EngineSettings, JsonFileStore, Notification, Topology, TopologyEvent,
    TopologydConfig,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "topologyd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Snapshot file, overrides `persistence.state_file`
    #[arg(short = 's', long)]
    state_file: Option<PathBuf>,

    /// Link-up debounce window in seconds, overrides config and environment
    #[arg(short = 't', long)]
    link_up_timer: Option<u64>,

    /// Log level, overrides `logging.level`
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Event ingress address, overrides `ingress.listen_addr`
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;
    info!(
        config = %args.config.display(),
        state_file = %config.persistence.state_file.display(),
        link_up_timer_secs = config.topology.link_up_timer_secs,
        "topologyd: Starting topology daemon"
    );

    match run_daemon(config).await {
        Ok(()) => {
            info!("topologyd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "topologyd: Daemon exiting with error");
            Err(e)
        }
    }
}

fn load_config(args: &Args) -> Result<TopologydConfig> {
    let mut config = TopologydConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env_overrides();

    if let Some(path) = &args.state_file {
        config.persistence.state_file = path.clone();
    }
    if let Some(secs) = args.link_up_timer {
        config.topology.link_up_timer_secs = secs;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(addr) = args.listen {
        config.ingress.listen_addr = addr;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(config: &TopologydConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = if config.logging.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))
}

async fn run_daemon(config: TopologydConfig) -> Result<()> {
    let shutdown = setup_signal_handler();

    let store = Arc::new(JsonFileStore::new(&config.persistence.state_file));
    let (topology, notifications) = Topology::new(EngineSettings::from(&config), store);

    let outbound: Arc<EventBus<Notification>> = Arc::new(EventBus::new());
    let forwarder = tokio::spawn(forward_notifications(notifications, outbound.clone()));
    let audit = spawn_audit_log(&outbound)?;

    let report = topology.load_topology().await;
    if !report.store_available {
        warn!("topologyd: Persistence unavailable, running with an empty topology");
    }

    let inbound: Arc<EventBus<TopologyEvent>> = Arc::new(EventBus::new());
    let dispatcher = spawn_handler(inbound.as_ref(), Arc::new(Dispatcher::new(topology.clone())))
        .context("subscribing dispatcher")?;

    let ingress = if config.ingress.enabled {
        let listener = ingress::bind(config.ingress.listen_addr)
            .await
            .with_context(|| format!("binding ingress on {}", config.ingress.listen_addr))?;
        Some(ingress::spawn_ingress(listener, inbound.clone(), shutdown.clone()))
    } else {
        warn!("topologyd: Event ingress disabled, no discovery events will be applied");
        None
    };
    info!(
        subscribers = inbound.subscriber_count(),
        "topologyd: Listening for topology events"
    );

    shutdown.cancelled().await;
    info!("topologyd: Received shutdown signal");

    if let Some(ingress) = ingress {
        if let Err(e) = ingress.await {
            warn!(error = %e, "topologyd: Ingress task failed");
        }
    }
    drop(inbound);
    if let Err(e) = topology.shutdown().await {
        warn!(error = %e, "topologyd: Final snapshot failed");
    }

    dispatcher.abort();
    forwarder.abort();
    audit.abort();
    let _ = futures::future::join_all([dispatcher, forwarder, audit]).await;
    Ok(())
}

/// Publishes engine notifications on the outbound bus, in emission order.
async fn forward_notifications(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Notification>,
    bus: Arc<EventBus<Notification>>,
) {
    while let Some(notification) = rx.recv().await {
        let name = notification.name();
        let delivered = bus.publish(name.clone(), notification);
        debug!(event = %name, delivered, "Notification published");
    }
}

/// Logs link transitions as they are published.
fn spawn_audit_log(bus: &EventBus<Notification>) -> Result<tokio::task::JoinHandle<()>> {
    let mut rx = bus
        .subscribe(&[r"topology\.link_(up|down)", r"topology\.link_status\.changed"])
        .context("subscribing audit log")?;
    Ok(tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match envelope.content {
                Notification::LinkUp { link, reason } | Notification::LinkDown { link, reason } => {
                    info!(event = %envelope.name, link_id = %link.id, reason = %reason, "Link transition");
                }
                Notification::LinkStatusChanged { link, status, reason } => {
                    info!(link_id = %link.id, status = %status, reason = %reason, "Link status changed");
                }
                _ => {}
            }
        }
    }))
}

fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("topologyd: Received SIGINT"),
            Err(e) => error!(error = %e, "topologyd: Failed to listen for SIGINT"),
        }
        trigger.cancel();
    });
    token
}
