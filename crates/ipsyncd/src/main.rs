//! ipsyncd entry point.
//!
//! Loads the configuration, builds the engine on top of the kernel
//! transport and the software switch model, and runs the monitor loop until
//! SIGINT.

use anyhow::Context;
use clap::Parser;
use ipstack_hw::SoftSwitch;
use ipsyncd::config::DEFAULT_CONFIG_PATH;
use ipsyncd::netlink::{KernelEventSource, KernelTransport};
use ipsyncd::{IpsyncConfig, MonitorLoop, SyncEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ipsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level; overrides the configuration file, RUST_LOG overrides both
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Run one full resync, print the status tables as JSON and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = IpsyncConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level)?;

    info!(config = %args.config.display(), "ipsyncd: Starting IP stack synchronization daemon");

    match run_daemon(args.once, config).await {
        Ok(()) => {
            info!("ipsyncd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ipsyncd: Daemon exiting with error");
            Err(e)
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level {:?}", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to set logger: {}", e))
}

async fn run_daemon(once: bool, config: IpsyncConfig) -> anyhow::Result<()> {
    let hw = Arc::new(SoftSwitch::new(
        config.hardware.soft_switch(config.interfaces.base_mac),
    ));
    let transport = Arc::new(KernelTransport::new(&config.netlink));
    let engine = Arc::new(SyncEngine::new(transport, hw, &config));

    if config.routing.enable {
        if let Err(e) = engine.routing_enable(true) {
            warn!(error = %e, "ipsyncd: Failed to enable routing");
        }
    }

    if once {
        engine.full_resync().context("full resync")?;
        let snapshot = serde_json::to_string_pretty(&engine.status_snapshot())?;
        println!("{}", snapshot);
        return Ok(());
    }

    let shutdown = setup_signal_handlers();
    let source = KernelEventSource::new(&config.netlink);
    let mut monitor = MonitorLoop::new(source, Arc::clone(&engine), &config.netlink);

    info!("ipsyncd: Listening to kernel events...");
    tokio::task::spawn_blocking(move || monitor.run(&shutdown))
        .await
        .context("monitor task panicked")?;

    let global = engine.global_notification();
    if global.hw_routing_table_depleted {
        warn!("ipsyncd: Hardware route table was depleted during this run");
    }
    info!("ipsyncd: Graceful shutdown complete");
    Ok(())
}

fn setup_signal_handlers() -> Arc<AtomicBool> {
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ipsyncd: Received SIGINT");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }
    });

    shutdown_flag
}
