//! Roster Daemon - Main entry point
//!
//! Keeps the roster of devices on the local network up to date and serves
//! it over a REST API and WebSocket.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "roster")]
#[command(about = "Local network device discovery and roster daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "roster.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single sweep, print the roster and exit
    #[arg(long)]
    scan_once: bool,

    /// Subnet prefix to sweep, e.g. 192.168.1 (repeatable, overrides config)
    #[arg(long = "subnet")]
    subnets: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Roster v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if !args.subnets.is_empty() {
        config.discovery.subnets = args.subnets;
    }

    info!(
        subnets = ?config.discovery.subnets,
        range = %format!("{}-{}", config.scan.start_octet, config.scan.end_octet),
        concurrency = config.scan.max_concurrent_connections,
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone()).await?;

    if args.scan_once {
        info!("Running single sweep");
        let devices = state.scanner.scan_network().await;
        let online = devices.iter().filter(|d| d.is_online).count();
        println!("{} devices, {} online:", devices.len(), online);
        for device in devices.iter().filter(|d| d.is_online) {
            println!(
                "  - {} at {} [{}] {} ({} ms)",
                device.name,
                device.address,
                device.mac_address,
                device.device_type,
                device.response_time.as_millis()
            );
        }
        state.persist().await?;
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}
