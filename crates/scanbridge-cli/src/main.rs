//! Scanner bridge command line.
//!
//! # Usage
//!
//! ```bash
//! # Run the bridge from a profile
//! scanbridge run --profile line4.json
//!
//! # Look for a scanner on the inspection LAN
//! scanbridge discover --side bottom
//!
//! # Check that a scanner accepts TCP connections
//! scanbridge probe 10.0.0.5 --side top
//! ```
//!
//! Events are written to stdout as one JSON object per line. Logs go to
//! stderr and are filtered with `RUST_LOG`.

mod supervisor;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scanbridge_core::{BridgeConfig, BridgeEvent, EventSink, ScannerAddress, ScannerLink, ScannerRole};
use scanbridge_hardware::SerialPortConfig;
use scanbridge_network::{DiscoveryConfig, DiscoveryError, DiscoveryService, ProbeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::supervisor::BridgeSupervisor;

/// Time given to workers to close their sockets and ports on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "scanbridge", version)]
#[command(about = "Forward barcodes from LAN scanners to an inspection machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect the configured scanners and forward their barcodes
    Run {
        /// Bridge profile (JSON)
        #[arg(short, long)]
        profile: PathBuf,
    },
    /// Broadcast a discovery query and report the first scanner that answers
    Discover {
        /// Which scanner the result is reported for
        #[arg(short, long, default_value = "bottom")]
        side: ScannerRole,

        /// Local address to listen on
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Broadcast address the query is sent to
        #[arg(long)]
        target: Option<SocketAddr>,
    },
    /// Check whether a scanner accepts TCP connections
    Probe {
        /// Scanner IP address or host name
        host: String,

        /// TCP port; defaults to the side's usual port
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long, default_value = "bottom")]
        side: ScannerRole,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { profile } => run_bridge(profile).await,
        Command::Discover { side, bind, target } => discover(side, bind, target).await,
        Command::Probe { host, port, side } => probe(host, port.unwrap_or_else(|| side.default_port())).await,
    }
}

async fn run_bridge(profile: PathBuf) -> Result<()> {
    let config = BridgeConfig::load(&profile)
        .with_context(|| format!("failed to load profile {}", profile.display()))?;
    let output = config.output.validate().context("invalid output section")?;

    let mut supervisor = BridgeSupervisor::new();
    info!(device = %output, "Forwarding to inspection machine");
    supervisor.spawn_serial_output(SerialPortConfig::new(output));

    for role in ScannerRole::ALL {
        let Some(section) = config.endpoint(role) else {
            info!(%role, "Scanner not configured");
            continue;
        };
        // An invalid section disables that side only.
        let endpoint = match section.validate(role) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(%role, error = %e, "Scanner disabled");
                continue;
            }
        };
        match endpoint.link {
            ScannerLink::Ethernet(address) => {
                info!(%role, %address, model = %endpoint.model, "Scanner configured");
                supervisor.spawn_scanner(role, address);
            }
            ScannerLink::Rs232(settings) => {
                warn!(%role, device = %settings, "RS-232 scanners are not read by this bridge, skipping");
            }
        }
    }

    let mut bridge = supervisor.start();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            event = bridge.recv() => match event {
                Some(event) => print_event(&event)?,
                None => {
                    info!("All workers finished");
                    break;
                }
            },
        }
    }

    let report = bridge.shutdown(SHUTDOWN_GRACE).await;
    if report.panicked > 0 {
        anyhow::bail!("{} worker(s) panicked", report.panicked);
    }
    Ok(())
}

async fn discover(side: ScannerRole, bind: Option<SocketAddr>, target: Option<SocketAddr>) -> Result<()> {
    let mut config = DiscoveryConfig::default();
    if let Some(bind) = bind {
        config = config.with_bind_addr(bind);
    }
    if let Some(target) = target {
        config = config.with_target(target);
    }

    let service = DiscoveryService::bind(config)
        .with_context(|| format!("failed to open discovery socket on {}", config.bind_addr))?;
    let (events, mut rx) = EventSink::channel();
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    info!(%side, target = %config.target, "Discovering scanner");
    match service.discover(side, &events, &cancel).await {
        Ok(_) | Err(DiscoveryError::Cancelled) => {}
        Err(e) => warn!(error = %e, "Discovery failed"),
    }

    drop(events);
    while let Some(event) = rx.recv().await {
        print_event(&event)?;
    }
    Ok(())
}

async fn probe(host: String, port: u16) -> Result<()> {
    let address = ScannerAddress::new(host, port).context("invalid scanner address")?;
    let (events, mut rx) = EventSink::channel();

    let reachable = scanbridge_network::probe(address.clone(), ProbeConfig::default())
        .report(&events)
        .await;
    info!(%address, reachable, "Probe finished");

    drop(events);
    while let Some(event) = rx.recv().await {
        print_event(&event)?;
    }
    Ok(())
}

fn print_event(event: &BridgeEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("failed to encode event")?;
    println!("{line}");
    Ok(())
}
