//! OBD Monitor - Main Entry Point

use anyhow::Result;
use clap::Parser;
use obd_monitor::{init_logging, run_monitor, MonitorOptions};
use obd_session::{ConfiguredTransport, ObdSession, SessionConfig, TransportConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "obd-monitor", version, about = "Live OBD-II data from an ELM327 adapter")]
struct Cli {
    /// Session config file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WiFi adapter address, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// WiFi adapter port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// Simulated vehicle, no adapter needed
    #[arg(long)]
    demo: bool,

    /// Read trouble codes once live data is flowing
    #[arg(long)]
    scan: bool,

    /// Erase trouble codes (after the scan when both are given)
    #[arg(long)]
    clear: bool,

    /// Dashboard period in seconds
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Exit after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// JSON log lines and snapshots
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json)?;

    info!("=== OBD Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let mut config = SessionConfig::load(cli.config.as_deref())?;
    if cli.host.is_some() || cli.port.is_some() {
        let mut tcp = match config.transport {
            TransportConfig::Tcp(tcp) => tcp,
            TransportConfig::Ble(_) => Default::default(),
        };
        if let Some(host) = cli.host {
            tcp.host = host;
        }
        if let Some(port) = cli.port {
            tcp.port = port;
        }
        config.transport = TransportConfig::Tcp(tcp);
    }

    // No platform GATT binding ships with the CLI; demo never opens the link
    if cli.demo && matches!(config.transport, TransportConfig::Ble(_)) {
        config.transport = TransportConfig::default();
    }
    let factory = ConfiguredTransport::new(config.transport.clone(), None)?;
    let session = ObdSession::spawn(config, factory);

    let options = MonitorOptions {
        demo: cli.demo,
        scan: cli.scan,
        clear: cli.clear,
        report_interval: Duration::from_secs(cli.interval.max(1)),
        duration: cli.duration.map(Duration::from_secs),
        json_snapshots: cli.json,
    };
    run_monitor(session, options).await
}
