//! Command-line front end for the blescout engine.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use blescout_core::{
    BtleplugAdapter, CentralManager, ManagerConfig, ManagerEvent, ReadState,
};
use blescout_types::Peripheral;

/// Output format for commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "blescout")]
#[command(author, version, about = "Scan, connect, and read nearby BLE peripherals", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby peripherals
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "4")]
        duration: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to a peripheral and read every readable characteristic
    Read {
        /// Device identifier (MAC address or platform UUID), or use the
        /// BLESCOUT_DEVICE env var
        #[arg(short, long, env = "BLESCOUT_DEVICE")]
        device: String,

        /// Scan duration in seconds while looking for the device
        #[arg(short = 's', long, default_value = "4")]
        scan_duration: u64,

        /// Seconds to wait for all reads to settle
        #[arg(short = 'T', long, default_value = "30")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Scan { duration, format } => cmd_scan(duration, format).await,
        Commands::Read {
            device,
            scan_duration,
            timeout,
        } => cmd_read(&device, scan_duration, timeout).await,
    }
}

/// Build a manager over the system adapter and start its event pump.
async fn setup_manager(
    scan_duration: u64,
) -> Result<(Arc<CentralManager>, CancellationToken)> {
    let adapter = Arc::new(
        BtleplugAdapter::new()
            .await
            .context("no Bluetooth adapter available")?,
    );
    let manager = Arc::new(CentralManager::with_config(
        adapter,
        ManagerConfig::new().scan_duration_secs(scan_duration),
    ));
    manager.start().await.context("adapter failed to start")?;

    let cancel = CancellationToken::new();
    manager.spawn_event_pump(cancel.clone());
    Ok((manager, cancel))
}

/// Run one scan window to completion.
async fn run_scan(manager: &Arc<CentralManager>) -> Result<()> {
    let mut events = manager.events().subscribe();
    manager.start_scan().await?;

    let window = manager.config().scan_duration + Duration::from_secs(5);
    timeout(window, async {
        loop {
            match events.recv().await {
                Ok(ManagerEvent::ScanStopped) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await
    .context("scan never stopped")?;
    Ok(())
}

async fn cmd_scan(duration: u64, format: OutputFormat) -> Result<()> {
    let (manager, cancel) = setup_manager(duration).await?;
    run_scan(&manager).await?;

    let mut rows = manager.not_connected_view().await;
    rows.sort_by(|a, b| b.peripheral.rssi.cmp(&a.peripheral.rssi));

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            println!("Found {} device(s)", rows.len());
            for row in &rows {
                let rssi = row
                    .peripheral
                    .rssi
                    .map_or_else(|| "   ?".to_string(), |r| format!("{r:>4}"));
                println!(
                    "  {}  {} dBm  {}",
                    row.peripheral.id,
                    rssi,
                    row.peripheral.name.as_deref().unwrap_or("(unknown)")
                );
            }
        }
    }

    cancel.cancel();
    Ok(())
}

async fn cmd_read(device: &str, scan_duration: u64, settle_timeout: u64) -> Result<()> {
    let (manager, cancel) = setup_manager(scan_duration).await?;
    run_scan(&manager).await?;

    let peripheral: Peripheral = manager
        .peripherals()
        .await
        .into_iter()
        .find(|p| p.id.eq_ignore_ascii_case(device))
        .with_context(|| format!("device {device} was not discovered"))?;
    debug!(device = %peripheral.id, rssi = ?peripheral.rssi, "target discovered");
    println!("Connecting to {} ...", peripheral.display_name());

    let id = peripheral.id.clone();
    manager.connect(peripheral).await?;

    // The catalog attaches asynchronously after connect.
    let device_snapshot = timeout(Duration::from_secs(15), async {
        loop {
            if let Some(snapshot) = manager.connected_device(&id).await
                && snapshot.is_cataloged()
            {
                return snapshot;
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .context("service catalog never attached; the device may not expose services")?;

    let catalog = device_snapshot
        .catalog()
        .context("device lost its catalog")?;
    println!(
        "Found {} characteristic(s), {} readable",
        catalog.len(),
        catalog.readable_count()
    );

    manager.read_characteristics(&id).await?;

    let session = timeout(Duration::from_secs(settle_timeout), async {
        loop {
            if let Some(session) = manager.current_session().await
                && session.is_settled()
            {
                return session;
            }
            sleep(Duration::from_millis(200)).await;
        }
    })
    .await
    .context("reads did not settle in time")?;

    for (key, state) in session.entries() {
        match state {
            ReadState::Reading => println!("  {key}: still reading"),
            ReadState::Success { data } => println!("  {key}: {data}"),
            ReadState::Error { message } => println!("  {key}: error: {message}"),
        }
    }

    manager
        .disconnect(&id)
        .await
        .with_context(|| format!("failed to disconnect from {id}"))?;
    debug!(device = %id, "disconnect requested");
    cancel.cancel();
    Ok(())
}
