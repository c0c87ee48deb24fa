// gattlink: command-line front end for the BLE serial link
//
// Encodes payloads into link packets and runs full sessions against a
// simulated peripheral.

mod config;
mod peripheral;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use gattlink_core::{
    link_signals, ChannelKind, FrameEncoder, FrameType, LinkEvent, LinkService,
    NotificationPayload,
};
use peripheral::SimulatedPeripheral;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "gattlink")]
#[command(about = "gattlink: single-peer BLE serial link", long_about = None)]
#[command(version)]
struct Cli {
    /// Log filter (overrides config; RUST_LOG wins over both)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the packets a payload is split into
    Encode {
        text: String,
        /// Largest write the link accepts, header included
        #[arg(short, long)]
        write_size: Option<usize>,
        /// Treat the text as hex-encoded binary
        #[arg(short, long)]
        binary: bool,
    },
    /// Send a string to a simulated peripheral and wait for its echo
    Send { address: String, text: String },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let _guard = init_logging(level, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Encode {
            text,
            write_size,
            binary,
        } => cmd_encode(&config, &text, write_size, binary),
        Commands::Send { address, text } => cmd_send(&config, &address, &text).await,
        Commands::Config { action } => cmd_config(config, action),
    }
}

fn init_logging(level: &str, log_file: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };

    let Some(path) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let name = path.file_name().context("Log file path has no file name")?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

fn cmd_encode(
    config: &config::Config,
    text: &str,
    write_size: Option<usize>,
    binary: bool,
) -> Result<()> {
    let write_size = write_size.unwrap_or(config.link.max_write_size);
    let encoder = FrameEncoder::for_write_size(write_size, config.link.max_payload_len)
        .context("Invalid write size")?;

    let (frame_type, payload) = if binary {
        (
            FrameType::Binary,
            hex::decode(text.trim()).context("Binary payload must be hex")?,
        )
    } else {
        (FrameType::String, text.as_bytes().to_vec())
    };

    let packets = encoder.encode(frame_type, &payload)?;

    println!(
        "{} {} bytes → {} packets ({} payload bytes each)",
        "Frame".bold(),
        payload.len(),
        packets.len(),
        encoder.capacity()
    );
    println!();

    for packet in packets {
        let header = packet.header();
        println!(
            "  {:>3}/{:<3} {:<8} {}",
            header.ordinal.to_string().bright_cyan(),
            header.total,
            format!("{:?}", header.frame_type),
            hex::encode_upper(packet.as_bytes()).bright_yellow()
        );
    }

    Ok(())
}

async fn cmd_send(config: &config::Config, address: &str, text: &str) -> Result<()> {
    let (signals, signal_rx) = link_signals();
    let peripheral = Arc::new(SimulatedPeripheral::new(
        signals,
        &config.link,
        Duration::from_millis(config.write_latency_ms),
    ));
    let service = LinkService::start(config.link.clone(), peripheral, signal_rx)
        .context("Failed to start link service")?;
    let mut events = service.subscribe();

    service.initialize()?;
    let queued = service.send_string(text)?;
    println!("  {} Queued {} packets", "✓".green(), queued);

    service
        .connect(address)
        .with_context(|| format!("Failed to connect to {}", address))?;
    println!("  {} Connecting to {}", "…".dimmed(), address.bright_cyan());

    let deadline = Duration::from_secs(config.response_timeout_secs);
    let mut written = 0usize;
    let mut failed = 0usize;

    let echo = tokio::time::timeout(deadline, async {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Missed {} link events", n);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };

            match event {
                LinkEvent::Connected { address } => {
                    println!("  {} Connected to {}", "✓".green(), address);
                }
                LinkEvent::CapabilitiesDiscovered { services } => {
                    println!("  {} Discovered {} services", "✓".green(), services);
                    if let Err(e) = service.read_characteristic(&config.link.status_uuid) {
                        tracing::warn!("Status read not issued: {}", e);
                    }
                }
                LinkEvent::CapabilityDiscoveryFailed { reason } => {
                    println!("  {} Discovery failed: {}", "✗".red(), reason);
                    return None;
                }
                LinkEvent::WriteCompleted { .. } => written += 1,
                LinkEvent::WriteFailed { ordinal, error, .. } => {
                    failed += 1;
                    println!("  {} Packet {} failed: {}", "✗".red(), ordinal, error);
                }
                LinkEvent::DataAvailable(note) => match (note.kind, note.payload) {
                    (ChannelKind::DeviceData, NotificationPayload::Bytes(data)) => {
                        return Some(data);
                    }
                    (ChannelKind::DeviceStatus, NotificationPayload::Text(status)) => {
                        println!("  {} Peer status: {}", "✓".green(), status.bright_cyan());
                    }
                    (kind, payload) => {
                        println!("  {} {:?}: {:?}", "•".dimmed(), kind, payload);
                    }
                },
                LinkEvent::Disconnected { address } => {
                    println!("  {} Disconnected from {}", "✗".red(), address);
                    return None;
                }
            }
        }
    })
    .await;

    // The echo can overtake the last completions
    if matches!(echo, Ok(Some(_))) && written + failed < queued {
        let settle = Duration::from_millis(config.write_latency_ms.saturating_mul(2).max(50));
        let (late_written, late_failed) =
            settle_write_events(&mut events, queued - written - failed, settle).await;
        written += late_written;
        failed += late_failed;
    }

    service.close();
    println!();
    println!("  Packets written: {}  failed: {}", written, failed);

    match echo {
        Ok(Some(data)) => {
            println!(
                "  {} Echo: {}",
                "✓".green(),
                String::from_utf8_lossy(&data).bright_yellow()
            );
            Ok(())
        }
        Ok(None) => anyhow::bail!("Link ended before the peer echoed the frame"),
        Err(_) => anyhow::bail!(
            "No echo within {}s ({} of {} packets written)",
            config.response_timeout_secs,
            written,
            queued
        ),
    }
}

/// Collect up to `outstanding` write outcomes, giving up after `settle` of
/// silence. Returns (written, failed).
async fn settle_write_events(
    events: &mut broadcast::Receiver<LinkEvent>,
    outstanding: usize,
    settle: Duration,
) -> (usize, usize) {
    let (mut written, mut failed) = (0, 0);
    while written + failed < outstanding {
        match tokio::time::timeout(settle, events.recv()).await {
            Ok(Ok(LinkEvent::WriteCompleted { .. })) => written += 1,
            Ok(Ok(LinkEvent::WriteFailed { ordinal, error, .. })) => {
                failed += 1;
                println!("  {} Packet {} failed: {}", "✗".red(), ordinal, error);
            }
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }
    (written, failed)
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Path => {
            println!("{}", config::Config::config_file()?.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_core::transport::ble::TRANSMIT_CHARACTERISTIC_UUID;
    use gattlink_core::LinkError;

    #[tokio::test]
    async fn test_settle_counts_outcomes_behind_the_echo() {
        let (tx, mut rx) = broadcast::channel(16);
        let channel = TRANSMIT_CHARACTERISTIC_UUID;
        tx.send(LinkEvent::WriteCompleted { channel, ordinal: 3 }).unwrap();
        tx.send(LinkEvent::Connected {
            address: "C0:FF:EE:00:00:01".parse().unwrap(),
        })
        .unwrap();
        tx.send(LinkEvent::WriteFailed {
            channel: Some(channel),
            ordinal: 4,
            error: LinkError::UnexpectedDisconnect,
        })
        .unwrap();
        tx.send(LinkEvent::WriteCompleted { channel, ordinal: 5 }).unwrap();

        let counted = settle_write_events(&mut rx, 2, Duration::from_millis(50)).await;
        assert_eq!(counted, (1, 1));

        // The third outcome is still there for a later reader
        assert!(matches!(
            rx.try_recv(),
            Ok(LinkEvent::WriteCompleted { ordinal: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_settle_gives_up_after_silence() {
        let (_tx, mut rx) = broadcast::channel::<LinkEvent>(4);
        let counted = settle_write_events(&mut rx, 3, Duration::from_millis(20)).await;
        assert_eq!(counted, (0, 0));
    }
}
