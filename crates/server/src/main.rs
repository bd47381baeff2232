//! usb-ncm-bridge Server
//!
//! Runs the link supervisor, recovery watchdog and packet bridge against a
//! simulated USB host and IP stack, then prints the diagnostic trace.

use anyhow::{Context, Result};
use clap::Parser;
use common::{EventRecorder, LogRingBuffer, setup_logging};
use server::config::{self, ServerConfig};
use server::sim::SimulatedSystem;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-ncm-server")]
#[command(
    author,
    version,
    about = "USB-NCM bridge - link supervision and recovery for USB network devices"
)]
#[command(long_about = "
Runs the USB network-class bridge core: link state controller, recovery
watchdog, packet bridge and diagnostics. The USB host and IP stack are
simulated; the host ignores link-up until it has been re-enumerated, which
exercises the watchdog's detach/reattach recovery.

EXAMPLES:
    # Run until Ctrl+C
    usb-ncm-server

    # Run for ten seconds, then print the event trace
    usb-ncm-server --run-for 10s

    # Run with debug logging
    usb-ncm-server --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-ncm-bridge/server.toml
    3. /etc/usb-ncm-bridge/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Stop after this long (e.g. "10s", "1m30s") instead of waiting for Ctrl+C
    #[arg(long, value_name = "DURATION", value_parser = parse_run_for)]
    run_for: Option<Duration>,
}

fn parse_run_for(s: &str) -> std::result::Result<Duration, String> {
    config::parse_duration(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::load_config(path).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    let diag = &config.diagnostics;
    let logs = Arc::new(LogRingBuffer::new(
        diag.log_capacity,
        diag.log_line_max,
        diag.max_log_readers,
    ));
    let events = Arc::new(EventRecorder::new(diag.event_capacity, diag.event_detail_max));

    setup_logging(log_level, Some(Arc::clone(&logs))).context("Failed to setup logging")?;

    info!("usb-ncm-bridge Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let system = SimulatedSystem::start(&config, events, logs);

    let host = Arc::clone(&system.host);
    tokio::spawn(async move { host.plug_in().await });

    match args.run_for {
        Some(duration) => {
            info!("Running for {:?}", duration);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                result = signal::ctrl_c() => report_signal(result),
            }
        }
        None => {
            info!("Press Ctrl+C to shutdown");
            report_signal(signal::ctrl_c().await);
        }
    }

    print_report(&system);
    system.shutdown();
    Ok(())
}

fn report_signal(result: std::io::Result<()>) {
    match result {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }
}

fn print_report(system: &SimulatedSystem) {
    let diagnostics = &system.diagnostics;

    match diagnostics.events_text() {
        Some(text) => println!("{}", text),
        None => println!("(event recorder busy)"),
    }
    if let Some(json) = diagnostics.status_json() {
        println!("{}", json);
    }
    if let Some(json) = diagnostics.snapshot_json() {
        println!("{}", json);
    }
    println!(
        "Host: {} enumerations, {} detaches, {} frames received",
        system.host.enumerations(),
        system.host.detach_count(),
        system.host.sent_count()
    );
}
