// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RDMNet Controller CLI
//!
//! # Usage
//!
//! ```bash
//! # Manage devices given on the command line
//! rdmnet-controller --device 10.0.0.5 --device 10.0.0.6:5569
//!
//! # Using configuration file
//! rdmnet-controller --config controller.toml
//!
//! # Write an example configuration
//! rdmnet-controller gen-config --output controller.toml
//! ```

use clap::{Parser, Subcommand};
use rdmnet_controller::{ControllerConfig, ManagerCallbacks, ManagerStats, TcpTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// RDMNet Controller
#[derive(Parser, Debug)]
#[command(name = "rdmnet-controller")]
#[command(about = "RDMNet controller - manages E1.33 device connections")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device to manage, `ip` or `ip:port` (can repeat)
    #[arg(short, long)]
    device: Vec<String>,

    /// Default device port
    #[arg(short, long)]
    port: Option<u16>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "controller.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("RDMNet Controller v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    for endpoint in config.device_endpoints()? {
        println!("Device: {}", endpoint);
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let callbacks = ManagerCallbacks::new()
        .on_acquire(|addr| info!("Acquired {}", addr))
        .on_release(|addr| info!("Released {}", addr))
        .on_message(|transport, header, payload| {
            info!(
                "Request from {} ({}): seq {}, endpoint {}, {} bytes",
                transport.source(),
                header.source_name(),
                header.sequence(),
                header.endpoint(),
                payload.len()
            );
            true
        });

    let stats_interval = config.stats_interval();
    let (handle, task) = rdmnet_controller::spawn(config, Arc::new(TcpTransport), callbacks)?;

    // Stats reporting task
    if let Some(period) = stats_interval {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                if let Ok(stats) = stats_handle.stats().await {
                    print_stats(&stats);
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    if let Ok(stats) = handle.stats().await {
        println!("\nFinal Statistics:");
        print_stats(&stats);
    }
    handle.shutdown().await?;
    task.await?;

    Ok(())
}

fn build_config(args: &Args) -> Result<ControllerConfig, Box<dyn std::error::Error>> {
    let mut config = match args.config {
        Some(ref path) => ControllerConfig::from_file(path)?,
        None => ControllerConfig::default(),
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(secs) = args.stats_interval {
        config.stats_interval_secs = secs;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }
    for device in &args.device {
        config.add_device(device.clone());
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ControllerConfig {
        source_name: "example-controller".into(),
        stats_interval_secs: 30,
        ..ControllerConfig::default()
    };
    config.add_device("10.0.0.5");
    config.add_device("10.0.0.6:5569");

    let toml_str = toml::to_string_pretty(&config)?;
    let content = format!(
        r#"# RDMNet Controller Configuration
# Generated by rdmnet-controller gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match ControllerConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Source name: {}", config.source_name);
            println!(
                "Retry: {} ms -> {} ms (x{})",
                config.retry_floor_ms, config.retry_ceiling_ms, config.retry_growth_factor
            );
            println!(
                "Heartbeat: every {} ms, timeout {} ms",
                config.heartbeat_interval_ms, config.heartbeat_timeout_ms
            );
            println!("Devices: {}", config.devices.len());
            for (i, endpoint) in config.device_endpoints()?.iter().enumerate() {
                println!("  [{}] {}", i, endpoint);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &ManagerStats) {
    println!("--- Device Statistics ---");
    println!(
        "  {} registered, {} connected, {} designated",
        stats.registered, stats.connected, stats.designated
    );
    println!(
        "  {} promotions, {} releases, {} lost elections, {} heartbeat timeouts",
        stats.promotions, stats.releases, stats.lost_elections, stats.heartbeat_timeouts
    );
    println!(
        "  {} frames ({} PDUs dropped), {} acks ({} dropped), {} connect attempts ({} failed)",
        stats.frames_dispatched,
        stats.frames_dropped,
        stats.requests_acknowledged,
        stats.acks_dropped,
        stats.connect_attempts,
        stats.connection_failures
    );
}
