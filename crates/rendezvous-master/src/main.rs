// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rendezvous Master
//!
//! Standalone master service: keeps the registry of clients, nodes, topics and services and
//! tells subscribers and service clients where to connect.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (8881)
//! rendezvous-master
//!
//! # Custom port and config
//! rendezvous-master --port 9000 --config master.json
//! ```

use clap::Parser;
use rendezvous::{MasterConfig, MasterServer};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rendezvous Master - node discovery for pub/sub and request/reply
#[derive(Parser, Debug)]
#[command(name = "rendezvous-master")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8881")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of registered clients
    #[arg(long, default_value = "1000")]
    max_clients: usize,

    /// Heartbeat periods a client may miss before it is reaped
    #[arg(long, default_value = "3")]
    heart_beat_tolerance: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
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
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        MasterConfig::from_file(&config_path)?
    } else {
        MasterConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            max_clients: args.max_clients,
            heart_beat_tolerance: args.heart_beat_tolerance,
            ..Default::default()
        }
    };

    let server = MasterServer::bind(config).await?;
    let addr = server.local_addr()?;
    let config = server.config();

    info!("+----------------------------------------------------+");
    info!(
        "|       Rendezvous Master v{}                     |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:      {:37} |", addr);
    info!("|  Clients:   {:37} |", format!("max {}", config.max_clients));
    info!(
        "|  Tolerance: {:37} |",
        format!("{} heartbeats", config.heart_beat_tolerance)
    );
    info!("+----------------------------------------------------+");

    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping master...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Master stopped");
    Ok(())
}
