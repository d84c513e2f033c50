//! vhost-gateway
//!
//! A TLS-terminating virtual-host gateway built with Tokio, rustls and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                     VHOST GATEWAY                        │
//!                     │                                                          │
//!   Client ───────────┼─▶ net::Listener ──▶ net::tls (SNI → router → bundle)    │
//!                     │                          │                               │
//!                     │                          ▼                               │
//!                     │                  http::server (hyper auto)               │
//!                     │                          │                               │
//!                     │                          ▼                               │
//!                     │             http::dispatcher (Host → virtual host)       │
//!                     │                   │                 │                    │
//!                     │                   ▼                 ▼                    │
//!                     │            http::files        http::proxy ─────────────┼──▶ Upstream
//!                     │                                                          │
//!                     │  ┌────────────────────────────────────────────────────┐  │
//!                     │  │ config + snapshot │ tls store │ access/error log  │  │
//!                     │  │ lifecycle (startup / reload / signals / shutdown)  │  │
//!                     │  └────────────────────────────────────────────────────┘  │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use vhost_gateway::config::{load_config, watcher::ConfigWatcher};
use vhost_gateway::lifecycle::{check_config, spawn_signal_listener, Gateway};
use vhost_gateway::observability::{logging::init_tracing, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "vhost-gateway")]
#[command(about = "TLS-terminating virtual-host gateway", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Validate the configuration and certificates, then exit.
    #[arg(long)]
    check: bool,

    /// Reload automatically when the configuration file changes.
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.check {
        let report = check_config(&cli.config)?;
        println!(
            "configuration ok: {} virtual hosts on ports {:?}, {} certificates",
            report.virtual_hosts, report.ports, report.certificates
        );
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    init_tracing(&config.logging)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vhost-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::start(config, Some(cli.config.clone())).await?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let _signals = spawn_signal_listener(events_tx.clone());

    let _watcher = if cli.watch {
        Some(ConfigWatcher::new(&cli.config, events_tx.clone()).run()?)
    } else {
        None
    };
    drop(events_tx);

    gateway.run(events_rx).await;

    if !gateway.shutdown().await {
        tracing::warn!("Grace period elapsed with connections still open");
    }
    Ok(())
}
