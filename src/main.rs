//! TLS WebSocket Gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────────┐
//!                      │                        WSS GATEWAY                           │
//!                      │                                                              │
//!   Client ────────────┼─▶ net::listener ─▶ bootstrap::driver (one task per conn)    │
//!                      │                        │                                     │
//!                      │                        ▼                                     │
//!                      │   pipeline: [handshake_idle_timer][handshake_timeout_handler]│
//!                      │             [tls_handler]                                    │
//!                      │             [connect_idle_timer][connect_idle_handler]       │
//!                      │             [websocket_upgrade_handler]                      │
//!                      │                        │                                     │
//!                      │                        ▼                                     │
//!                      │              WebSocketSession ─▶ application (echo)          │
//!                      │                                                              │
//!                      │   Cross-cutting: config, observability, lifecycle            │
//!                      └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use wss_gateway::config::loader::load_config;
use wss_gateway::config::GatewayConfig;
use wss_gateway::lifecycle::{self, signals, Shutdown};
use wss_gateway::observability::logging::init_logging;
use wss_gateway::observability::TracingEventLog;

#[derive(Parser, Debug)]
#[command(name = "wss-gateway", version, about = "TLS WebSocket gateway")]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability)?;
    tracing::info!("wss-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    for listener in &config.listeners {
        tracing::info!(
            listener = %listener.name,
            bind_address = %listener.bind_address,
            kind = ?listener.kind,
            handshake_timeout_ms = listener.handshake_timeout_ms(),
            idle_timeout_ms = config.timeouts.idle_ms,
            "Configuration loaded"
        );
    }

    let gateway = lifecycle::start(&config, Arc::new(TracingEventLog)).await?;
    let shutdown = Shutdown::new();

    let mut sessions = gateway.sessions;
    tokio::spawn(async move {
        while let Some(session) = sessions.recv().await {
            tracing::debug!(
                connection_id = %session.id,
                listener = %session.listener,
                subprotocol = session.subprotocol.as_deref().unwrap_or("none"),
                "Session started"
            );
            tokio::spawn(session.echo());
        }
    });

    let mut servers = Vec::with_capacity(gateway.servers.len());
    for server in gateway.servers {
        servers.push(tokio::spawn(server.run(shutdown.clone())));
    }

    signals::wait_for_signal().await;
    shutdown.trigger();

    for server in servers {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Listener failed"),
            Err(e) => tracing::error!(error = %e, "Listener task panicked"),
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
