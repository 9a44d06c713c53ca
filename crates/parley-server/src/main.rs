use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_relay::{Limits, RelayConfig, RelayServer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod console;
mod telemetry;

/// Parley direct-message relay server.
#[derive(Debug, Parser)]
#[command(name = "parley-server", version, about)]
struct Args {
    /// TCP port to listen on
    #[arg(env = "PARLEY_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, env = "PARLEY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Capacity of the router queue
    #[arg(long, env = "PARLEY_QUEUE_CAPACITY", default_value_t = parley_relay::server::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Seconds a client has to send its name
    #[arg(long, env = "PARLEY_HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Seconds allowed for a single write to a client
    #[arg(long, env = "PARLEY_WRITE_TIMEOUT_SECS", default_value_t = 5)]
    write_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "PARLEY_LOG_FORMAT", value_enum, default_value_t = telemetry::LogFormat::Pretty)]
    log_format: telemetry::LogFormat,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            listen_addr: SocketAddr::new(self.bind, self.port),
            queue_capacity: self.queue_capacity,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            limits: Limits::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    telemetry::init(args.log_format)
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to initialize logging")?;

    info!("Parley relay starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let config = args.relay_config();
    let server = RelayServer::bind(config)
        .await
        .context("Failed to start relay server")?;
    info!(addr = %server.local_addr()?, "Server started. Type 'exit' to quit");

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(shutdown.clone()));

    tokio::spawn(console::run(
        console::spawn_stdin_reader(),
        shutdown.clone(),
    ));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    server_task
        .await
        .context("Relay server task failed")?
        .context("Relay server stopped with an error")?;

    info!("Parley relay stopped");
    Ok(())
}
