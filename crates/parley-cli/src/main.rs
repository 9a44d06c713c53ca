// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2025 Parley

//! Parley CLI - terminal client for the Parley direct-message relay.

use std::io::BufReader;

use anyhow::{Context, Result};
use clap::Parser;
use parley_relay::{handshake, Limits, RelayClient, RelayError, RelayReceiver};
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod command;
mod render;

use command::{Command, SEND_USAGE, UNRECOGNIZED};

/// Parley CLI - chat with other users connected to a relay
#[derive(Debug, Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Relay host name or IP address
    host: String,

    /// Relay TCP port
    port: u16,

    /// Display name to register with (at most 32 bytes)
    username: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr and stay quiet unless RUST_LOG asks for more.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let limits = Limits::default();
    if let Err(e) = handshake::validate_name(&cli.username, &limits) {
        let message = match e {
            RelayError::EmptyName => "Username cannot be empty".to_string(),
            _ => format!(
                "Username cannot be more than {} characters",
                limits.max_name_len()
            ),
        };
        println!("{}", render::error(&message));
        return Ok(());
    }

    info!(host = %cli.host, port = cli.port, "Connecting to relay");
    let client = RelayClient::connect((cli.host.as_str(), cli.port), &cli.username, limits)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", cli.host, cli.port))?;

    println!("Connected with username {}", render::name(client.name()));

    let (mut sender, receiver) = client.split();
    let mut receive_task = tokio::spawn(receive_messages(receiver));
    let mut commands = command::spawn_reader(BufReader::new(std::io::stdin()), limits);

    loop {
        let command = tokio::select! {
            _ = &mut receive_task => return Ok(()),
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            debug!("Standard input closed");
            break;
        };

        match command {
            Command::Exit => break,
            Command::Send { to, content } => {
                if let Err(e) = sender.send(&to, &content).await {
                    println!("{}", render::error(&format!("Failed to send message: {}", e)));
                    break;
                }
            }
            Command::Usage => println!("{}", SEND_USAGE),
            Command::Invalid(message) => println!("{}", render::error(&message)),
            Command::Empty => {}
            Command::Unrecognized => println!("{}", UNRECOGNIZED),
        }
    }

    if let Err(e) = sender.close().await {
        debug!(error = %e, "Error closing connection");
    }
    receive_task.abort();
    Ok(())
}

/// Print envelopes until the server closes the connection.
async fn receive_messages(mut receiver: RelayReceiver) {
    loop {
        match receiver.recv().await {
            Ok(Some(envelope)) => println!("{}", render::envelope(&envelope)),
            Ok(None) => {
                println!("{}", render::error("Disconnected from server"));
                return;
            }
            Err(e) => {
                warn!(error = %e, "Connection error");
                println!("{}", render::error(&format!("Connection error: {}", e)));
                return;
            }
        }
    }
}
