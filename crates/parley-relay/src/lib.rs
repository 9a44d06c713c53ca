//! # parley-relay
//!
//! Direct-message relay library for Parley.
//!
//! Clients connect over TCP, announce a unique display name, and then exchange
//! short text envelopes addressed to other connected names. The server stamps
//! the sender on every envelope and reports undeliverable ones back to the
//! sender as error envelopes.
//!
//! ## Architecture
//!
//! - **Codec**: length-prefixed binary envelope frames ([`EnvelopeCodec`])
//! - **Admission**: reads the name handshake and claims the name
//!   ([`AdmissionHandler`])
//! - **Registry**: concurrent name to connection map ([`ConnectionRegistry`])
//! - **Inbound pipeline**: one per connection, decodes and enqueues
//!   ([`InboundPipeline`])
//! - **Router**: single consumer of the shared queue ([`Router`])
//!
//! ```text
//! client --TCP--> AdmissionHandler --register--> ConnectionRegistry
//!                        |                               ^
//!                        v                               | lookup
//!                 InboundPipeline --mpsc(256)--> Router -+--> recipient
//! ```

pub mod admission;
pub mod client;
pub mod codec;
pub mod connection;
pub mod handshake;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod routing;
pub mod server;

mod error;
mod types;

pub use admission::{AdmissionHandler, NAME_TAKEN};
pub use client::{RelayClient, RelayReceiver, RelaySender};
pub use codec::{CodecError, EnvelopeCodec};
pub use connection::{ConnectionHandle, ConnectionId};
pub use error::RelayError;
pub use pipeline::{InboundPipeline, PipelineExit};
pub use registry::ConnectionRegistry;
pub use routing::{RouteOutcome, Router};
pub use server::{RelayConfig, RelayServer};
pub use types::*;

/// Bind the configured address and run the relay until `shutdown_token` is
/// cancelled.
///
/// This is the main entry point for embedding the relay in a binary.
pub async fn start(
    config: RelayConfig,
    shutdown_token: tokio_util::sync::CancellationToken,
) -> Result<(), RelayError> {
    RelayServer::bind(config).await?.run(shutdown_token).await
}
