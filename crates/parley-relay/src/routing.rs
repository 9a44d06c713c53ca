//! Envelope routing.
//!
//! A single [`Router`] drains the shared router queue in FIFO order. For each
//! envelope it:
//! 1. Looks up the recipient in the `ConnectionRegistry`
//! 2. If present: forwards the envelope to the recipient's connection
//! 3. If absent: bounces an error envelope to the sender, or drops the
//!    envelope when the sender is gone too
//!
//! Every failure is terminal for that envelope only: it is logged, counted
//! and dropped. The router itself never fails.
//!
//! # Example
//!
//! ```ignore
//! use parley_relay::routing::Router;
//!
//! let (queue_tx, queue_rx) = tokio::sync::mpsc::channel(256);
//! let router = Router::new(connection_registry);
//! tokio::spawn(router.run(queue_rx));
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::ConnectionHandle;
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::types::Envelope;

/// Result of routing one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Written to the recipient's connection
    Delivered,
    /// Recipient offline; error envelope written to the sender
    Bounced,
    /// Recipient and sender both offline; nobody to tell
    Dropped,
    /// A write to the recipient or sender failed
    WriteFailed,
}

impl RouteOutcome {
    /// Get the outcome name for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Bounced => "bounced",
            Self::Dropped => "dropped",
            Self::WriteFailed => "write_failed",
        }
    }
}

impl std::fmt::Display for RouteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content of the error envelope bounced to a sender.
pub fn not_connected_message(recipient: &str) -> String {
    format!("'{}' is not connected", recipient)
}

/// The single consumer of the router queue.
#[derive(Debug, Clone)]
pub struct Router {
    /// Connection registry for recipient and sender lookup
    connection_registry: Arc<ConnectionRegistry>,
}

impl Router {
    /// Create a new router.
    pub fn new(connection_registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            connection_registry,
        }
    }

    /// Drain `queue` until every sender is gone.
    pub async fn run(self, mut queue: mpsc::Receiver<Envelope>) {
        info!("Router started");
        while let Some(envelope) = queue.recv().await {
            self.route(envelope).await;
        }
        info!("Router queue closed, router stopping");
    }

    /// Route a single envelope.
    #[instrument(
        name = "relay.route",
        skip(self, envelope),
        fields(from = %envelope.from, to = %envelope.to)
    )]
    pub async fn route(&self, envelope: Envelope) -> RouteOutcome {
        let outcome = match self.connection_registry.lookup(&envelope.to) {
            Some(recipient) => self.deliver(&recipient, envelope).await,
            None => self.bounce(envelope).await,
        };

        debug!(outcome = %outcome, "Envelope routed");
        metrics::record_route(outcome.as_str());
        outcome
    }

    async fn deliver(&self, recipient: &ConnectionHandle, envelope: Envelope) -> RouteOutcome {
        match recipient.send(envelope).await {
            Ok(()) => RouteOutcome::Delivered,
            Err(e) => {
                // The recipient's own pipeline will notice the broken
                // connection and unregister it.
                warn!(error = %e, "Failed to deliver envelope, dropping");
                RouteOutcome::WriteFailed
            }
        }
    }

    async fn bounce(&self, envelope: Envelope) -> RouteOutcome {
        debug!("Recipient not connected");

        // The sender may have disconnected after enqueueing.
        let Some(sender) = self.connection_registry.lookup(&envelope.from) else {
            debug!("Sender not connected either, dropping envelope");
            return RouteOutcome::Dropped;
        };

        match sender
            .send(Envelope::error(not_connected_message(&envelope.to)))
            .await
        {
            Ok(()) => RouteOutcome::Bounced,
            Err(e) => {
                warn!(error = %e, "Failed to send error to sender, dropping");
                RouteOutcome::WriteFailed
            }
        }
    }
}
