//! Relay server implementation.
//!
//! The server accepts TCP connections, runs admission and an inbound
//! pipeline for each one in its own task, and owns the single router task
//! that drains the shared queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::admission::AdmissionHandler;
use crate::pipeline::InboundPipeline;
use crate::registry::ConnectionRegistry;
use crate::routing::Router;
use crate::types::{Envelope, Limits};
use crate::RelayError;

/// Default capacity of the router queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to listen on (default: 0.0.0.0:4000)
    pub listen_addr: SocketAddr,
    /// Router queue capacity; a full queue blocks senders (default: 256)
    pub queue_capacity: usize,
    /// Time allowed for a client to send its name (default: 10s)
    pub handshake_timeout: Duration,
    /// Time allowed for a single write to a client (default: 5s)
    pub write_timeout: Duration,
    /// Name and body size limits
    pub limits: Limits,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            limits: Limits::default(),
        }
    }
}

impl RelayConfig {
    /// Check values that would make the server unusable.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.queue_capacity == 0 {
            return Err(RelayError::config("queue capacity must be at least 1"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(RelayError::config("handshake timeout must be non-zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(RelayError::config("write timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Relay server instance.
pub struct RelayServer {
    config: RelayConfig,
    listener: TcpListener,
    connection_registry: Arc<ConnectionRegistry>,
}

impl RelayServer {
    /// Bind the listen address.
    ///
    /// Fails on an invalid configuration or an unbindable address.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr).await.map_err(|e| {
            RelayError::config(format!("Failed to bind {}: {}", config.listen_addr, e))
        })?;
        Ok(Self::with_listener(config, listener))
    }

    /// Create a server on an already-bound listener.
    ///
    /// `config.listen_addr` is ignored.
    pub fn with_listener(config: RelayConfig, listener: TcpListener) -> Self {
        Self {
            config,
            listener,
            connection_registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Get the address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get the connection registry.
    pub fn connection_registry(&self) -> &Arc<ConnectionRegistry> {
        &self.connection_registry
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// On shutdown the listener stops, every registered connection is
    /// closed, and the call returns once all connection tasks and the
    /// router have finished.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RelayError> {
        let Self {
            config,
            listener,
            connection_registry,
        } = self;
        config.validate()?;

        let (queue_tx, queue_rx) = mpsc::channel::<Envelope>(config.queue_capacity);
        let router = Router::new(Arc::clone(&connection_registry));
        let router_handle = tokio::spawn(router.run(queue_rx));

        let admission = AdmissionHandler::new(
            Arc::clone(&connection_registry),
            config.limits,
            config.handshake_timeout,
            config.write_timeout,
        );
        let tracker = TaskTracker::new();

        info!(
            addr = %listener.local_addr()?,
            queue_capacity = config.queue_capacity,
            "Relay listening for connections"
        );

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let session = ConnectionSession {
                admission: admission.clone(),
                queue: queue_tx.clone(),
                registry: Arc::clone(&connection_registry),
                limits: config.limits,
                shutdown: shutdown.child_token(),
            };

            tracker.spawn(
                session
                    .run(stream, peer_addr)
                    .instrument(info_span!("relay.connection", client_ip = %peer_addr)),
            );
        }

        info!("Shutting down relay");
        drop(listener);
        drop(queue_tx);
        tracker.close();

        let closed = connection_registry.close_all().await;
        tracker.wait().await;

        if let Err(e) = router_handle.await {
            return Err(RelayError::internal(format!("Router task failed: {}", e)));
        }

        info!(closed_connections = closed, "Relay stopped");
        Ok(())
    }
}

/// Everything one connection task needs.
struct ConnectionSession {
    admission: AdmissionHandler,
    queue: mpsc::Sender<Envelope>,
    registry: Arc<ConnectionRegistry>,
    limits: Limits,
    shutdown: CancellationToken,
}

impl ConnectionSession {
    async fn run(self, stream: TcpStream, peer_addr: SocketAddr) {
        debug!("New connection");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();

        let admitted = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            admitted = self.admission.admit(read_half, write_half, peer_addr) => admitted,
        };

        let (handle, read_half) = match admitted {
            Ok(admitted) => admitted,
            Err(e) => {
                debug!(error = %e, "Connection not admitted");
                return;
            }
        };

        InboundPipeline::new(
            handle,
            read_half,
            self.queue,
            self.registry,
            self.limits,
            self.shutdown,
        )
        .run()
        .await;
    }
}
