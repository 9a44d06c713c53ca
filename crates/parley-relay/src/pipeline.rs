//! Inbound pipeline: one per admitted connection.
//!
//! Decodes envelopes from the connection, enforces size limits, stamps the
//! authoritative sender name and pushes the result onto the router queue.
//! When the read loop ends for any reason the connection is closed and its
//! name released.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::codec::{CodecError, EnvelopeCodec};
use crate::connection::ConnectionHandle;
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::types::{Envelope, LimitViolation, Limits};

/// Why a pipeline stopped reading.
#[derive(Debug)]
pub enum PipelineExit {
    /// The peer closed the connection
    PeerClosed,
    /// Read error on the transport
    Transport(std::io::Error),
    /// Frame that could not be decoded
    Malformed(CodecError),
    /// Recipient or body over the size limit
    LimitExceeded(LimitViolation),
    /// Router queue closed; the server is stopping
    QueueClosed,
    /// Process-wide shutdown
    Shutdown,
}

impl PipelineExit {
    fn from_codec_error(error: CodecError) -> Self {
        match error {
            CodecError::Limit(violation) => Self::LimitExceeded(violation),
            e if e.is_disconnect() => Self::PeerClosed,
            CodecError::Io(e) => Self::Transport(e),
            e => Self::Malformed(e),
        }
    }

    /// Whether the peer was dropped for breaking the protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Malformed(_) | Self::LimitExceeded(_))
    }
}

impl fmt::Display for PipelineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Malformed(e) => write!(f, "malformed frame: {}", e),
            Self::LimitExceeded(v) => write!(f, "{}", v),
            Self::QueueClosed => write!(f, "router queue closed"),
            Self::Shutdown => write!(f, "server shutting down"),
        }
    }
}

/// Read loop for one admitted connection.
pub struct InboundPipeline<R> {
    handle: ConnectionHandle,
    reader: FramedRead<R, EnvelopeCodec>,
    queue: mpsc::Sender<Envelope>,
    registry: Arc<ConnectionRegistry>,
    limits: Limits,
    shutdown: CancellationToken,
}

impl<R: AsyncRead + Unpin> InboundPipeline<R> {
    /// Create a pipeline reading envelopes from `reader`.
    pub fn new(
        handle: ConnectionHandle,
        reader: R,
        queue: mpsc::Sender<Envelope>,
        registry: Arc<ConnectionRegistry>,
        limits: Limits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handle,
            reader: FramedRead::new(reader, EnvelopeCodec::new(limits)),
            queue,
            registry,
            limits,
            shutdown,
        }
    }

    /// Run until the connection ends, then close it and release its name.
    #[instrument(
        name = "relay.pipeline",
        skip(self),
        fields(
            name = %self.handle.name(),
            id = %self.handle.id(),
            peer = %self.handle.peer_addr()
        )
    )]
    pub async fn run(mut self) -> PipelineExit {
        let exit = self.read_loop().await;

        if exit.is_protocol_violation() {
            warn!(reason = %exit, "Disconnecting client for protocol violation");
            metrics::record_protocol_violation("pipeline");
        } else if let PipelineExit::Transport(_) = exit {
            warn!(reason = %exit, "Connection failed");
        }

        self.handle.close().await;
        self.registry
            .unregister_connection(self.handle.name(), self.handle.id());
        info!(reason = %exit, "User disconnected or kicked");

        exit
    }

    async fn read_loop(&mut self) -> PipelineExit {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return PipelineExit::Shutdown,
                next = self.reader.next() => next,
            };

            let mut envelope = match next {
                None => return PipelineExit::PeerClosed,
                Some(Err(e)) => return PipelineExit::from_codec_error(e),
                Some(Ok(envelope)) => envelope,
            };

            if let Err(violation) = envelope.validate(&self.limits) {
                return PipelineExit::LimitExceeded(violation);
            }

            // The server is authoritative for sender identity, and only the
            // server may originate diagnostics.
            envelope.from = self.handle.name().to_string();
            envelope.is_error = false;

            debug!(to = %envelope.to, len = envelope.content.len(), "Queueing envelope");

            // Awaits while the queue is full; never drops.
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return PipelineExit::Shutdown,
                sent = self.queue.send(envelope) => {
                    if sent.is_err() {
                        return PipelineExit::QueueClosed;
                    }
                }
            }
        }
    }
}
