//! Handle to an admitted client connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::codec::EnvelopeCodec;
use crate::types::{Envelope, Limits};
use crate::RelayError;

/// Type-erased write half of a client connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

type EnvelopeWriter = FramedWrite<BoxedWriter, EnvelopeCodec>;

/// Unique identifier of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct HandleInner {
    id: ConnectionId,
    name: String,
    peer_addr: SocketAddr,
    writer: Mutex<EnvelopeWriter>,
    write_timeout: Duration,
    /// Set once a write has timed out; the stream may hold a partial frame.
    broken: AtomicBool,
}

/// A display name paired with the write side of its connection.
///
/// Cheap to clone; the registry, the router and the connection's own
/// pipeline all share the same underlying writer. Writes are serialized so
/// frames from concurrent senders never interleave.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    /// Wrap the write half of an admitted connection.
    pub fn new<W>(
        name: impl Into<String>,
        peer_addr: SocketAddr,
        writer: W,
        limits: Limits,
        write_timeout: Duration,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        Self {
            inner: Arc::new(HandleInner {
                id: ConnectionId::new(),
                name: name.into(),
                peer_addr,
                writer: Mutex::new(FramedWrite::new(writer, EnvelopeCodec::new(limits))),
                write_timeout,
                broken: AtomicBool::new(false),
            }),
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Registered display name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Encode and write one envelope, flushing it to the peer.
    ///
    /// A write that does not finish within the write timeout breaks the
    /// connection: the unsent rest of the frame is discarded, the write side
    /// is shut down, and every later send fails with
    /// [`RelayError::ConnectionBroken`].
    #[instrument(skip(self, envelope), fields(name = %self.inner.name, is_error = envelope.is_error))]
    pub async fn send(&self, envelope: Envelope) -> Result<(), RelayError> {
        let mut writer = self.inner.writer.lock().await;
        if self.is_broken() {
            return Err(RelayError::ConnectionBroken);
        }
        match tokio::time::timeout(self.inner.write_timeout, writer.send(envelope)).await {
            Ok(result) => result.map_err(RelayError::from),
            Err(_) => {
                warn!(timeout = ?self.inner.write_timeout, "Write timed out, abandoning connection");
                self.abandon(&mut writer).await;
                Err(RelayError::WriteTimeout(self.inner.write_timeout))
            }
        }
    }

    /// Whether a timed-out write has made this connection unusable.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::Acquire)
    }

    /// Drop buffered bytes and shut the stream without flushing them.
    async fn abandon(&self, writer: &mut EnvelopeWriter) {
        self.inner.broken.store(true, Ordering::Release);
        writer.write_buffer_mut().clear();
        let shutdown = writer.get_mut().shutdown();
        if let Ok(Err(e)) = tokio::time::timeout(self.inner.write_timeout, shutdown).await {
            debug!(name = %self.inner.name, error = %e, "Error shutting down broken connection");
        }
    }

    /// Flush pending frames and shut down the write side.
    ///
    /// Errors are logged only; the connection is going away either way.
    pub async fn close(&self) {
        let mut writer = self.inner.writer.lock().await;
        if self.is_broken() {
            debug!(name = %self.inner.name, "Connection already abandoned");
            return;
        }
        let close = SinkExt::<Envelope>::close(&mut *writer);
        match tokio::time::timeout(self.inner.write_timeout, close).await {
            Ok(Ok(())) => debug!(name = %self.inner.name, "Connection closed"),
            Ok(Err(e)) => debug!(name = %self.inner.name, error = %e, "Error closing connection"),
            Err(_) => debug!(name = %self.inner.name, "Timed out closing connection"),
        }
    }

    /// Whether two handles refer to the same connection.
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("peer_addr", &self.inner.peer_addr)
            .finish()
    }
}
