//! Client side of the relay protocol.
//!
//! [`RelayClient`] connects, sends the display name, and then exchanges
//! envelopes. It can be split into a [`RelaySender`] and a
//! [`RelayReceiver`] so reading and writing run in separate tasks.

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, instrument};

use crate::codec::EnvelopeCodec;
use crate::handshake;
use crate::types::{Envelope, Limits};
use crate::RelayError;

/// Write half of a client connection.
pub struct RelaySender {
    writer: FramedWrite<OwnedWriteHalf, EnvelopeCodec>,
}

impl RelaySender {
    /// Send `content` to `to`.
    ///
    /// Over-long recipients or bodies are refused locally and never sent.
    pub async fn send(&mut self, to: &str, content: &str) -> Result<(), RelayError> {
        let envelope = Envelope::message(to, content);
        envelope.validate(self.writer.encoder().limits())?;
        self.send_envelope(envelope).await
    }

    /// Send a fully built envelope.
    pub async fn send_envelope(&mut self, envelope: Envelope) -> Result<(), RelayError> {
        self.writer.send(envelope).await?;
        Ok(())
    }

    /// Shut down the write side.
    pub async fn close(&mut self) -> Result<(), RelayError> {
        SinkExt::<Envelope>::close(&mut self.writer).await?;
        Ok(())
    }
}

/// Read half of a client connection.
pub struct RelayReceiver {
    reader: FramedRead<OwnedReadHalf, EnvelopeCodec>,
}

impl RelayReceiver {
    /// Wait for the next envelope.
    ///
    /// Returns `Ok(None)` when the server closes the connection.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, RelayError> {
        match self.reader.next().await {
            None => Ok(None),
            Some(Ok(envelope)) => Ok(Some(envelope)),
            Some(Err(e)) if e.is_disconnect() => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

/// A connected, named relay client.
pub struct RelayClient {
    name: String,
    sender: RelaySender,
    receiver: RelayReceiver,
}

impl RelayClient {
    /// Connect to `addr` and register as `name`.
    ///
    /// The server does not acknowledge a successful handshake. A taken name
    /// shows up as an error envelope on the first [`recv`](Self::recv),
    /// followed by the connection closing.
    #[instrument(skip(addr, limits))]
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        name: &str,
        limits: Limits,
    ) -> Result<Self, RelayError> {
        handshake::validate_name(name, &limits)?;

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();

        handshake::write_name(&mut write_half, name, &limits).await?;
        debug!("Handshake sent");

        Ok(Self {
            name: name.to_string(),
            sender: RelaySender {
                writer: FramedWrite::new(write_half, EnvelopeCodec::new(limits)),
            },
            receiver: RelayReceiver {
                reader: FramedRead::new(read_half, EnvelopeCodec::new(limits)),
            },
        })
    }

    /// The name this client registered with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `content` to `to`.
    pub async fn send(&mut self, to: &str, content: &str) -> Result<(), RelayError> {
        self.sender.send(to, content).await
    }

    /// Send a fully built envelope.
    pub async fn send_envelope(&mut self, envelope: Envelope) -> Result<(), RelayError> {
        self.sender.send_envelope(envelope).await
    }

    /// Wait for the next envelope.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, RelayError> {
        self.receiver.recv().await
    }

    /// Split into independent send and receive halves.
    pub fn split(self) -> (RelaySender, RelayReceiver) {
        (self.sender, self.receiver)
    }
}
