//! Admission: the connect-time handshake and name uniqueness check.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument, warn};

use crate::connection::ConnectionHandle;
use crate::handshake;
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::types::{Envelope, Limits};
use crate::RelayError;

/// Content of the error envelope sent when a name is already held.
pub const NAME_TAKEN: &str = "Username is taken";

/// Performs the handshake for raw incoming connections.
#[derive(Debug, Clone)]
pub struct AdmissionHandler {
    registry: Arc<ConnectionRegistry>,
    limits: Limits,
    handshake_timeout: Duration,
    write_timeout: Duration,
}

impl AdmissionHandler {
    /// Create a new admission handler.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        limits: Limits,
        handshake_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            limits,
            handshake_timeout,
            write_timeout,
        }
    }

    /// Admit one connection.
    ///
    /// On success the connection is registered and its handle is returned
    /// together with the read half, which now belongs to the caller's
    /// inbound pipeline.
    ///
    /// On failure both halves are dropped, closing the connection:
    /// - a bad or late handshake gets no response at all;
    /// - a taken name gets one [`NAME_TAKEN`] error envelope first.
    #[instrument(
        name = "relay.admission",
        skip(self, reader, writer),
        fields(peer = %peer_addr, name = tracing::field::Empty)
    )]
    pub async fn admit<R, W>(
        &self,
        mut reader: R,
        writer: W,
        peer_addr: SocketAddr,
    ) -> Result<(ConnectionHandle, R), RelayError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = match tokio::time::timeout(
            self.handshake_timeout,
            handshake::read_name(&mut reader, &self.limits),
        )
        .await
        {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                if e.is_protocol_violation() {
                    warn!(error = %e, "Rejected handshake");
                    metrics::record_protocol_violation("handshake");
                    metrics::record_admission("violation");
                } else {
                    debug!(error = %e, "Handshake failed");
                    metrics::record_admission("failed");
                }
                return Err(e);
            }
            Err(_) => {
                debug!(timeout = ?self.handshake_timeout, "Handshake timed out");
                metrics::record_admission("timeout");
                return Err(RelayError::HandshakeTimeout(self.handshake_timeout));
            }
        };

        tracing::Span::current().record("name", name.as_str());

        let handle = ConnectionHandle::new(
            name.clone(),
            peer_addr,
            writer,
            self.limits,
            self.write_timeout,
        );

        if !self.registry.register(handle.clone()) {
            info!("Rejected connection, username is taken");
            if let Err(e) = handle.send(Envelope::error(NAME_TAKEN)).await {
                debug!(error = %e, "Failed to send name-taken error");
            }
            handle.close().await;
            metrics::record_admission("taken");
            return Err(RelayError::NameTaken(name));
        }

        info!(id = %handle.id(), "User connected");
        metrics::record_admission("accepted");
        Ok((handle, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    use crate::codec::EnvelopeCodec;

    fn handler(registry: Arc<ConnectionRegistry>) -> AdmissionHandler {
        AdmissionHandler::new(
            registry,
            Limits::default(),
            Duration::from_millis(200),
            Duration::from_secs(1),
        )
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_admit_registers_name() {
        let registry = Arc::new(ConnectionRegistry::new());
        let admission = handler(Arc::clone(&registry));

        let mut input: &[u8] = b"\x05alice";
        let (handle, _reader) = admission
            .admit(&mut input, tokio::io::sink(), addr())
            .await
            .unwrap();

        assert_eq!(handle.name(), "alice");
        assert!(registry.lookup("alice").unwrap().same_connection(&handle));
    }

    #[tokio::test]
    async fn test_admit_duplicate_sends_error_and_keeps_first() {
        let registry = Arc::new(ConnectionRegistry::new());
        let admission = handler(Arc::clone(&registry));

        let mut first_input: &[u8] = b"\x05alice";
        let (first, _) = admission
            .admit(&mut first_input, tokio::io::sink(), addr())
            .await
            .unwrap();

        let (client, server) = tokio::io::duplex(256);
        let mut second_input: &[u8] = b"\x05alice";
        let err = admission
            .admit(&mut second_input, server, addr())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NameTaken(ref n) if n == "alice"));

        let mut reader = FramedRead::new(client, EnvelopeCodec::default());
        let envelope = reader.next().await.unwrap().unwrap();
        assert!(envelope.is_error);
        assert_eq!(envelope.content, NAME_TAKEN);
        assert!(reader.next().await.is_none());

        assert!(registry.lookup("alice").unwrap().same_connection(&first));
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_admit_oversized_name_is_silent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let admission = handler(Arc::clone(&registry));

        let (client, server) = tokio::io::duplex(256);
        let mut input = vec![33u8];
        input.extend_from_slice(&[b'a'; 33]);
        let mut input: &[u8] = &input;

        let err = admission.admit(&mut input, server, addr()).await.unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(registry.connection_count(), 0);

        // Nothing was written before the writer was dropped.
        let mut reader = FramedRead::new(client, EnvelopeCodec::default());
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_admit_name_of_max_len() {
        let registry = Arc::new(ConnectionRegistry::new());
        let admission = handler(Arc::clone(&registry));

        let name = "n".repeat(32);
        let mut input = vec![32u8];
        input.extend_from_slice(name.as_bytes());
        let mut input: &[u8] = &input;

        let (handle, _) = admission
            .admit(&mut input, tokio::io::sink(), addr())
            .await
            .unwrap();
        assert_eq!(handle.name(), name);
    }

    #[tokio::test]
    async fn test_admit_times_out() {
        let registry = Arc::new(ConnectionRegistry::new());
        let admission = handler(Arc::clone(&registry));

        // Length byte sent, name never arrives.
        let (mut client, server) = tokio::io::duplex(64);
        client.write_u8(5).await.unwrap();

        let err = admission
            .admit(server, tokio::io::sink(), addr())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::HandshakeTimeout(_)));
        assert_eq!(registry.connection_count(), 0);
    }
}
