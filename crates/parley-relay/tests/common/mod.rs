//! Test utilities for relay integration testing.
//!
//! Provides helpers for starting test servers and for driving connections
//! either through [`RelayClient`] or as raw byte streams.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_relay::{
    ConnectionRegistry, Envelope, Limits, RelayClient, RelayConfig, RelayError, RelayServer,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize tracing once for the whole test binary.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "parley_relay=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Test server handle.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<(), RelayError>>>,
}

impl TestServer {
    /// Start a test relay on an available port.
    pub async fn start() -> Self {
        Self::start_with_config(RelayConfig::default()).await
    }

    /// Start a test relay with a custom configuration.
    ///
    /// The listen address in `config` is ignored.
    pub async fn start_with_config(config: RelayConfig) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let server = RelayServer::with_listener(config, listener);
        let registry = Arc::clone(server.connection_registry());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        Self {
            addr,
            registry,
            shutdown,
            task: Some(task),
        }
    }

    /// Connect and register as `name`.
    ///
    /// Waits until the registry shows the name so that messages sent right
    /// after this returns can be routed.
    pub async fn client(&self, name: &str) -> RelayClient {
        let client = RelayClient::connect(self.addr, name, Limits::default())
            .await
            .expect("Failed to connect to test server");
        self.wait_for(|registry| registry.is_connected(name)).await;
        client
    }

    /// Open a raw TCP connection with no handshake sent.
    pub async fn raw(&self) -> RawConnection {
        RawConnection::connect(self.addr)
            .await
            .expect("Failed to connect to test server")
    }

    /// Poll the registry until `condition` holds or [`DEFAULT_TIMEOUT`]
    /// elapses.
    pub async fn wait_for<F>(&self, condition: F)
    where
        F: Fn(&ConnectionRegistry) -> bool,
    {
        timeout(DEFAULT_TIMEOUT, async {
            while !condition(&self.registry) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Timed out waiting for registry condition");
    }

    /// Cancel the server and wait for it to finish.
    pub async fn shutdown(mut self) -> Result<(), RelayError> {
        self.shutdown.cancel();
        let task = self.task.take().expect("server task already taken");
        timeout(DEFAULT_TIMEOUT, task)
            .await
            .expect("Server did not stop in time")
            .expect("Server task panicked")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A connection driven byte by byte, for malformed-input tests.
pub struct RawConnection {
    stream: TcpStream,
}

impl RawConnection {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Write raw bytes.
    pub async fn send(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    /// Send a handshake with an arbitrary length byte and payload.
    pub async fn send_handshake(&mut self, name: &[u8]) -> std::io::Result<()> {
        let mut frame = Vec::with_capacity(name.len() + 1);
        frame.push(name.len() as u8);
        frame.extend_from_slice(name);
        self.send(&frame).await
    }

    /// Whether the server closes the connection within [`DEFAULT_TIMEOUT`].
    ///
    /// A reset counts as closed; the server may drop the socket with
    /// unread bytes still queued.
    pub async fn is_closed_by_server(&mut self) -> bool {
        let mut buf = [0u8; 256];
        match timeout(DEFAULT_TIMEOUT, async {
            loop {
                match self.stream.read(&mut buf).await {
                    Ok(0) => return true,
                    Ok(_) => continue,
                    Err(_) => return true,
                }
            }
        })
        .await
        {
            Ok(closed) => closed,
            Err(_) => false,
        }
    }

    /// Read whatever arrives until the server closes the connection.
    pub async fn read_to_close(&mut self) -> Vec<u8> {
        let mut received = Vec::new();
        let _ = timeout(DEFAULT_TIMEOUT, self.stream.read_to_end(&mut received)).await;
        received
    }
}

/// Encode a frame the way a well-behaved client would, with explicit field
/// bytes so tests can build frames the codec refuses to encode.
pub fn raw_frame(flags: u8, to: &[u8], from: &[u8], content: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + to.len() + from.len() + content.len());
    frame.push(flags);
    frame.push(to.len() as u8);
    frame.push(from.len() as u8);
    frame.extend_from_slice(&(content.len() as u16).to_be_bytes());
    frame.extend_from_slice(to);
    frame.extend_from_slice(from);
    frame.extend_from_slice(content);
    frame
}

/// Receive the next envelope or fail the test.
pub async fn expect_envelope(client: &mut RelayClient) -> Envelope {
    timeout(DEFAULT_TIMEOUT, client.recv())
        .await
        .expect("Timed out waiting for envelope")
        .expect("Receive failed")
        .expect("Connection closed before an envelope arrived")
}

/// Expect the server to close `client` without sending anything else.
pub async fn expect_closed(client: &mut RelayClient) {
    let next = timeout(DEFAULT_TIMEOUT, client.recv())
        .await
        .expect("Timed out waiting for close");
    assert!(
        matches!(next, Ok(None) | Err(_)),
        "expected connection close, got {:?}",
        next
    );
}
