//! Error types for the relay.

use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::types::LimitViolation;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error (network)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope framing error
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A name, recipient or body over its size limit
    #[error("Limit exceeded: {0}")]
    Limit(#[from] LimitViolation),

    /// Zero-length display name in the handshake
    #[error("Display name is empty")]
    EmptyName,

    /// Display name bytes are not valid UTF-8
    #[error("Display name is not valid UTF-8")]
    InvalidName,

    /// Handshake not completed in time
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Display name already registered
    #[error("Username is taken: {0}")]
    NameTaken(String),

    /// Write to a peer did not complete in time
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// An earlier write timed out and the connection was abandoned
    #[error("Connection is broken after a timed-out write")]
    ConnectionBroken,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error means the peer broke the protocol.
    ///
    /// Such peers are disconnected without being told why.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            Self::Limit(_) | Self::EmptyName | Self::InvalidName => true,
            Self::Codec(e) => e.is_malformed(),
            _ => false,
        }
    }
}
