//! Common types for the relay: envelopes, size limits and their violations.

use std::fmt;

/// Maximum length of a display name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length of a message body, in bytes.
pub const MAX_MESSAGE_LEN: usize = 2048;

/// Widest name the wire format can carry (1-byte length prefix).
pub const WIRE_MAX_NAME_LEN: usize = u8::MAX as usize;

/// Widest body the wire format can carry (2-byte length prefix).
pub const WIRE_MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// A single routed message unit.
///
/// `from` is stamped by the server; whatever a client puts there is
/// overwritten before the envelope reaches the router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Recipient display name
    pub to: String,
    /// Sender display name
    pub from: String,
    /// Message body
    pub content: String,
    /// Set on server-generated diagnostics
    pub is_error: bool,
}

impl Envelope {
    /// Create a user message addressed to `to`. The sender is left empty.
    pub fn message(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: String::new(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create a server diagnostic.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            to: String::new(),
            from: String::new(),
            content: content.into(),
            is_error: true,
        }
    }

    /// Set the sender name.
    pub fn with_sender(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Check the recipient and body against `limits`.
    pub fn validate(&self, limits: &Limits) -> Result<(), LimitViolation> {
        limits.check(Field::To, self.to.len())?;
        limits.check(Field::Content, self.content.len())
    }
}

/// An envelope (or handshake) field subject to a size limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Display name sent during the handshake
    Name,
    /// Envelope recipient
    To,
    /// Envelope sender
    From,
    /// Envelope body
    Content,
}

impl Field {
    /// Get the field name for logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::To => "recipient",
            Self::From => "sender",
            Self::Content => "content",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field longer than the configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{field} length {len} exceeds maximum {max}")]
pub struct LimitViolation {
    /// Offending field
    pub field: Field,
    /// Observed length in bytes
    pub len: usize,
    /// Configured maximum
    pub max: usize,
}

/// Size limits for names and message bodies.
///
/// Both limits are clamped to what the wire format can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    max_name_len: usize,
    max_message_len: usize,
}

impl Limits {
    /// Create limits, clamped to the wire maxima.
    pub fn new(max_name_len: usize, max_message_len: usize) -> Self {
        Self {
            max_name_len: max_name_len.min(WIRE_MAX_NAME_LEN),
            max_message_len: max_message_len.min(WIRE_MAX_MESSAGE_LEN),
        }
    }

    /// Maximum name length in bytes.
    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Maximum body length in bytes.
    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    /// Maximum length for `field`.
    pub fn max_for(&self, field: Field) -> usize {
        match field {
            Field::Name | Field::To | Field::From => self.max_name_len,
            Field::Content => self.max_message_len,
        }
    }

    /// Check a length against the limit for `field`.
    pub fn check(&self, field: Field, len: usize) -> Result<(), LimitViolation> {
        let max = self.max_for(field);
        if len > max {
            return Err(LimitViolation { field, len, max });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(MAX_NAME_LEN, MAX_MESSAGE_LEN)
    }
}
