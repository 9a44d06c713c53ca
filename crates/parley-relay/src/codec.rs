//! Envelope wire codec.
//!
//! Frames a byte stream into [`Envelope`]s. Each frame is a fixed 5-byte
//! header followed by the three string fields:
//!
//! ```text
//! +-------+--------+----------+-------------+----+------+---------+
//! | flags | to_len | from_len | content_len | to | from | content |
//! |  u8   |   u8   |    u8    |   u16 (BE)  |    |      |         |
//! +-------+--------+----------+-------------+----+------+---------+
//! ```
//!
//! Declared lengths are checked against the configured [`Limits`] as soon as
//! the header arrives, so an oversized frame is rejected before its body is
//! buffered.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::types::{Envelope, Field, LimitViolation, Limits};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 5;

/// Flag bit marking a server diagnostic.
const FLAG_ERROR: u8 = 0b0000_0001;

/// Codec error: malformed frame, over-limit field, or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Limit(#[from] LimitViolation),
    #[error("unknown flag bits {0:#04x}")]
    UnknownFlags(u8),
    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(Field),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Whether the peer sent data that breaks the framing rules.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// A tokio codec for [`Envelope`] frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    limits: Limits,
}

impl EnvelopeCodec {
    /// Create a codec enforcing `limits`.
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// The limits this codec enforces.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

fn take_string(src: &mut BytesMut, len: usize, field: Field) -> Result<String, CodecError> {
    let bytes = src.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let flags = src[0];
        if flags & !FLAG_ERROR != 0 {
            return Err(CodecError::UnknownFlags(flags));
        }

        let to_len = src[1] as usize;
        let from_len = src[2] as usize;
        let content_len = u16::from_be_bytes([src[3], src[4]]) as usize;

        self.limits.check(Field::To, to_len)?;
        self.limits.check(Field::From, from_len)?;
        self.limits.check(Field::Content, content_len)?;

        let frame_len = HEADER_LEN + to_len + from_len + content_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let to = take_string(src, to_len, Field::To)?;
        let from = take_string(src, from_len, Field::From)?;
        let content = take_string(src, content_len, Field::Content)?;

        Ok(Some(Envelope {
            to,
            from,
            content,
            is_error: flags & FLAG_ERROR != 0,
        }))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.limits.check(Field::To, item.to.len())?;
        self.limits.check(Field::From, item.from.len())?;
        self.limits.check(Field::Content, item.content.len())?;

        // Limits are clamped to the wire maxima, so these casts cannot truncate.
        dst.reserve(HEADER_LEN + item.to.len() + item.from.len() + item.content.len());
        dst.put_u8(if item.is_error { FLAG_ERROR } else { 0 });
        dst.put_u8(item.to.len() as u8);
        dst.put_u8(item.from.len() as u8);
        dst.put_u16(item.content.len() as u16);
        dst.put_slice(item.to.as_bytes());
        dst.put_slice(item.from.as_bytes());
        dst.put_slice(item.content.as_bytes());
        Ok(())
    }
}
