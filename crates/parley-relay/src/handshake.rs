//! Connect-time name handshake.
//!
//! The client sends its display name exactly once, before any envelope:
//! a 1-byte length followed by that many bytes of UTF-8.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::types::{Field, Limits};
use crate::RelayError;

/// Check a display name before it is sent or registered.
pub fn validate_name(name: &str, limits: &Limits) -> Result<(), RelayError> {
    if name.is_empty() {
        return Err(RelayError::EmptyName);
    }
    limits.check(Field::Name, name.len())?;
    Ok(())
}

/// Read the client's display name.
///
/// An over-long declared length is rejected before the name bytes are read.
pub async fn read_name<R>(reader: &mut R, limits: &Limits) -> Result<String, RelayError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u8().await? as usize;
    limits.check(Field::Name, len)?;
    if len == 0 {
        return Err(RelayError::EmptyName);
    }

    let mut raw = vec![0u8; len];
    reader.read_exact(&mut raw).await?;
    let name = String::from_utf8(raw).map_err(|_| RelayError::InvalidName)?;

    debug!(name = %name, "Received display name");
    Ok(name)
}

/// Send a display name to the server.
pub async fn write_name<W>(writer: &mut W, name: &str, limits: &Limits) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    validate_name(name, limits)?;
    // validate_name bounds the length by the u8-clamped limit
    writer.write_u8(name.len() as u8).await?;
    writer.write_all(name.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LimitViolation;

    #[tokio::test]
    async fn test_name_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let limits = Limits::default();

        write_name(&mut client, "alice", &limits).await.unwrap();
        let name = read_name(&mut server, &limits).await.unwrap();
        assert_eq!(name, "alice");
    }

    #[tokio::test]
    async fn test_name_of_exactly_max_len_accepted() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let limits = Limits::default();
        let name = "a".repeat(32);

        write_name(&mut client, &name, &limits).await.unwrap();
        assert_eq!(read_name(&mut server, &limits).await.unwrap(), name);
    }

    #[tokio::test]
    async fn test_oversized_name_rejected_from_prefix() {
        // Only the length byte is sent; rejection must not wait for the body.
        let mut input: &[u8] = &[33];
        let err = read_name(&mut input, &Limits::default()).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Limit(LimitViolation {
                field: Field::Name,
                len: 33,
                max: 32
            })
        ));
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let mut input: &[u8] = &[0];
        let err = read_name(&mut input, &Limits::default()).await.unwrap_err();
        assert!(matches!(err, RelayError::EmptyName));
    }

    #[tokio::test]
    async fn test_invalid_utf8_rejected() {
        let mut input: &[u8] = &[2, 0xc3, 0x28];
        let err = read_name(&mut input, &Limits::default()).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidName));
    }

    #[tokio::test]
    async fn test_name_split_across_reads() {
        let mut input = tokio_test::io::Builder::new()
            .read(&[5])
            .read(b"al")
            .read(b"ice")
            .build();
        let name = read_name(&mut input, &Limits::default()).await.unwrap();
        assert_eq!(name, "alice");
    }

    #[tokio::test]
    async fn test_write_name_frames_length_then_bytes() {
        let mut output = tokio_test::io::Builder::new()
            .write(&[3])
            .write(b"bob")
            .build();
        write_name(&mut output, "bob", &Limits::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_truncated_name_is_io_error() {
        let mut input: &[u8] = &[5, b'a', b'l'];
        let err = read_name(&mut input, &Limits::default()).await.unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[tokio::test]
    async fn test_write_name_refuses_long_name() {
        let mut out = Vec::new();
        let err = write_name(&mut out, &"a".repeat(33), &Limits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Limit(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_validate_name() {
        let limits = Limits::default();
        assert!(validate_name("bob", &limits).is_ok());
        assert!(matches!(validate_name("", &limits), Err(RelayError::EmptyName)));
        assert!(validate_name(&"x".repeat(33), &limits).is_err());
    }
}
