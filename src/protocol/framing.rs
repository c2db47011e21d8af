//! Native-messaging wire codec.
//!
//! Every message is a 32-bit length in native byte order followed by
//! that many bytes of UTF-8 JSON.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ len: u32 (ne)│ {"query":"get-ak-pub"}       │
//! └──────────────┴──────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest message a host may send to the browser side (1 MiB).
pub const MAX_HOST_MESSAGE: usize = 1024 * 1024;

/// Largest message the browser side may send to a host (64 MiB).
pub const MAX_BROWSER_MESSAGE: usize = 64 * 1024 * 1024;

/// Size of the length prefix.
const PREFIX_LEN: usize = 4;

// ============================================================================
// Reading
// ============================================================================

/// Reads one raw frame.
///
/// Returns `Ok(None)` on a clean EOF before the length prefix.
///
/// # Errors
///
/// - [`Error::FrameTooLarge`] if the announced length exceeds `max_len`
/// - [`Error::Io`] on EOF inside a frame or any other read failure
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; PREFIX_LEN];
    let mut filled = 0;

    while filled < PREFIX_LEN {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF inside length prefix",
            )));
        }
        filled += n;
    }

    let len = u32::from_ne_bytes(prefix) as usize;
    if len > max_len {
        return Err(Error::frame_too_large(len, max_len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    trace!(len, "Frame read");
    Ok(Some(body))
}

/// Reads one frame and parses it as JSON.
///
/// Returns `Ok(None)` on a clean EOF.
///
/// # Errors
///
/// Same as [`read_frame`], plus [`Error::Json`] if the body is not JSON.
pub async fn read_message<R>(reader: &mut R, max_len: usize) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_len).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
        None => Ok(None),
    }
}

// ============================================================================
// Frame
// ============================================================================

/// An encoded message, length prefix included, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Serializes `message` into a frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if serialization fails
    /// - [`Error::FrameTooLarge`] if the body exceeds `max_len`
    pub fn encode(message: &Value, max_len: usize) -> Result<Self> {
        let body = serde_json::to_vec(message)?;
        if body.len() > max_len {
            return Err(Error::frame_too_large(body.len(), max_len));
        }

        let len =
            u32::try_from(body.len()).map_err(|_| Error::frame_too_large(body.len(), max_len))?;

        let mut bytes = Vec::with_capacity(PREFIX_LEN + body.len());
        bytes.extend_from_slice(&len.to_ne_bytes());
        bytes.extend_from_slice(&body);
        Ok(Self(bytes))
    }

    /// Returns the body length (prefix excluded).
    #[inline]
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.0.len() - PREFIX_LEN
    }

    /// Returns the full encoded bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Writes an encoded frame and flushes.
///
/// # Errors
///
/// Returns [`Error::Io`] if the write fails.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await?;

    trace!(len = frame.body_len(), "Frame written");
    Ok(())
}

/// Serializes `message` and writes it as one frame.
///
/// # Errors
///
/// - [`Error::FrameTooLarge`] if the serialized body exceeds `max_len`
/// - [`Error::Io`] if the write fails
pub async fn write_message<W>(writer: &mut W, message: &Value, max_len: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = Frame::encode(message, max_len)?;
    write_frame(writer, &frame).await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut a, mut b) = duplex(1024);
        let message = json!({ "query": "get-ak-pub" });

        write_message(&mut a, &message, MAX_BROWSER_MESSAGE)
            .await
            .expect("write");
        let read = read_message(&mut b, MAX_HOST_MESSAGE)
            .await
            .expect("read")
            .expect("frame");

        assert_eq!(read, message);
    }

    #[tokio::test]
    async fn test_prefix_is_native_endian() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, &json!({}), MAX_BROWSER_MESSAGE)
            .await
            .expect("write");

        assert_eq!(&buffer[..4], &2u32.to_ne_bytes());
        assert_eq!(&buffer[4..], b"{}");
    }

    #[tokio::test]
    async fn test_clean_eof_returns_none() {
        let mut empty: &[u8] = &[];
        let result = read_frame(&mut empty, MAX_HOST_MESSAGE).await.expect("eof");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_prefix_is_error() {
        let mut partial: &[u8] = &[1, 0];
        let result = read_frame(&mut partial, MAX_HOST_MESSAGE).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_eof_inside_body_is_error() {
        let mut data = 10u32.to_ne_bytes().to_vec();
        data.extend_from_slice(b"{\"a\"");
        let mut reader: &[u8] = &data;

        let result = read_frame(&mut reader, MAX_HOST_MESSAGE).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_prefix_rejected() {
        let data = ((MAX_HOST_MESSAGE + 1) as u32).to_ne_bytes();
        let mut reader: &[u8] = &data;

        let result = read_frame(&mut reader, MAX_HOST_MESSAGE).await;
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let mut buffer = Vec::new();
        let message = json!({ "blob": "x".repeat(64) });

        let result = write_message(&mut buffer, &message, 16).await;
        assert!(matches!(result, Err(Error::FrameTooLarge { max: 16, .. })));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_frame_encode() {
        let frame = Frame::encode(&json!({ "a": 1 }), MAX_BROWSER_MESSAGE).expect("encode");
        assert_eq!(frame.body_len(), 7);
        assert_eq!(&frame.as_bytes()[..4], &7u32.to_ne_bytes());
    }

    #[tokio::test]
    async fn test_non_json_body() {
        let mut data = 3u32.to_ne_bytes().to_vec();
        data.extend_from_slice(b"abc");
        let mut reader: &[u8] = &data;

        let result = read_message(&mut reader, MAX_HOST_MESSAGE).await;
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_consecutive_frames_keep_order() {
        let (mut a, mut b) = duplex(4096);
        for i in 0..5 {
            write_message(&mut a, &json!({ "seq": i }), MAX_BROWSER_MESSAGE)
                .await
                .expect("write");
        }

        for i in 0..5 {
            let message = read_message(&mut b, MAX_HOST_MESSAGE)
                .await
                .expect("read")
                .expect("frame");
            assert_eq!(message["seq"], i);
        }
    }
}
