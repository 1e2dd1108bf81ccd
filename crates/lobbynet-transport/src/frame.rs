//! Length-prefixed framing.
//!
//! Every message on a lobbynet socket is one frame:
//!
//! ```text
//! +----------------+---------------------------+
//! | L (u16, BE)    | body (L - 2 bytes)        |
//! +----------------+---------------------------+
//! ```
//!
//! `L` counts the two header bytes themselves, so the smallest legal
//! frame is `0x0002` with an empty body and the largest carries
//! `65533` body bytes. What the body means is up to the layer above.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::TransportError;

/// Size of the length field in bytes.
pub const HEADER_LEN: usize = 2;

/// Largest frame the 16-bit length field can describe, header included.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Prepends the length header to `body`.
///
/// # Errors
/// Returns [`TransportError::FrameTooLarge`] if the framed message would
/// not fit in the length field.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let total = body.len() + HEADER_LEN;
    if total > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge(total));
    }
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u16).to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Writes one frame and flushes the writer.
pub async fn write_frame<W>(
    writer: &mut W,
    body: &[u8],
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(body)?;
    writer
        .write_all(&frame)
        .await
        .map_err(TransportError::SendFailed)?;
    writer.flush().await.map_err(TransportError::SendFailed)
}

/// Reads one frame and returns its body.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// A stream that ends inside a frame is a [`TransportError::ShortRead`].
/// Frames may arrive split across any number of reads.
pub async fn read_frame<R>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < HEADER_LEN {
        return Err(TransportError::ShortRead {
            expected: HEADER_LEN,
            got,
        });
    }

    let len = u16::from_be_bytes(header);
    if usize::from(len) < HEADER_LEN {
        return Err(TransportError::FrameTooShort(len));
    }

    let mut body = vec![0u8; usize::from(len) - HEADER_LEN];
    let got = read_full(reader, &mut body).await?;
    if got < body.len() {
        return Err(TransportError::ShortRead {
            expected: usize::from(len),
            got: got + HEADER_LEN,
        });
    }
    Ok(Some(body))
}

/// Fills `buf` until it is full or the stream ends. Returns the number
/// of bytes read.
async fn read_full<R>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(TransportError::ReceiveFailed(e)),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_counts_header_in_length() {
        let frame = encode_frame(b"aaaa\0").expect("fits");
        assert_eq!(&frame[..2], &[0x00, 0x07]);
        assert_eq!(&frame[2..], b"aaaa\0");
    }

    #[test]
    fn test_encode_frame_empty_body_is_header_only() {
        assert_eq!(encode_frame(b"").expect("fits"), vec![0x00, 0x02]);
    }

    #[test]
    fn test_encode_frame_largest_body_fits() {
        let body = vec![b'x'; MAX_FRAME_LEN - HEADER_LEN];
        let frame = encode_frame(&body).expect("exactly at the limit");
        assert_eq!(&frame[..2], &[0xff, 0xff]);
    }

    #[test]
    fn test_encode_frame_oversized_body_rejected() {
        let body = vec![b'x'; MAX_FRAME_LEN - HEADER_LEN + 1];
        let err = encode_frame(&body).unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge(65536)));
    }

    #[tokio::test]
    async fn test_read_frame_single_frame() {
        let mut input: &[u8] = b"\x00\x07aaaa\0";
        let body = read_frame(&mut input).await.expect("read").expect("frame");
        assert_eq!(body, b"aaaa\0");
        assert!(read_frame(&mut input).await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn test_read_frame_two_concatenated_frames() {
        let mut input: &[u8] = b"\x00\x07aaaa\0\x00\x07aaaa\0";
        for _ in 0..2 {
            let body =
                read_frame(&mut input).await.expect("read").expect("frame");
            assert_eq!(body, b"aaaa\0");
        }
        assert!(read_frame(&mut input).await.expect("eof").is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body_is_short_read() {
        let mut input: &[u8] = b"\x00\x07aa";
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead { expected: 7, got: 4 }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_header_is_short_read() {
        let mut input: &[u8] = b"\x00";
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead { expected: 2, got: 1 }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_length_below_header_rejected() {
        let mut input: &[u8] = b"\x00\x01";
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooShort(1)));
    }

    #[tokio::test]
    async fn test_read_frame_split_across_many_reads() {
        // One byte per write on the far side of a tiny duplex pipe, so
        // the reader sees the frame in as many pieces as possible.
        let (mut client, mut server) = tokio::io::duplex(1);
        let bytes = b"\x00\x0bhello\0you\0".to_vec();
        let writer = tokio::spawn(async move {
            for b in bytes {
                client.write_all(&[b]).await.expect("write");
            }
        });

        let body =
            read_frame(&mut server).await.expect("read").expect("frame");
        assert_eq!(body, b"hello\0you\0");
        writer.await.expect("writer task");
    }

    #[tokio::test]
    async fn test_write_frame_then_read_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"PING\0").await.expect("write");
        let mut input: &[u8] = &buf;
        let body = read_frame(&mut input).await.expect("read").expect("frame");
        assert_eq!(body, b"PING\0");
    }
}
