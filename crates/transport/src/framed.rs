//! Inner-frame I/O over an individual stream.
//!
//! yamux streams are plain byte pipes; the inner frame's explicit length
//! field restores message boundaries. These helpers are generic over the
//! tokio I/O traits so the relay, the bridge, and the tests can run them
//! against any duplex transport.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use protocol::inner::{INNER_HEADER_LEN, InnerFrame, InnerHeader};

use crate::error::TransportError;

/// Reads one inner frame, returning `None` on a clean end-of-stream.
///
/// End-of-stream in the middle of a frame is an error; only EOF on the
/// first header byte is treated as a clean close.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<InnerFrame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; INNER_HEADER_LEN];
    let mut filled = 0usize;
    while filled < INNER_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(protocol::FrameError::TruncatedHeader {
                actual: filled,
                expected: INNER_HEADER_LEN,
            }
            .into());
        }
        filled += n;
    }

    let header = InnerHeader::decode(&header)?;
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some(InnerFrame::new(
        header.opcode,
        header.stream_id,
        payload,
    )?))
}

/// Writes one inner frame and flushes the stream.
pub async fn write_frame<W>(writer: &mut W, frame: &InnerFrame) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::inner::Opcode;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let sent = InnerFrame::new(Opcode::Open, 1, &b"terminal\x0080\x0024"[..]).expect("frame");
        write_frame(&mut a, &sent).await.expect("write");

        let received = read_frame(&mut b).await.expect("read").expect("one frame");
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn back_to_back_frames_preserve_boundaries() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        let first = InnerFrame::new(Opcode::Data, 3, vec![0xAB; 300]).expect("frame");
        let second = InnerFrame::new(Opcode::Close, 3, Vec::new()).expect("frame");
        write_frame(&mut a, &first).await.expect("write");
        write_frame(&mut a, &second).await.expect("write");

        assert_eq!(read_frame(&mut b).await.expect("read"), Some(first));
        assert_eq!(read_frame(&mut b).await.expect("read"), Some(second));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert_eq!(read_frame(&mut b).await.expect("read"), None);
    }

    #[tokio::test]
    async fn eof_inside_a_header_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut a, &[0x81, 0x00, 0x00])
            .await
            .expect("write");
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(protocol::FrameError::TruncatedHeader { .. })
        ));
    }

    #[tokio::test]
    async fn eof_inside_a_payload_is_an_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let header = InnerHeader::new(Opcode::Data, 1, 8).expect("header");
        tokio::io::AsyncWriteExt::write_all(&mut a, &header.encode())
            .await
            .expect("write");
        tokio::io::AsyncWriteExt::write_all(&mut a, &[1, 2, 3])
            .await
            .expect("write");
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }
}
