//! Socket-facing helpers: one `write` per frame out, one `read` per frame
//! in. Deliberately not length-prefixed or buffered across reads — a
//! frame that arrives fragmented across TCP segments, or a peer that
//! writes more than one object per call, is not reassembled. This
//! preserves the wire-level fragility of the original protocol rather
//! than silently upgrading it to a framed transport.

use crate::{Frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Writes one frame as a single `write_all` call.
pub async fn send_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), FrameIoError> {
    send_frame_max(writer, frame, DEFAULT_MAX_FRAME_BYTES).await
}

pub async fn send_frame_max<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max_bytes: usize,
) -> Result<(), FrameIoError> {
    let bytes = frame.encode(max_bytes)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Reads one frame with a single `read` call of up to `max_bytes`.
/// A zero-length read (peer closed the write half) is reported as
/// [`FrameIoError::Closed`].
pub async fn recv_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Frame, FrameIoError> {
    recv_frame_max(reader, DEFAULT_MAX_FRAME_BYTES).await
}

pub async fn recv_frame_max<R: AsyncReadExt + Unpin>(reader: &mut R, max_bytes: usize) -> Result<Frame, FrameIoError> {
    let mut buf = vec![0u8; max_bytes];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Err(FrameIoError::Closed);
    }
    Ok(Frame::decode(&buf[..n])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountRef, Frame};

    #[tokio::test]
    async fn send_then_recv_round_trips_over_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let frame = Frame::Exit(AccountRef { account_name: "alice".to_owned() });
        send_frame(&mut a, &frame).await.unwrap();
        let got = recv_frame(&mut b).await.unwrap();
        assert_eq!(got, frame);
    }

    #[tokio::test]
    async fn recv_on_closed_stream_reports_closed() {
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        let err = recv_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, FrameIoError::Closed));
    }
}
