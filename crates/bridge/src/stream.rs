//! Per-stream I/O handles given to handlers.
//!
//! A dispatched stream is split into a [`StreamReader`] that surfaces
//! client frames as events and a cloneable [`StreamWriter`] that serializes
//! outbound frames. The dispatcher keeps a writer clone so it can still
//! emit a terminal `Result` after a handler fails or panics.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use protocol::inner::{InnerFrame, Opcode};
use protocol::payload::{ProgressPayload, ResizePayload, ResultPayload};
use transport::{MuxStream, read_frame, write_frame};

use crate::error::BridgeError;

/// A frame from the client, viewed from a handler.
#[derive(Debug)]
pub enum StreamEvent {
    /// Raw payload bytes.
    Data(Bytes),
    /// Terminal window size change.
    Resize(ResizePayload),
    /// End-of-write from the client; cooperative cancellation point.
    Close,
    /// The stream or session was torn down without a clean close.
    Aborted,
}

/// Receiving half of a dispatched stream.
pub struct StreamReader {
    stream_id: u32,
    half: ReadHalf<MuxStream>,
}

impl StreamReader {
    pub(crate) fn new(stream_id: u32, half: ReadHalf<MuxStream>) -> Self {
        Self { stream_id, half }
    }

    /// Returns the stream identifier.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Waits for the next client frame.
    ///
    /// Anything other than `Data`, `Resize`, or `Close` from the client is
    /// a protocol violation surfaced as [`BridgeError::Malformed`];
    /// transport-level failures and resets surface as
    /// [`StreamEvent::Aborted`].
    pub async fn next_event(&mut self) -> Result<StreamEvent, BridgeError> {
        let frame = match read_frame(&mut self.half).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(StreamEvent::Aborted),
            Err(err) => {
                tracing::debug!(stream = self.stream_id, %err, "stream read failed");
                return Ok(StreamEvent::Aborted);
            }
        };

        match frame.opcode() {
            Opcode::Data => Ok(StreamEvent::Data(frame.into_payload())),
            Opcode::Resize => {
                let resize = ResizePayload::from_bytes(frame.payload())
                    .map_err(|err| BridgeError::Malformed(format!("resize payload: {err}")))?;
                Ok(StreamEvent::Resize(resize))
            }
            Opcode::Close => Ok(StreamEvent::Close),
            other => Err(BridgeError::Malformed(format!(
                "unexpected {other:?} frame from client"
            ))),
        }
    }
}

/// Sending half of a dispatched stream; cheap to clone.
#[derive(Clone)]
pub struct StreamWriter {
    stream_id: u32,
    half: Arc<Mutex<WriteHalf<MuxStream>>>,
}

impl StreamWriter {
    pub(crate) fn new(stream_id: u32, half: WriteHalf<MuxStream>) -> Self {
        Self {
            stream_id,
            half: Arc::new(Mutex::new(half)),
        }
    }

    /// Returns the stream identifier.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    async fn send(&self, opcode: Opcode, payload: impl Into<Bytes>) -> Result<(), BridgeError> {
        let frame = InnerFrame::new(opcode, self.stream_id, payload)?;
        let mut half = self.half.lock().await;
        write_frame(&mut *half, &frame).await?;
        Ok(())
    }

    /// Sends an `Open` frame; used by push streams only.
    pub async fn send_open(&self, opening: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.send(Opcode::Open, opening).await
    }

    /// Sends raw payload bytes.
    pub async fn send_data(&self, payload: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.send(Opcode::Data, payload).await
    }

    /// Sends a progress report.
    pub async fn send_progress(&self, progress: &ProgressPayload) -> Result<(), BridgeError> {
        self.send(Opcode::Progress, progress.to_bytes()).await
    }

    /// Sends the terminal result envelope.
    pub async fn send_result(&self, result: &ResultPayload) -> Result<(), BridgeError> {
        self.send(Opcode::Result, result.to_bytes()).await
    }

    /// Sends the closing frame.
    pub async fn send_close(&self) -> Result<(), BridgeError> {
        self.send(Opcode::Close, Bytes::new()).await
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::loopback;
    use super::*;
    use protocol::ErrorCode;

    #[tokio::test]
    async fn data_frames_surface_as_events() {
        let mut rig = loopback(7).await;
        let frame = InnerFrame::new(Opcode::Data, 7, &b"chunk"[..]).expect("frame");
        write_frame(&mut rig.peer, &frame).await.expect("write");

        match rig.reader.next_event().await.expect("event") {
            StreamEvent::Data(data) => assert_eq!(&data[..], b"chunk"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_and_reset_are_distinguished() {
        let mut rig = loopback(7).await;
        let close = InnerFrame::new(Opcode::Close, 7, Bytes::new()).expect("frame");
        write_frame(&mut rig.peer, &close).await.expect("write");
        assert!(matches!(
            rig.reader.next_event().await.expect("event"),
            StreamEvent::Close
        ));

        let mut rig = loopback(8).await;
        drop(rig.peer);
        assert!(matches!(
            rig.reader.next_event().await.expect("event"),
            StreamEvent::Aborted
        ));
    }

    #[tokio::test]
    async fn result_frames_from_the_client_are_malformed() {
        let mut rig = loopback(7).await;
        let bogus = InnerFrame::new(Opcode::Result, 7, &b"{}"[..]).expect("frame");
        write_frame(&mut rig.peer, &bogus).await.expect("write");

        let err = rig.reader.next_event().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Malformed);
    }

    #[tokio::test]
    async fn writer_emits_result_then_close() {
        let mut rig = loopback(7).await;
        rig.writer
            .send_result(&ResultPayload::ok(None))
            .await
            .expect("result");
        rig.writer.send_close().await.expect("close");

        let first = read_frame(&mut rig.peer).await.expect("read").expect("frame");
        assert_eq!(first.opcode(), Opcode::Result);
        let second = read_frame(&mut rig.peer).await.expect("read").expect("frame");
        assert_eq!(second.opcode(), Opcode::Close);
    }
}
