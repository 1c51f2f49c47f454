//! Bridge-initiated push streams.
//!
//! The bridge may open streams toward the browser for event notification.
//! Push streams take even identifiers (client-originated streams are odd)
//! so the two sides can never collide, and start with the same `Open`
//! frame shape as any other stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use protocol::OpeningPayload;
use transport::Multiplex;

use crate::error::BridgeError;
use crate::stream::{StreamReader, StreamWriter};

/// Factory for bridge-initiated streams on one session.
#[derive(Clone)]
pub struct PushStreams {
    mux: Multiplex,
    next_id: Arc<AtomicU32>,
}

impl PushStreams {
    /// Builds the factory over the session's transport.
    #[must_use]
    pub fn new(mux: Multiplex) -> Self {
        Self {
            mux,
            next_id: Arc::new(AtomicU32::new(2)),
        }
    }

    /// Opens a push stream and sends its opening frame.
    pub async fn open(
        &self,
        opening: &OpeningPayload,
    ) -> Result<(StreamReader, StreamWriter), BridgeError> {
        let stream_id = self.next_id.fetch_add(2, Ordering::Relaxed);
        let stream = self.mux.open_stream().await?;
        let (read_half, write_half) = tokio::io::split(stream);
        let writer = StreamWriter::new(stream_id, write_half);
        writer.send_open(opening.encode()).await?;
        Ok((StreamReader::new(stream_id, read_half), writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::inner::Opcode;
    use transport::{Multiplex, read_frame};

    #[tokio::test]
    async fn push_streams_use_even_ids_and_open_frames() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (_server_mux, mut server_incoming) = Multiplex::client(client_io);
        let (bridge_mux, _bi) = Multiplex::server(server_io);

        let push = PushStreams::new(bridge_mux.clone());
        let opening = OpeningPayload::new("event", ["docker".to_owned()]).expect("opening");

        let (_reader, writer) = push.open(&opening).await.expect("open");
        writer.send_data(&b"started"[..]).await.expect("data");

        let mut accepted = server_incoming.next().await.expect("accept");
        let open = read_frame(&mut accepted).await.expect("read").expect("frame");
        assert_eq!(open.opcode(), Opcode::Open);
        assert_eq!(open.stream_id(), 2);
        assert!(protocol::is_push_stream(open.stream_id()));
        assert_eq!(open.payload(), opening.encode().as_slice());

        let data = read_frame(&mut accepted).await.expect("read").expect("frame");
        assert_eq!(data.opcode(), Opcode::Data);

        let (_r2, w2) = push.open(&opening).await.expect("open");
        assert_eq!(w2.stream_id(), 4);
    }
}
