//! The chunked upload stream type (`fb-upload`).
//!
//! Opening arguments: `(path, total_size)`. The client writes `Data`
//! frames of at most 1 MiB; the handler acknowledges each 512 KiB
//! boundary with a `Progress {acked}` frame, and the client keeps no more
//! than 4 MiB unacknowledged in flight. The window holds both ways: the
//! relay's byte-accounted send buffer blocks a sender that outruns the
//! handler, and the handler rejects a client that ignores its
//! acknowledgements. At end-of-write the file is fsynced and a terminal
//! `Result` reports the byte count.

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use protocol::OpeningPayload;
use protocol::limits::{
    UPLOAD_ACK_INTERVAL, UPLOAD_CHUNK_SIZE, UPLOAD_IDLE_TIMEOUT, UPLOAD_WINDOW_SIZE,
};
use protocol::payload::{ProgressPayload, ResultPayload};

use crate::context::StreamContext;
use crate::error::BridgeError;
use crate::registry::Handler;
use crate::stream::{StreamEvent, StreamReader, StreamWriter};

/// Builds the `fb-upload` stream-type handler.
#[must_use]
pub fn upload_handler() -> Handler {
    Handler::new(run_upload)
}

async fn run_upload(
    _ctx: StreamContext,
    mut reader: StreamReader,
    writer: StreamWriter,
    opening: OpeningPayload,
) -> Result<(), BridgeError> {
    let path = opening
        .args()
        .first()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| BridgeError::InvalidArg("missing upload path".to_owned()))?
        .clone();
    let total: u64 = opening
        .args()
        .get(1)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| BridgeError::InvalidArg("missing or invalid total size".to_owned()))?;

    let mut file = tokio::fs::File::create(&path).await?;
    let mut received: u64 = 0;
    let mut last_acked: u64 = 0;

    loop {
        let event = timeout(UPLOAD_IDLE_TIMEOUT, reader.next_event())
            .await
            .map_err(|_| BridgeError::Timeout)??;

        match event {
            StreamEvent::Data(chunk) => {
                if chunk.len() as u64 > u64::from(UPLOAD_CHUNK_SIZE) {
                    return Err(BridgeError::Malformed(format!(
                        "upload chunk of {} bytes exceeds the 1 MiB limit",
                        chunk.len()
                    )));
                }
                received += chunk.len() as u64;
                if received > total {
                    return Err(BridgeError::Malformed(format!(
                        "received {received} bytes but the client announced {total}"
                    )));
                }
                if window_exceeded(received, last_acked) {
                    return Err(BridgeError::Malformed(format!(
                        "upload window exceeded: {} bytes unacknowledged",
                        received - last_acked
                    )));
                }
                file.write_all(&chunk).await?;

                // One acknowledgement per 512 KiB boundary crossed, so a
                // 1 MiB chunk produces two and the client's window
                // accounting advances in fixed steps.
                while received - last_acked >= UPLOAD_ACK_INTERVAL {
                    last_acked += UPLOAD_ACK_INTERVAL;
                    writer
                        .send_progress(&ProgressPayload::acked(last_acked))
                        .await?;
                }
            }
            StreamEvent::Close => {
                file.sync_all().await?;
                writer
                    .send_result(&ResultPayload::ok(json!({
                        "path": path,
                        "bytes": received,
                    })))
                    .await?;
                writer.send_close().await?;
                return Ok(());
            }
            StreamEvent::Aborted => return Err(BridgeError::Cancelled),
            StreamEvent::Resize(_) => {
                return Err(BridgeError::Malformed(
                    "resize frame on an upload stream".to_owned(),
                ));
            }
        }
    }
}

/// The client invariant: unacknowledged bytes never exceed the window.
const fn window_exceeded(received: u64, acked: u64) -> bool {
    received.saturating_sub(acked) > UPLOAD_WINDOW_SIZE
}
