//! The progress-bearing download stream type (`fb-download`).
//!
//! Opening arguments: `(path)`. File bytes flow to the client as `Data`
//! frames with a `Progress` report per chunk, then a terminal `Result`
//! and `Close`. Reads hold a permit from the heavy-task gate so a burst
//! of downloads cannot exhaust bridge memory.

use serde_json::json;
use tokio::io::AsyncReadExt;

use protocol::OpeningPayload;
use protocol::limits::UPLOAD_CHUNK_SIZE;
use protocol::payload::{ProgressPayload, ResultPayload};

use crate::context::StreamContext;
use crate::error::BridgeError;
use crate::registry::Handler;
use crate::stream::{StreamEvent, StreamReader, StreamWriter};

/// Builds the `fb-download` stream-type handler.
#[must_use]
pub fn download_handler() -> Handler {
    Handler::new(run_download)
}

async fn run_download(
    ctx: StreamContext,
    mut reader: StreamReader,
    writer: StreamWriter,
    opening: OpeningPayload,
) -> Result<(), BridgeError> {
    let path = opening
        .args()
        .first()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| BridgeError::InvalidArg("missing download path".to_owned()))?
        .clone();

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(BridgeError::NotFound(format!("no such file: {path}")));
        }
        Err(err) => return Err(err.into()),
    };
    let total = file.metadata().await?.len();

    let _permit = ctx
        .gates
        .heavy
        .acquire()
        .await
        .map_err(|_| BridgeError::Unavailable("bridge shutting down".to_owned()))?;

    let mut sent: u64 = 0;
    let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE as usize];
    loop {
        tokio::select! {
            read = file.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                writer.send_data(buf[..n].to_vec()).await?;
                sent += n as u64;
                writer
                    .send_progress(&ProgressPayload::of_total(sent, total))
                    .await?;
            }
            event = reader.next_event() => match event? {
                StreamEvent::Close | StreamEvent::Aborted => {
                    return Err(BridgeError::Cancelled);
                }
                StreamEvent::Data(_) | StreamEvent::Resize(_) => {
                    return Err(BridgeError::Malformed(
                        "unexpected frame on a download stream".to_owned(),
                    ));
                }
            },
        }
    }

    writer
        .send_result(&ResultPayload::ok(json!({ "path": path, "bytes": sent })))
        .await?;
    writer.send_close().await?;
    Ok(())
}
