//! Persistent interactive streams backed by a PTY.
//!
//! The `terminal` type spawns the account's shell; `container` runs
//! `docker exec -it` inside a named container. Both share one pump: PTY
//! output flows to the client as `Data` frames in chunks of at most
//! [`PTY_CHUNK_SIZE`](protocol::limits::PTY_CHUNK_SIZE) bytes, client
//! `Data` frames are written to the PTY, `Resize` frames change the
//! window, and the stream ends when the PTY reaches EOF or the client
//! closes or aborts.

use std::io::{Read as _, Write as _};

use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use tokio::sync::mpsc;
use tracing::debug;

use protocol::OpeningPayload;
use protocol::limits::PTY_CHUNK_SIZE;

use crate::context::StreamContext;
use crate::error::BridgeError;
use crate::registry::Handler;
use crate::stream::{StreamEvent, StreamReader, StreamWriter};

/// Builds the `terminal` stream-type handler.
///
/// Opening arguments: `(cols, rows[, shell])`.
#[must_use]
pub fn terminal_handler() -> Handler {
    Handler::new(|_ctx: StreamContext, reader, writer, opening| async move {
        let (cols, rows) = parse_size(opening.args(), 0)?;
        let shell = opening
            .args()
            .get(2)
            .cloned()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_owned());

        let mut command = CommandBuilder::new(shell);
        command.env("TERM", "xterm-256color");
        run_pty(reader, writer, command, cols, rows).await
    })
}

/// Builds the `container` stream-type handler.
///
/// Opening arguments: `(container_id, cols, rows)`.
#[must_use]
pub fn container_handler() -> Handler {
    Handler::new(|_ctx: StreamContext, reader, writer, opening| async move {
        let container = opening
            .args()
            .first()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::InvalidArg("missing container id".to_owned()))?
            .clone();
        let (cols, rows) = parse_size(opening.args(), 1)?;

        let mut command = CommandBuilder::new("docker");
        command.args(["exec", "-it", container.as_str(), "/bin/sh"]);
        run_pty(reader, writer, command, cols, rows).await
    })
}

fn parse_size(args: &[String], offset: usize) -> Result<(u16, u16), BridgeError> {
    let cols = args
        .get(offset)
        .and_then(|v| v.parse::<u16>().ok())
        .ok_or_else(|| BridgeError::InvalidArg("missing or invalid terminal columns".to_owned()))?;
    let rows = args
        .get(offset + 1)
        .and_then(|v| v.parse::<u16>().ok())
        .ok_or_else(|| BridgeError::InvalidArg("missing or invalid terminal rows".to_owned()))?;
    if cols == 0 || rows == 0 {
        return Err(BridgeError::InvalidArg("terminal size must be non-zero".to_owned()));
    }
    Ok((cols, rows))
}

async fn run_pty(
    mut reader: StreamReader,
    writer: StreamWriter,
    command: CommandBuilder,
    cols: u16,
    rows: u16,
) -> Result<(), BridgeError> {
    let pty = native_pty_system();
    let pair = pty
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| BridgeError::Unavailable(format!("openpty: {err}")))?;

    let mut child = pair
        .slave
        .spawn_command(command)
        .map_err(|err| BridgeError::Unavailable(format!("spawn pty command: {err}")))?;
    drop(pair.slave);
    let master = pair.master;

    let mut pty_reader = master
        .try_clone_reader()
        .map_err(|err| BridgeError::Unavailable(format!("pty reader: {err}")))?;
    let mut pty_writer = master
        .take_writer()
        .map_err(|err| BridgeError::Unavailable(format!("pty writer: {err}")))?;

    // PTY I/O is blocking; both directions get a dedicated thread bridged
    // to the async side through bounded channels.
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(8);
    let _pty_out = std::thread::spawn(move || {
        let mut buf = vec![0u8; PTY_CHUNK_SIZE];
        loop {
            match pty_reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if out_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (in_tx, mut in_rx) = mpsc::channel::<Vec<u8>>(8);
    let _pty_in = std::thread::spawn(move || {
        while let Some(data) = in_rx.blocking_recv() {
            if pty_writer.write_all(&data).is_err() {
                break;
            }
        }
    });

    let stream_id = reader.stream_id();
    loop {
        tokio::select! {
            chunk = out_rx.recv() => match chunk {
                Some(data) => writer.send_data(data).await?,
                // PTY reached EOF: the shell exited.
                None => break,
            },
            event = reader.next_event() => match event? {
                StreamEvent::Data(data) => {
                    if in_tx.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                StreamEvent::Resize(resize) => {
                    let _ = master.resize(PtySize {
                        rows: resize.rows,
                        cols: resize.cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    });
                }
                StreamEvent::Close | StreamEvent::Aborted => {
                    debug!(stream = stream_id, "client ended terminal stream");
                    break;
                }
            },
        }
    }

    drop(in_tx);
    let _ = child.kill();
    tokio::task::spawn_blocking(move || {
        let _ = child.wait();
    })
    .await
    .map_err(|err| BridgeError::Internal(format!("pty reap: {err}")))?;
    drop(master);

    // The client may already be gone after an abort.
    let _ = writer.send_close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parsing_accepts_the_wire_form() {
        let args = ["80".to_owned(), "24".to_owned()];
        assert_eq!(parse_size(&args, 0).expect("parses"), (80, 24));
    }

    #[test]
    fn zero_or_missing_sizes_are_invalid() {
        assert!(parse_size(&["0".to_owned(), "24".to_owned()], 0).is_err());
        assert!(parse_size(&["80".to_owned()], 0).is_err());
        assert!(parse_size(&[], 0).is_err());
    }

    #[test]
    fn container_sizes_are_read_past_the_id() {
        let args = ["c0ffee".to_owned(), "132".to_owned(), "43".to_owned()];
        assert_eq!(parse_size(&args, 1).expect("parses"), (132, 43));
    }
}
