//! The WebSocket relay.
//!
//! One WebSocket per session. Every binary message is one outer frame;
//! the relay maps it 1:1 onto an inner frame on the stream's yamux
//! substream and copies bytes back the other way. It never parses JSON:
//! the only payload byte it touches is the opcode prefix defined by
//! [`protocol::mapping`].
//!
//! Client-originated streams use odd identifiers, bridge-initiated push
//! streams even ones, so the two sides can never collide. A stream's
//! identifier is released for reuse once its relay task ends.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, warn};

use protocol::inner::{InnerFrame, Opcode};
use protocol::payload::ResultPayload;
use protocol::{ErrorCode, OuterFlags, OuterFrame, mapping};
use transport::{MuxStream, read_frame, write_frame};

use crate::session::Session;

/// WebSocket close code for non-binary messages.
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;

/// Frame-count cap of a stream's event queue; byte volume is governed by
/// [`STREAM_SEND_BUFFER`].
const STREAM_QUEUE: usize = 64;

/// Per-stream send buffer in bytes. A data frame charges its payload
/// length against this budget and the credit returns only once the bytes
/// reach the bridge, so a stalled stream blocks the WebSocket reader
/// after at most this much is in flight. No frame is ever dropped.
const STREAM_SEND_BUFFER: usize = 256 * 1024;

/// Queue of encoded outer frames awaiting the WebSocket writer.
const OUTBOUND_QUEUE: usize = 64;

enum OuterEvent {
    /// Payload plus the send-buffer credit it holds until written through.
    Data(Bytes, OwnedSemaphorePermit),
    Fin,
    Rst,
}

/// Routing entry for one open stream.
struct StreamHandle {
    tx: mpsc::Sender<OuterEvent>,
    credit: Arc<Semaphore>,
}

impl StreamHandle {
    fn new(tx: mpsc::Sender<OuterEvent>) -> Self {
        Self {
            tx,
            credit: Arc::new(Semaphore::new(STREAM_SEND_BUFFER)),
        }
    }
}

/// Charges `len` payload bytes against a stream's send buffer.
///
/// Frames larger than the whole buffer are clamped to it, which still
/// serializes them: the next frame waits until the previous one has fully
/// drained to the bridge.
async fn acquire_credit(credit: &Arc<Semaphore>, len: usize) -> Option<OwnedSemaphorePermit> {
    let permits = len.clamp(1, STREAM_SEND_BUFFER) as u32;
    Arc::clone(credit).acquire_many_owned(permits).await.ok()
}

/// Runs the relay until the WebSocket or the session ends.
pub async fn run(socket: WebSocket, session: Arc<Session>) {
    let (ws_tx, mut ws_rx) = socket.split();

    // Single writer task; everything else enqueues encoded frames.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(async move {
        let mut ws_tx = ws_tx;
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    // Streams the bridge opens toward the browser.
    let incoming = session.incoming.lock().await.take();

    let (done_tx, mut done_rx) = mpsc::channel::<u32>(STREAM_QUEUE);
    let (push_tx, mut push_rx) = mpsc::channel::<(u32, StreamHandle)>(STREAM_QUEUE);

    if let Some(mut incoming) = incoming {
        let out_tx = out_tx.clone();
        let done_tx = done_tx.clone();
        let push_tx = push_tx.clone();
        tokio::spawn(async move {
            while let Some(stream) = incoming.next().await {
                let out_tx = out_tx.clone();
                let done_tx = done_tx.clone();
                let push_tx = push_tx.clone();
                tokio::spawn(async move {
                    accept_push_stream(stream, out_tx, done_tx, push_tx).await;
                });
            }
        });
    }

    let mut streams: HashMap<u32, StreamHandle> = HashMap::new();

    loop {
        tokio::select! {
            message = ws_rx.next() => {
                let Some(Ok(message)) = message else { break };
                session.touch();
                match message {
                    Message::Binary(bytes) => {
                        handle_outer_frame(&session, &bytes, &mut streams, &out_tx, &done_tx).await;
                    }
                    Message::Text(_) => {
                        let _ = out_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_UNSUPPORTED_DATA,
                                reason: "binary frames only".into(),
                            })))
                            .await;
                        break;
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            Some((stream_id, handle)) = push_rx.recv() => {
                streams.insert(stream_id, handle);
            }
            Some(stream_id) = done_rx.recv() => {
                streams.remove(&stream_id);
            }
        }
    }

    // WebSocket gone: abort every stream; the session itself stays up
    // until logout or the idle reaper.
    for (_, handle) in streams.drain() {
        let _ = handle.tx.try_send(OuterEvent::Rst);
    }
    drop(out_tx);
    let _ = writer.await;
    debug!(session = %session.id, "relay ended");
}

async fn handle_outer_frame(
    session: &Arc<Session>,
    bytes: &[u8],
    streams: &mut HashMap<u32, StreamHandle>,
    out_tx: &mpsc::Sender<Message>,
    done_tx: &mpsc::Sender<u32>,
) {
    let frame = match OuterFrame::decode(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(session = %session.id, %err, "dropping malformed outer frame");
            return;
        }
    };
    let stream_id = frame.stream_id();
    let flags = frame.flags();

    if flags.contains(OuterFlags::SYN) {
        if !protocol::is_client_stream(stream_id) || streams.contains_key(&stream_id) {
            warn!(session = %session.id, stream = stream_id, "rejecting bad SYN");
            send_outer(out_tx, &OuterFrame::rst(stream_id)).await;
            return;
        }
        match session.mux.open_stream().await {
            Ok(mux_stream) => {
                let (event_tx, event_rx) = mpsc::channel(STREAM_QUEUE);
                streams.insert(stream_id, StreamHandle::new(event_tx));
                let out_tx = out_tx.clone();
                let done_tx = done_tx.clone();
                let opening = frame.into_payload();
                tokio::spawn(async move {
                    run_stream(mux_stream, stream_id, opening, event_rx, out_tx.clone()).await;
                    let _ = done_tx.send(stream_id).await;
                });
            }
            Err(err) => {
                // The browser sees a synthesized terminal result carrying
                // the transport's classification, then end-of-stream.
                debug!(session = %session.id, stream = stream_id, %err, "stream open refused");
                refuse_open(out_tx, stream_id, err.code()).await;
            }
        }
        return;
    }

    let Some(handle) = streams.get(&stream_id) else {
        // Frame for a stream that is not open: abort per contract.
        send_outer(out_tx, &OuterFrame::rst(stream_id)).await;
        return;
    };

    let event = if flags.contains(OuterFlags::RST) {
        OuterEvent::Rst
    } else if flags.contains(OuterFlags::FIN) {
        OuterEvent::Fin
    } else {
        // Blocking here is the backpressure contract: once a stream has
        // a full send buffer in flight the WebSocket reader stalls,
        // which stalls the browser.
        let payload = Bytes::copy_from_slice(frame.payload());
        match acquire_credit(&handle.credit, payload.len()).await {
            Some(permit) => OuterEvent::Data(payload, permit),
            None => {
                send_outer(out_tx, &OuterFrame::rst(stream_id)).await;
                return;
            }
        }
    };
    if handle.tx.send(event).await.is_err() {
        send_outer(out_tx, &OuterFrame::rst(stream_id)).await;
    }
}

/// Copies one stream in both directions until it closes or aborts.
async fn run_stream(
    mux_stream: MuxStream,
    stream_id: u32,
    opening: Bytes,
    mut from_ws: mpsc::Receiver<OuterEvent>,
    out_tx: mpsc::Sender<Message>,
) {
    let open = match InnerFrame::new(Opcode::Open, stream_id, opening) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(stream = stream_id, %err, "invalid opening payload");
            abort_with_code(&out_tx, stream_id, err.code()).await;
            return;
        }
    };

    let (mut from_bridge, mut to_bridge) = tokio::io::split(mux_stream);
    if write_frame(&mut to_bridge, &open).await.is_err() {
        abort_with_code(&out_tx, stream_id, ErrorCode::Unavailable).await;
        return;
    }

    let mut browser_done = false;
    let mut bridge_done = false;

    while !(browser_done && bridge_done) {
        tokio::select! {
            event = from_ws.recv(), if !browser_done => match event {
                Some(OuterEvent::Data(payload, permit)) => {
                    match mapping::inner_from_outer_data(stream_id, &payload) {
                        Ok(frame) => {
                            if write_frame(&mut to_bridge, &frame).await.is_err() {
                                abort_with_code(&out_tx, stream_id, ErrorCode::Unavailable).await;
                                return;
                            }
                        }
                        Err(err) => {
                            debug!(stream = stream_id, %err, "malformed data payload");
                            abort_with_code(&out_tx, stream_id, err.code()).await;
                            return;
                        }
                    }
                    // The send-buffer credit returns only now, with the
                    // bytes handed to the bridge.
                    drop(permit);
                }
                Some(OuterEvent::Fin) => {
                    let close = InnerFrame::new(Opcode::Close, stream_id, Bytes::new())
                        .unwrap_or_else(|_| unreachable!("empty close frame is valid"));
                    if write_frame(&mut to_bridge, &close).await.is_err() {
                        abort_with_code(&out_tx, stream_id, ErrorCode::Unavailable).await;
                        return;
                    }
                    browser_done = true;
                }
                Some(OuterEvent::Rst) | None => {
                    // Browser-initiated abort; dropping both halves
                    // resets the yamux stream.
                    return;
                }
            },
            frame = read_frame(&mut from_bridge), if !bridge_done => match frame {
                Ok(Some(frame)) if frame.opcode() == Opcode::Close => {
                    send_outer(&out_tx, &OuterFrame::fin(stream_id)).await;
                    bridge_done = true;
                }
                Ok(Some(frame)) => match mapping::outer_data_payload(&frame) {
                    Ok(payload) => {
                        match OuterFrame::data(stream_id, payload) {
                            Ok(outer) => send_outer(&out_tx, &outer).await,
                            Err(err) => {
                                abort_with_code(&out_tx, stream_id, err.code()).await;
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        debug!(stream = stream_id, %err, "unmappable frame from bridge");
                        abort_with_code(&out_tx, stream_id, err.code()).await;
                        return;
                    }
                },
                Ok(None) => {
                    if !bridge_done {
                        // EOF without a Close frame means the bridge side
                        // is gone mid-stream.
                        abort_with_code(&out_tx, stream_id, ErrorCode::Unavailable).await;
                        return;
                    }
                }
                Err(err) => {
                    debug!(stream = stream_id, %err, "bridge side failed");
                    let code = err.code();
                    abort_with_code(&out_tx, stream_id, code).await;
                    return;
                }
            },
        }
    }

    // Clean close on both sides.
    use tokio::io::AsyncWriteExt as _;
    let _ = to_bridge.shutdown().await;
}

/// Accepts a bridge-initiated stream and relays its opening SYN.
async fn accept_push_stream(
    mux_stream: MuxStream,
    out_tx: mpsc::Sender<Message>,
    done_tx: mpsc::Sender<u32>,
    push_tx: mpsc::Sender<(u32, StreamHandle)>,
) {
    let mut mux_stream = mux_stream;
    let open = match read_frame(&mut mux_stream).await {
        Ok(Some(frame)) if frame.opcode() == Opcode::Open => frame,
        _ => {
            debug!("push stream without an open frame");
            return;
        }
    };
    let stream_id = open.stream_id();
    if !protocol::is_push_stream(stream_id) {
        debug!(stream = stream_id, "push stream with a client-side id");
        return;
    }

    match OuterFrame::syn(stream_id, Bytes::copy_from_slice(open.payload())) {
        Ok(syn) => send_outer(&out_tx, &syn).await,
        Err(_) => return,
    }

    let (event_tx, event_rx) = mpsc::channel(STREAM_QUEUE);
    if push_tx
        .send((stream_id, StreamHandle::new(event_tx)))
        .await
        .is_err()
    {
        return;
    }

    relay_accepted_push(mux_stream, stream_id, event_rx, out_tx).await;
    let _ = done_tx.send(stream_id).await;
}

/// Pumps an accepted push stream after its SYN has been forwarded.
async fn relay_accepted_push(
    mux_stream: MuxStream,
    stream_id: u32,
    mut from_ws: mpsc::Receiver<OuterEvent>,
    out_tx: mpsc::Sender<Message>,
) {
    let (mut from_bridge, mut to_bridge) = tokio::io::split(mux_stream);
    let mut browser_done = false;
    let mut bridge_done = false;

    while !(browser_done && bridge_done) {
        tokio::select! {
            event = from_ws.recv(), if !browser_done => match event {
                Some(OuterEvent::Data(payload, permit)) => {
                    let Ok(frame) = mapping::inner_from_outer_data(stream_id, &payload) else {
                        abort_with_code(&out_tx, stream_id, ErrorCode::Malformed).await;
                        return;
                    };
                    if write_frame(&mut to_bridge, &frame).await.is_err() {
                        abort_with_code(&out_tx, stream_id, ErrorCode::Unavailable).await;
                        return;
                    }
                    drop(permit);
                }
                Some(OuterEvent::Fin) => {
                    let close = InnerFrame::new(Opcode::Close, stream_id, Bytes::new())
                        .unwrap_or_else(|_| unreachable!("empty close frame is valid"));
                    let _ = write_frame(&mut to_bridge, &close).await;
                    browser_done = true;
                }
                Some(OuterEvent::Rst) | None => return,
            },
            frame = read_frame(&mut from_bridge), if !bridge_done => match frame {
                Ok(Some(frame)) if frame.opcode() == Opcode::Close => {
                    send_outer(&out_tx, &OuterFrame::fin(stream_id)).await;
                    bridge_done = true;
                }
                Ok(Some(frame)) => {
                    let Ok(payload) = mapping::outer_data_payload(&frame) else {
                        abort_with_code(&out_tx, stream_id, ErrorCode::Malformed).await;
                        return;
                    };
                    let Ok(outer) = OuterFrame::data(stream_id, payload) else {
                        abort_with_code(&out_tx, stream_id, ErrorCode::Malformed).await;
                        return;
                    };
                    send_outer(&out_tx, &outer).await;
                }
                Ok(None) => {
                    if !bridge_done {
                        abort_with_code(&out_tx, stream_id, ErrorCode::Unavailable).await;
                        return;
                    }
                }
                Err(err) => {
                    let code = err.code();
                    abort_with_code(&out_tx, stream_id, code).await;
                    return;
                }
            },
        }
    }
}

async fn send_outer(out_tx: &mpsc::Sender<Message>, frame: &OuterFrame) {
    let _ = out_tx
        .send(Message::Binary(Bytes::from(frame.encode())))
        .await;
}

/// Sends a synthesized terminal result for a stream the relay must end on
/// its own authority; the bridge cannot answer any more.
async fn send_error_result(out_tx: &mpsc::Sender<Message>, stream_id: u32, code: ErrorCode) {
    let result = ResultPayload::error(code, code.as_str());
    if let Ok(inner) = InnerFrame::new(Opcode::Result, stream_id, result.to_bytes()) {
        if let Ok(payload) = mapping::outer_data_payload(&inner) {
            if let Ok(outer) = OuterFrame::data(stream_id, payload) {
                send_outer(out_tx, &outer).await;
            }
        }
    }
}

/// Answers a refused stream open: the classified result, then end-of-stream.
async fn refuse_open(out_tx: &mpsc::Sender<Message>, stream_id: u32, code: ErrorCode) {
    send_error_result(out_tx, stream_id, code).await;
    send_outer(out_tx, &OuterFrame::fin(stream_id)).await;
}

/// Aborts an open stream: the classified result, then RST.
///
/// Used for every failure underneath an established stream, so a bridge
/// crash reaches the browser as RST carrying `unavailable` rather than a
/// bare reset.
async fn abort_with_code(out_tx: &mpsc::Sender<Message>, stream_id: u32, code: ErrorCode) {
    send_error_result(out_tx, stream_id, code).await;
    send_outer(out_tx, &OuterFrame::rst(stream_id)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::limits::{UPLOAD_CHUNK_SIZE, UPLOAD_WINDOW_SIZE};
    use std::time::Duration;

    #[tokio::test]
    async fn sender_blocks_once_the_stream_buffer_is_exhausted() {
        let credit = Arc::new(Semaphore::new(STREAM_SEND_BUFFER));

        // A receiver that never reads keeps the charged credit forever.
        let held = acquire_credit(&credit, UPLOAD_CHUNK_SIZE as usize)
            .await
            .expect("first chunk is admitted");

        let blocked = tokio::time::timeout(
            Duration::from_millis(100),
            acquire_credit(&credit, UPLOAD_CHUNK_SIZE as usize),
        )
        .await;
        assert!(blocked.is_err(), "second chunk must block, not drop");

        // Draining to the bridge releases the credit and unblocks.
        drop(held);
        acquire_credit(&credit, UPLOAD_CHUNK_SIZE as usize)
            .await
            .expect("admitted after the buffer drains");
    }

    #[tokio::test]
    async fn in_flight_bytes_stay_inside_the_upload_window() {
        // With the buffer far below the protocol window, a stalled stream
        // can never accumulate anywhere near 4 MiB in the relay.
        assert!((STREAM_SEND_BUFFER as u64) < UPLOAD_WINDOW_SIZE);

        let credit = Arc::new(Semaphore::new(STREAM_SEND_BUFFER));
        let mut held = Vec::new();
        let mut admitted = 0u64;
        loop {
            let chunk = 64 * 1024usize;
            match tokio::time::timeout(
                Duration::from_millis(50),
                acquire_credit(&credit, chunk),
            )
            .await
            {
                Ok(Some(permit)) => {
                    held.push(permit);
                    admitted += chunk as u64;
                }
                _ => break,
            }
        }
        assert_eq!(admitted, STREAM_SEND_BUFFER as u64);
        assert!(admitted <= UPLOAD_WINDOW_SIZE);
    }

    #[tokio::test]
    async fn small_frames_are_charged_at_least_one_permit() {
        let credit = Arc::new(Semaphore::new(STREAM_SEND_BUFFER));
        let permit = acquire_credit(&credit, 0).await.expect("admitted");
        assert_eq!(credit.available_permits(), STREAM_SEND_BUFFER - 1);
        drop(permit);
        assert_eq!(credit.available_permits(), STREAM_SEND_BUFFER);
    }
}
