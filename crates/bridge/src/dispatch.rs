//! The stream dispatcher.
//!
//! For each inbound yamux stream the dispatcher reads exactly one `Open`
//! frame, parses the opening payload, and routes to the registered
//! handler for the stream type. Failures never take the bridge down: an
//! unknown type answers `not_found`, a malformed opening answers
//! `malformed`, and a panicking handler is caught and answered with
//! `internal`, all as terminal `Result` frames followed by `Close`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use protocol::limits::HANDSHAKE_TIMEOUT;
use protocol::payload::ResultPayload;
use protocol::{ErrorCode, OpeningPayload, inner::Opcode};

use transport::{IncomingStreams, MuxStream, read_frame};

use crate::context::StreamContext;
use crate::error::BridgeError;
use crate::registry::{DISABLED_TYPES, HandlerRegistry};
use crate::stream::{StreamReader, StreamWriter};

/// Serves inbound streams until the session transport ends.
pub async fn serve(
    mut incoming: IncomingStreams,
    registry: Arc<HandlerRegistry>,
    ctx: StreamContext,
) {
    while let Some(stream) = incoming.next().await {
        let registry = Arc::clone(&registry);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle_stream(&registry, ctx, stream).await;
        });
    }
    debug!("session transport ended; dispatcher stopping");
}

async fn handle_stream(registry: &HandlerRegistry, ctx: StreamContext, stream: MuxStream) {
    let (mut read_half, write_half) = tokio::io::split(stream);

    let frame = match timeout(HANDSHAKE_TIMEOUT, read_frame(&mut read_half)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => return,
        Ok(Err(err)) => {
            debug!(%err, "failed to read opening frame");
            return;
        }
        Err(_) => {
            debug!("opening frame never arrived");
            return;
        }
    };

    let stream_id = frame.stream_id();
    let writer = StreamWriter::new(stream_id, write_half);

    if frame.opcode() != Opcode::Open {
        finish_with_error(
            &writer,
            ErrorCode::Malformed,
            format!("expected an open frame, got {:?}", frame.opcode()),
        )
        .await;
        return;
    }

    let opening = match OpeningPayload::parse(frame.payload()) {
        Ok(opening) => opening,
        Err(err) => {
            finish_with_error(&writer, ErrorCode::Malformed, err.to_string()).await;
            return;
        }
    };

    if DISABLED_TYPES.contains(&opening.stream_type()) {
        finish_with_error(
            &writer,
            ErrorCode::NotFound,
            "direct execution disabled".to_owned(),
        )
        .await;
        return;
    }

    let Some(handler) = registry.get(opening.stream_type()) else {
        finish_with_error(
            &writer,
            ErrorCode::NotFound,
            "unknown stream type".to_owned(),
        )
        .await;
        return;
    };

    debug!(stream = stream_id, stream_type = opening.stream_type(), "dispatching stream");
    let reader = StreamReader::new(stream_id, read_half);
    let invocation = handler.call(ctx, reader, writer.clone(), opening);

    match AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            debug!(stream = stream_id, %err, "handler failed");
            finish_with_error(&writer, err.code(), handler_message(&err)).await;
        }
        Err(_) => {
            error!(stream = stream_id, "handler panicked");
            finish_with_error(&writer, ErrorCode::Internal, "internal".to_owned()).await;
        }
    }
}

/// Keeps timeout and cancellation wording stable on the wire.
fn handler_message(err: &BridgeError) -> String {
    match err {
        BridgeError::Timeout => "timeout".to_owned(),
        BridgeError::Cancelled => "cancelled".to_owned(),
        other => other.to_string(),
    }
}

async fn finish_with_error(writer: &StreamWriter, code: ErrorCode, message: String) {
    let result = ResultPayload::error(code, message);
    if let Err(err) = writer.send_result(&result).await {
        warn!(stream = writer.stream_id(), %err, "failed to send error result");
        return;
    }
    let _ = writer.send_close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionInfo;
    use crate::registry::Handler;
    use crate::rpc::{CommandRouter, RegisteredCommand, bridge_handler};
    use protocol::ResultStatus;
    use protocol::inner::InnerFrame;
    use serde_json::json;
    use std::collections::HashMap;
    use transport::{Multiplex, write_frame};

    fn registry() -> Arc<HandlerRegistry> {
        let mut handlers = HashMap::new();
        handlers.insert("bridge".to_owned(), bridge_handler());
        handlers.insert(
            "boom".to_owned(),
            Handler::new(|_ctx, _reader, _writer, _opening| async {
                panic!("handler exploded");
            }),
        );
        Arc::new(HandlerRegistry::new(handlers))
    }

    fn context() -> StreamContext {
        let mut router = CommandRouter::default();
        router
            .register(
                "docker",
                "list_containers",
                RegisteredCommand::new(|_args| async { Ok(json!(["web"])) }),
            )
            .expect("registers");
        StreamContext::new(
            SessionInfo {
                session_id: "sid".to_owned(),
                privileged: false,
            },
            router,
        )
    }

    struct Rig {
        client: Multiplex,
        _bridge_mux: Multiplex,
    }

    async fn rig() -> Rig {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let (client, _ci) = Multiplex::client(client_io);
        let (bridge_mux, incoming) = Multiplex::server(server_io);
        tokio::spawn(serve(incoming, registry(), context()));
        Rig {
            client,
            _bridge_mux: bridge_mux,
        }
    }

    async fn call(rig: &Rig, stream_id: u32, opening: &'static [u8]) -> Vec<InnerFrame> {
        let mut stream = rig.client.open_stream().await.expect("open");
        let open = InnerFrame::new(Opcode::Open, stream_id, opening).expect("frame");
        write_frame(&mut stream, &open).await.expect("write");

        let mut frames = Vec::new();
        while let Some(frame) = read_frame(&mut stream).await.expect("read") {
            let done = frame.opcode() == Opcode::Close;
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    fn result_of(frames: &[InnerFrame]) -> ResultPayload {
        let frame = frames
            .iter()
            .find(|f| f.opcode() == Opcode::Result)
            .expect("result frame");
        ResultPayload::from_bytes(frame.payload()).expect("payload")
    }

    #[tokio::test]
    async fn routes_bridge_calls_to_the_registry() {
        let rig = rig().await;
        let frames = call(&rig, 1, b"bridge\0docker\0list_containers").await;
        let result = result_of(&frames);
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.data, Some(json!(["web"])));
    }

    #[tokio::test]
    async fn unknown_stream_type_is_not_found() {
        let rig = rig().await;
        let frames = call(&rig, 3, b"mystery\0arg").await;
        let result = result_of(&frames);
        assert_eq!(result.code, Some(ErrorCode::NotFound));
        assert_eq!(result.error.as_deref(), Some("unknown stream type"));
    }

    #[tokio::test]
    async fn direct_execution_types_are_disabled() {
        let rig = rig().await;
        for opening in [&b"command\0exec\0rm -rf /"[..], b"generic_dbus\0anything"] {
            let frames = call(&rig, 5, opening).await;
            let result = result_of(&frames);
            assert_eq!(result.code, Some(ErrorCode::NotFound));
            assert_eq!(result.error.as_deref(), Some("direct execution disabled"));
        }
    }

    #[tokio::test]
    async fn handler_panics_are_contained() {
        let rig = rig().await;
        let frames = call(&rig, 7, b"boom").await;
        let result = result_of(&frames);
        assert_eq!(result.code, Some(ErrorCode::Internal));
        assert_eq!(result.error.as_deref(), Some("internal"));

        // The bridge survives and keeps serving.
        let frames = call(&rig, 9, b"bridge\0docker\0list_containers").await;
        assert_eq!(result_of(&frames).status, ResultStatus::Ok);
    }

    #[tokio::test]
    async fn malformed_opening_payload_is_rejected() {
        let rig = rig().await;
        let frames = call(&rig, 11, b"\0leading-separator").await;
        let result = result_of(&frames);
        assert_eq!(result.code, Some(ErrorCode::Malformed));
    }
}
