#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `protocol` defines the wire formats shared by the browser-facing server
//! and the per-user bridge process. Everything that crosses a process
//! boundary in the fabric is described here: the outer frame carried in
//! WebSocket binary messages, the inner frame carried on yamux streams, the
//! NUL-separated opening payload that names a stream type, the JSON result
//! and progress envelopes, and the line-framed JSON exchanged with the auth
//! daemon.
//!
//! # Design
//!
//! The codecs are pure functions over byte slices with no I/O attached, so
//! the relay and the bridge can reuse them against any transport. Encoding
//! is infallible once a frame has been constructed; all validation happens
//! at construction and decode time and surfaces as [`FrameError`]. Error
//! classification on the wire uses the flat [`ErrorCode`] taxonomy; the
//! lowest layer that observes a failure attaches the code and upper layers
//! preserve it.
//!
//! # Invariants
//!
//! - `decode(encode(f)) == f` for every constructible frame.
//! - Malformed input is rejected, never partially accepted: short headers,
//!   unknown flag bits, unknown opcodes, and payloads past
//!   [`MAX_FRAME_PAYLOAD`](limits::MAX_FRAME_PAYLOAD) all fail with a
//!   specific [`FrameError`] variant.
//! - Frames carry no checksum; integrity is delegated to TLS on the outer
//!   hop and to yamux on the inner hop.

/// Line-framed JSON types for the server to auth-daemon exchange.
pub mod auth;
/// The flat wire error taxonomy and frame decode errors.
pub mod error;
/// Inner frame codec (server to bridge, carried on yamux streams).
pub mod inner;
/// Protocol constants: payload ceilings, window sizes, default deadlines.
pub mod limits;
/// The 1:1 outer-to-inner frame mapping used by the relay.
pub mod mapping;
/// Opening payload tokenizer and the `bridge` call form.
pub mod opening;
/// Outer frame codec (browser to server, carried in WebSocket messages).
pub mod outer;
/// JSON result and progress envelopes for result-producing streams.
pub mod payload;

pub use auth::{AuthMode, AuthRequest, AuthResponse, BridgeBootstrap};
pub use error::{ErrorCode, FrameError};
pub use inner::{InnerFrame, Opcode};
pub use opening::{BridgeCall, OpeningPayload};
pub use outer::{OuterFlags, OuterFrame};
pub use payload::{ProgressPayload, ResultPayload, ResultStatus};

/// Returns `true` when `stream_id` belongs to the client-originated (odd) half
/// of the identifier space.
#[must_use]
pub const fn is_client_stream(stream_id: u32) -> bool {
    stream_id % 2 == 1
}

/// Returns `true` when `stream_id` belongs to the bridge-originated (even,
/// non-zero) push half of the identifier space.
#[must_use]
pub const fn is_push_stream(stream_id: u32) -> bool {
    stream_id != 0 && stream_id % 2 == 0
}
