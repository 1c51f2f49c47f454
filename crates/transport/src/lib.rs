#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `transport` carries inner frames between the server and a per-user
//! bridge over one yamux session on the bridge's Unix socket. Both
//! endpoints use the same pieces: the [`handshake`] exchanged on the raw
//! socket before multiplexing starts, the [`Multiplex`](mux::Multiplex)
//! wrapper that drives a yamux connection from a background task, and the
//! [`framed`] helpers that read and write length-delimited inner frames on
//! an individual stream.
//!
//! # Design
//!
//! yamux's connection object wants to be polled from a single place, so the
//! wrapper spawns one driver task per session and hands out cheap handles:
//! stream opens travel over a command channel, inbound streams arrive on a
//! bounded channel with backpressure (the driver stops accepting when the
//! consumer lags). When the connection dies the driver drops both channels,
//! which every handle observes as [`TransportError::ConnectionClosed`].
//!
//! # Invariants
//!
//! - A handshake failure never yields a usable session; the socket is
//!   dropped before any yamux traffic.
//! - Stream opens past the per-session limit surface as
//!   [`TransportError::StreamLimit`], mapped to the `unavailable` wire code.
//! - Dropping a [`MuxStream`] without a clean close resets it, which the
//!   peer observes as an abort.

/// Error type shared by the transport pieces.
pub mod error;
/// Inner-frame I/O over an individual stream.
pub mod framed;
/// The pre-multiplexing HELLO/secret exchange.
pub mod handshake;
/// The yamux session wrapper and its driver task.
pub mod mux;

pub use error::TransportError;
pub use framed::{read_frame, write_frame};
pub use mux::{IncomingStreams, Multiplex, MuxStream};
