//! Transport failures and their wire classification.

use protocol::{ErrorCode, FrameError};

/// Failure raised by the session transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket-level I/O failure.
    #[error("transport i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A frame failed to decode or validate.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The yamux layer reported a connection failure.
    #[error("multiplexer: {0}")]
    Mux(#[from] yamux::ConnectionError),
    /// The peer answered the handshake with the wrong secret.
    #[error("bridge authentication failed")]
    BridgeAuthFailed,
    /// The handshake line was malformed or named the wrong session.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    /// The handshake did not complete within its deadline.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The session is gone; no further streams can be opened.
    #[error("session transport closed")]
    ConnectionClosed,
    /// The per-session stream limit was reached.
    #[error("stream limit reached")]
    StreamLimit,
}

impl TransportError {
    /// Maps the failure onto the flat wire taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Frame(_) | Self::HandshakeRejected(_) => ErrorCode::Malformed,
            Self::BridgeAuthFailed => ErrorCode::AuthFailed,
            Self::HandshakeTimeout => ErrorCode::Timeout,
            Self::Io(_) | Self::Mux(_) | Self::ConnectionClosed | Self::StreamLimit => {
                ErrorCode::Unavailable
            }
        }
    }
}
