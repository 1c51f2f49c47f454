//! Bridge-side failures and their wire classification.

use protocol::{ErrorCode, FrameError};
use transport::TransportError;

/// Failure raised while serving a stream or executing a handler.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Filesystem or process I/O failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A frame failed to decode or validate.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The session transport failed underneath the stream.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A deadline elapsed.
    #[error("timeout")]
    Timeout,
    /// The stream was aborted or cooperatively cancelled by the client.
    #[error("cancelled")]
    Cancelled,
    /// No handler or command is registered under the requested name.
    #[error("{0}")]
    NotFound(String),
    /// The handler requires privilege and the session is unprivileged.
    #[error("operation requires administrator privileges")]
    PrivilegeDenied,
    /// Argument validation failed.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    /// The request violated the stream protocol.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// A collaborator (PTY, DBus bus, child process) is unavailable.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// An unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Maps the failure onto the flat wire taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) | Self::Internal(_) => ErrorCode::Internal,
            Self::Frame(_) | Self::Malformed(_) => ErrorCode::Malformed,
            Self::Transport(err) => err.code(),
            Self::Timeout => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::PrivilegeDenied => ErrorCode::PrivilegeDenied,
            Self::InvalidArg(_) => ErrorCode::InvalidArg,
            Self::Unavailable(_) => ErrorCode::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_denial_carries_the_403_wording() {
        let err = BridgeError::PrivilegeDenied;
        assert_eq!(err.to_string(), "operation requires administrator privileges");
        assert_eq!(err.code(), ErrorCode::PrivilegeDenied);
    }

    #[test]
    fn transport_failures_keep_their_own_classification() {
        let err = BridgeError::Transport(TransportError::StreamLimit);
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }
}
