//! Server-side failures.

use std::path::PathBuf;

use protocol::ErrorCode;
use transport::TransportError;

/// Failure raised by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket or filesystem failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be read or parsed.
    #[error("config {path}: {reason}")]
    Config {
        /// Offending file.
        path: PathBuf,
        /// Parse or validation failure.
        reason: String,
    },
    /// The auth daemon is unreachable or answered garbage.
    #[error("auth daemon: {0}")]
    AuthDaemon(String),
    /// The auth daemon rejected the login with a failure token.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    /// The session transport to the bridge failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The request referenced an unknown or expired session.
    #[error("unknown or expired session")]
    SessionGone,
}

impl ServerError {
    /// Maps the failure onto the flat wire taxonomy.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) | Self::Config { .. } => ErrorCode::Internal,
            Self::AuthDaemon(_) => ErrorCode::Unavailable,
            Self::AuthRejected(token) => match token.as_str() {
                "rate_limited" => ErrorCode::Unavailable,
                _ => ErrorCode::AuthFailed,
            },
            Self::Transport(err) => err.code(),
            Self::SessionGone => ErrorCode::AuthFailed,
        }
    }

    /// HTTP status surfaced by the login endpoints.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthRejected(token) if token == "bridge_spawn_failed" => 500,
            Self::AuthRejected(token) if token == "rate_limited" => 429,
            other => other.code().http_status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_spawn_failures_surface_as_http_500() {
        let err = ServerError::AuthRejected("bridge_spawn_failed".to_owned());
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn rejected_credentials_surface_as_http_401() {
        let err = ServerError::AuthRejected("auth_failed".to_owned());
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn rate_limiting_surfaces_as_http_429() {
        let err = ServerError::AuthRejected("rate_limited".to_owned());
        assert_eq!(err.http_status(), 429);
    }
}
