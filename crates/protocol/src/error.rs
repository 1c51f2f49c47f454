//! Wire error taxonomy and frame decode failures.
//!
//! [`ErrorCode`] is the single flat classification carried in `Result.code`
//! on the wire. The lowest-level component that observes a failure attaches
//! a code; middle layers preserve it; outer layers may add context strings
//! but never change the code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a failure as reported on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A deadline elapsed before the operation finished.
    Timeout,
    /// PAM rejected the supplied credentials.
    AuthFailed,
    /// The handler required privilege and the session is not privileged.
    PrivilegeDenied,
    /// Handler, stream type, or module command is not registered.
    NotFound,
    /// Frame decode failure or an invalid opening payload.
    Malformed,
    /// Bridge gone, socket closed, yamux broken, or a collaborator is down.
    Unavailable,
    /// Argument validation failed for a module handler.
    InvalidArg,
    /// The stream was aborted by either side.
    Cancelled,
    /// A panic was recovered inside a handler.
    Internal,
}

impl ErrorCode {
    /// Returns the canonical wire token for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::AuthFailed => "auth_failed",
            Self::PrivilegeDenied => "privilege_denied",
            Self::NotFound => "not_found",
            Self::Malformed => "malformed",
            Self::Unavailable => "unavailable",
            Self::InvalidArg => "invalid_arg",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Returns the HTTP-style status the login surface maps this code to.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::AuthFailed => 401,
            Self::PrivilegeDenied => 403,
            Self::NotFound => 404,
            Self::Malformed | Self::InvalidArg => 400,
            Self::Timeout => 504,
            Self::Unavailable => 503,
            Self::Cancelled | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "auth_failed" => Ok(Self::AuthFailed),
            "privilege_denied" => Ok(Self::PrivilegeDenied),
            "not_found" => Ok(Self::NotFound),
            "malformed" => Ok(Self::Malformed),
            "unavailable" => Ok(Self::Unavailable),
            "invalid_arg" => Ok(Self::InvalidArg),
            "cancelled" => Ok(Self::Cancelled),
            "internal" => Ok(Self::Internal),
            _ => Err(UnknownErrorCode(s.to_owned())),
        }
    }
}

/// Error returned when parsing an unrecognized wire error token.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown error code {0:?}")]
pub struct UnknownErrorCode(pub String);

/// Failure to decode an outer or inner frame from raw bytes.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    /// The input ended before the fixed-size header was complete.
    #[error("frame header truncated: {actual} of {expected} bytes")]
    TruncatedHeader {
        /// Bytes actually available.
        actual: usize,
        /// Bytes the header requires.
        expected: usize,
    },
    /// The header announced more payload than the input carries.
    #[error("frame payload truncated: {actual} of {expected} bytes")]
    TruncatedPayload {
        /// Bytes actually available after the header.
        actual: usize,
        /// Bytes the header announced.
        expected: usize,
    },
    /// The declared payload length exceeds [`MAX_FRAME_PAYLOAD`](crate::limits::MAX_FRAME_PAYLOAD).
    #[error("frame payload length {0} exceeds the configured maximum")]
    OversizedPayload(u64),
    /// The outer flags byte carries bits outside the defined set.
    #[error("unknown outer frame flag bits {0:#04x}")]
    UnknownFlags(u8),
    /// The outer flags byte carries no defined bits at all.
    #[error("outer frame carries no flags")]
    EmptyFlags,
    /// The inner opcode byte is not a defined opcode.
    #[error("unknown inner frame opcode {0:#04x}")]
    UnknownOpcode(u8),
    /// An `Open` frame arrived with an empty payload.
    #[error("open frame requires a non-empty payload")]
    EmptyOpen,
    /// The opening payload is not valid UTF-8 or has no type token.
    #[error("invalid opening payload: {0}")]
    InvalidOpening(String),
    /// Decoding consumed the frame but bytes remain in the input.
    #[error("input carries {0} trailing bytes after the frame")]
    TrailingBytes(usize),
}

impl FrameError {
    /// Maps the decode failure onto the wire taxonomy.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::Malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_round_trip_through_from_str() {
        for code in [
            ErrorCode::Timeout,
            ErrorCode::AuthFailed,
            ErrorCode::PrivilegeDenied,
            ErrorCode::NotFound,
            ErrorCode::Malformed,
            ErrorCode::Unavailable,
            ErrorCode::InvalidArg,
            ErrorCode::Cancelled,
            ErrorCode::Internal,
        ] {
            assert_eq!(code.as_str().parse::<ErrorCode>(), Ok(code));
        }
    }

    #[test]
    fn unknown_token_is_rejected() {
        let err = "bogus".parse::<ErrorCode>().unwrap_err();
        assert_eq!(err, UnknownErrorCode("bogus".to_owned()));
    }

    #[test]
    fn serde_uses_the_snake_case_wire_token() {
        let json = serde_json::to_string(&ErrorCode::PrivilegeDenied).expect("serializes");
        assert_eq!(json, "\"privilege_denied\"");
        let back: ErrorCode = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, ErrorCode::PrivilegeDenied);
    }

    #[test]
    fn privilege_denied_maps_to_403() {
        assert_eq!(ErrorCode::PrivilegeDenied.http_status(), 403);
    }
}
