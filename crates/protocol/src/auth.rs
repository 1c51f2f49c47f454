//! Line-framed JSON exchanged between the server and the auth daemon.
//!
//! One request and one response per connection, each a single JSON document
//! terminated by a newline on the daemon's Unix socket.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default path of the auth daemon's listening socket.
pub const DEFAULT_AUTH_SOCKET: &str = "/run/linuxio/auth.sock";

/// Default runtime directory holding per-user bridge socket directories.
pub const DEFAULT_RUN_DIR: &str = "/run/linuxio";

/// Group whose members may connect to the auth daemon.
pub const LINUXIO_GROUP: &str = "linuxio";

/// Privilege outcome determined by the auth daemon.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// `sudo -v` succeeded; the bridge may perform administrator operations.
    Privileged,
    /// PAM accepted the credentials but sudo validation failed.
    Unprivileged,
}

/// Authentication request sent by the server.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Always `"authenticate"`.
    pub action: String,
    /// Local OS account name.
    pub user: String,
    /// Password forwarded to PAM; never logged, zeroized by both ends.
    pub password: String,
    /// Session identifier the bridge will adopt.
    pub session_id: String,
    /// Requested socket leaf name; the daemon decides the directory and
    /// returns the authoritative absolute path.
    pub socket_path: String,
}

impl AuthRequest {
    /// Builds an `authenticate` request.
    #[must_use]
    pub fn authenticate(
        user: impl Into<String>,
        password: impl Into<String>,
        session_id: impl Into<String>,
        socket_path: impl Into<String>,
    ) -> Self {
        Self {
            action: "authenticate".to_owned(),
            user: user.into(),
            password: password.into(),
            session_id: session_id.into(),
            socket_path: socket_path.into(),
        }
    }
}

// Hand-written so the password can never leak through debug logging.
impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("action", &self.action)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("socket_path", &self.socket_path)
            .finish()
    }
}

/// Authentication response returned by the daemon.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// `"ok"` or `"error"`.
    pub status: String,
    /// Privilege outcome; present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AuthMode>,
    /// Absolute path of the bridge socket; present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
    /// Failure token (`auth_failed`, `rate_limited`, `bridge_spawn_failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResponse {
    /// Builds a success response.
    #[must_use]
    pub fn ok(mode: AuthMode, socket_path: impl Into<String>) -> Self {
        Self {
            status: "ok".to_owned(),
            mode: Some(mode),
            socket_path: Some(socket_path.into()),
            error: None,
        }
    }

    /// Builds an error response carrying a failure token.
    #[must_use]
    pub fn error(token: impl Into<String>) -> Self {
        Self {
            status: "error".to_owned(),
            mode: None,
            socket_path: None,
            error: Some(token.into()),
        }
    }

    /// Reports whether the daemon accepted the request.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// One-shot bootstrap document the auth daemon writes on the bridge's
/// stdin at spawn.
///
/// The pipe is closed immediately after the single line; the bridge reads
/// it once, stores the privileged flag in an immutable field, and forgets
/// the rest.
#[derive(Clone, Serialize, Deserialize)]
pub struct BridgeBootstrap {
    /// Session identifier assigned at login.
    pub session_id: String,
    /// Immutable privilege outcome from PAM plus the sudo probe.
    pub privileged: bool,
    /// Shared secret echoed during the socket handshake.
    pub secret: String,
}

impl fmt::Debug for BridgeBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBootstrap")
            .field("session_id", &self.session_id)
            .field("privileged", &self.privileged)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_debug_redacts_the_secret() {
        let bootstrap = BridgeBootstrap {
            session_id: "sid".to_owned(),
            privileged: true,
            secret: "topsecret".to_owned(),
        };
        let rendered = format!("{bootstrap:?}");
        assert!(!rendered.contains("topsecret"));
    }

    #[test]
    fn request_serializes_with_wire_field_names() {
        let request = AuthRequest::authenticate("alice", "hunter2", "sid", "leaf.sock");
        let text = serde_json::to_string(&request).expect("serializes");
        assert!(text.contains("\"action\":\"authenticate\""));
        assert!(text.contains("\"session_id\":\"sid\""));
        assert!(text.contains("\"socket_path\":\"leaf.sock\""));
    }

    #[test]
    fn debug_redacts_the_password() {
        let request = AuthRequest::authenticate("alice", "hunter2", "sid", "leaf.sock");
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn ok_response_round_trips() {
        let response = AuthResponse::ok(AuthMode::Privileged, "/run/linuxio/1000/b.sock");
        let back: AuthResponse =
            serde_json::from_str(&serde_json::to_string(&response).expect("serializes"))
                .expect("parses");
        assert!(back.is_ok());
        assert_eq!(back.mode, Some(AuthMode::Privileged));
    }

    #[test]
    fn mode_uses_snake_case_tokens() {
        let text = serde_json::to_string(&AuthMode::Unprivileged).expect("serializes");
        assert_eq!(text, "\"unprivileged\"");
    }

    #[test]
    fn error_response_carries_the_token() {
        let response = AuthResponse::error("rate_limited");
        assert!(!response.is_ok());
        assert_eq!(response.error.as_deref(), Some("rate_limited"));
    }
}
