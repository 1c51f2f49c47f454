//! Client for the auth daemon's line-framed JSON protocol.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use zeroize::Zeroize as _;

use protocol::{AuthMode, AuthRequest, AuthResponse};

use crate::error::ServerError;

/// Covers PAM, the sudo probe, and the bridge spawn on the daemon side.
const AUTH_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(45);

/// Successful authentication outcome.
#[derive(Debug)]
pub struct AuthOutcome {
    /// Privilege decision from PAM plus the sudo probe.
    pub mode: AuthMode,
    /// Authoritative bridge socket path.
    pub socket_path: String,
}

/// Runs one authenticate exchange against the daemon.
pub async fn authenticate(
    auth_socket: &Path,
    request: AuthRequest,
) -> Result<AuthOutcome, ServerError> {
    let result = timeout(AUTH_EXCHANGE_TIMEOUT, exchange(auth_socket, request)).await;
    match result {
        Ok(outcome) => outcome,
        Err(_) => Err(ServerError::AuthDaemon("exchange timed out".to_owned())),
    }
}

async fn exchange(auth_socket: &Path, request: AuthRequest) -> Result<AuthOutcome, ServerError> {
    let mut stream = UnixStream::connect(auth_socket).await.map_err(|err| {
        ServerError::AuthDaemon(format!("connect {}: {err}", auth_socket.display()))
    })?;

    let mut line = serde_json::to_vec(&request)
        .map_err(|err| ServerError::AuthDaemon(format!("encode request: {err}")))?;
    line.push(b'\n');
    let write_result = stream.write_all(&line).await;
    line.zeroize();
    write_result.map_err(|err| ServerError::AuthDaemon(format!("send request: {err}")))?;

    let mut response_line = String::new();
    BufReader::new(&mut stream)
        .read_line(&mut response_line)
        .await
        .map_err(|err| ServerError::AuthDaemon(format!("read response: {err}")))?;
    if response_line.is_empty() {
        return Err(ServerError::AuthDaemon(
            "daemon closed the connection without answering".to_owned(),
        ));
    }

    let response: AuthResponse = serde_json::from_str(response_line.trim_end())
        .map_err(|err| ServerError::AuthDaemon(format!("parse response: {err}")))?;

    if !response.is_ok() {
        let token = response.error.unwrap_or_else(|| "auth_failed".to_owned());
        return Err(ServerError::AuthRejected(token));
    }
    let mode = response
        .mode
        .ok_or_else(|| ServerError::AuthDaemon("response missing mode".to_owned()))?;
    let socket_path = response
        .socket_path
        .ok_or_else(|| ServerError::AuthDaemon("response missing socket path".to_owned()))?;

    Ok(AuthOutcome { mode, socket_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    async fn fake_daemon(
        dir: &std::path::Path,
        response: &'static str,
    ) -> std::path::PathBuf {
        let socket = dir.join("auth.sock");
        let listener = UnixListener::bind(&socket).expect("bind");
        tokio::spawn(async move {
            let (mut stream, _addr) = listener.accept().await.expect("accept");
            let (read_half, mut write_half) = stream.split();
            let mut request_line = String::new();
            BufReader::new(read_half)
                .read_line(&mut request_line)
                .await
                .expect("read request");
            let request: AuthRequest =
                serde_json::from_str(request_line.trim_end()).expect("parse request");
            assert_eq!(request.action, "authenticate");
            write_half
                .write_all(response.as_bytes())
                .await
                .expect("write response");
        });
        socket
    }

    #[tokio::test]
    async fn successful_exchange_returns_mode_and_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = fake_daemon(
            dir.path(),
            "{\"status\":\"ok\",\"mode\":\"privileged\",\"socket_path\":\"/run/linuxio/0/b.sock\"}\n",
        )
        .await;

        let outcome = authenticate(
            &socket,
            AuthRequest::authenticate("root", "pw", "sid", "leaf.sock"),
        )
        .await
        .expect("succeeds");
        assert_eq!(outcome.mode, AuthMode::Privileged);
        assert_eq!(outcome.socket_path, "/run/linuxio/0/b.sock");
    }

    #[tokio::test]
    async fn rejection_token_is_preserved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = fake_daemon(
            dir.path(),
            "{\"status\":\"error\",\"error\":\"rate_limited\"}\n",
        )
        .await;

        let err = authenticate(
            &socket,
            AuthRequest::authenticate("root", "pw", "sid", "leaf.sock"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::AuthRejected(token) if token == "rate_limited"));
    }

    #[tokio::test]
    async fn unreachable_daemon_is_unavailable() {
        let err = authenticate(
            Path::new("/nonexistent/auth.sock"),
            AuthRequest::authenticate("root", "pw", "sid", "leaf.sock"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::AuthDaemon(_)));
    }
}
