//! The accept loop and per-connection protocol.
//!
//! One connection, one line-framed JSON request, one response. Peer
//! admission happens before the first byte is read; rate limiting happens
//! before PAM is consulted.

use std::os::unix::fs::PermissionsExt as _;
use std::sync::Arc;

use nix::unistd::{Gid, User};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use protocol::{AuthRequest, AuthResponse};

use crate::config::AuthdConfig;
use crate::error::AuthdError;
use crate::pam_worker::{PAM_SERVICE, PamCheck, PamWorker};
use crate::peer;
use crate::ratelimit::RateLimiter;
use crate::spawn::{SpawnRequest, spawn_bridge};
use crate::sudo;

/// Longest request line the daemon will read.
const MAX_REQUEST_LINE: u64 = 64 * 1024;

struct Shared {
    config: AuthdConfig,
    linuxio_gid: Gid,
    limiter: RateLimiter,
    pam: PamWorker,
}

/// The bound auth daemon, ready to serve.
pub struct AuthDaemon {
    listener: UnixListener,
    shared: Arc<Shared>,
}

impl AuthDaemon {
    /// Binds the listening socket and applies its ownership and mode.
    ///
    /// Fails fast when the `linuxio` group is missing or the socket cannot
    /// be restricted to `0660 root:linuxio`; serving with a wide-open
    /// socket is worse than not starting.
    pub fn bind(config: AuthdConfig) -> Result<Self, AuthdError> {
        let linuxio_gid = peer::resolve_group(&config.group)?;

        if let Some(parent) = config.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(&config.socket_path) {
            Ok(()) => debug!(path = %config.socket_path.display(), "removed stale auth socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let listener = UnixListener::bind(&config.socket_path)?;
        std::fs::set_permissions(
            &config.socket_path,
            std::fs::Permissions::from_mode(0o660),
        )?;
        nix::unistd::chown(&config.socket_path, None, Some(linuxio_gid))?;

        let pam = PamWorker::spawn(PamCheck::new(PAM_SERVICE));
        info!(path = %config.socket_path.display(), "auth daemon listening");

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                config,
                linuxio_gid,
                limiter: RateLimiter::default_policy(),
                pam,
            }),
        })
    }

    /// Serves connections until SIGINT or SIGTERM.
    pub async fn serve(self) -> Result<(), AuthdError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let shared = Arc::clone(&self.shared);
                            tokio::spawn(async move {
                                handle_connection(shared, stream).await;
                            });
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    }
                }
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
            }
        }

        info!("auth daemon shutting down");
        let _ = std::fs::remove_file(&self.shared.config.socket_path);
        Ok(())
    }
}

async fn handle_connection(shared: Arc<Shared>, mut stream: UnixStream) {
    let Ok(cred) = stream.peer_cred() else {
        return;
    };
    match peer::peer_allowed(cred.uid(), cred.gid(), shared.linuxio_gid) {
        Ok(true) => {}
        Ok(false) => {
            // Not in the linuxio group: close without a response.
            warn!(uid = cred.uid(), "rejected peer outside the linuxio group");
            return;
        }
        Err(err) => {
            warn!(%err, "peer admission check failed");
            return;
        }
    }

    let response = match serve_request(&shared, &mut stream, cred.uid()).await {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, "request failed");
            response_for_error(&err)
        }
    };
    write_response(&mut stream, &response).await;
}

async fn serve_request(
    shared: &Shared,
    stream: &mut UnixStream,
    peer_uid: u32,
) -> Result<AuthResponse, AuthdError> {
    let (read_half, _write_half) = stream.split();
    let mut line = String::new();
    BufReader::new(read_half)
        .take(MAX_REQUEST_LINE)
        .read_line(&mut line)
        .await?;

    let request: AuthRequest = serde_json::from_str(line.trim_end())
        .map_err(|err| AuthdError::MalformedRequest(err.to_string()))?;
    if request.action != "authenticate" {
        return Err(AuthdError::MalformedRequest(format!(
            "unsupported action {:?}",
            request.action
        )));
    }

    if !shared.limiter.allow(peer_uid) {
        return Ok(AuthResponse::error("rate_limited"));
    }

    let password = Zeroizing::new(request.password);

    if let Err(err) = shared
        .pam
        .verify(&request.user, password.clone())
        .await
    {
        debug!(user = %request.user, %err, "pam rejected login");
        return Ok(AuthResponse::error("auth_failed"));
    }

    let Some(account) = User::from_name(&request.user)? else {
        return Ok(AuthResponse::error("auth_failed"));
    };

    let mode = sudo::probe(
        &request.user,
        account.uid.as_raw(),
        account.gid.as_raw(),
        &password,
    )
    .await;
    drop(password);

    let socket_path = spawn_bridge(
        &shared.config,
        shared.linuxio_gid,
        SpawnRequest {
            session_id: request.session_id,
            requested_leaf: request.socket_path,
            user: request.user.clone(),
            uid: account.uid.as_raw(),
            gid: account.gid.as_raw(),
            home: account.dir,
            privileged: mode == protocol::AuthMode::Privileged,
        },
    )
    .await?;

    info!(user = %request.user, ?mode, "session authenticated");
    Ok(AuthResponse::ok(mode, socket_path.display().to_string()))
}

fn response_for_error(err: &AuthdError) -> AuthResponse {
    match err {
        AuthdError::Pam(_) | AuthdError::PamWorkerGone => AuthResponse::error("auth_failed"),
        AuthdError::BridgeSpawn(_) => AuthResponse::error("bridge_spawn_failed"),
        AuthdError::MalformedRequest(_) => AuthResponse::error("malformed"),
        _ => AuthResponse::error("internal"),
    }
}

async fn write_response(stream: &mut UnixStream, response: &AuthResponse) {
    let Ok(mut bytes) = serde_json::to_vec(response) else {
        return;
    };
    bytes.push(b'\n');
    if let Err(err) = stream.write_all(&bytes).await {
        debug!(%err, "failed to write response");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_failures_map_to_bridge_spawn_failed() {
        let response = response_for_error(&AuthdError::BridgeSpawn("boom".to_owned()));
        assert_eq!(response.error.as_deref(), Some("bridge_spawn_failed"));
    }

    #[test]
    fn pam_failures_map_to_auth_failed() {
        let response = response_for_error(&AuthdError::Pam("denied".to_owned()));
        assert_eq!(response.error.as_deref(), Some("auth_failed"));
    }
}
