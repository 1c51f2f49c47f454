//! Bridge process spawning.
//!
//! Each successful authentication spawns one bridge with a private socket
//! under `<run_dir>/<uid>/`. The directory is setgid `linuxio` so the
//! socket the bridge binds inherits a group the unprivileged server can
//! connect through. The privileged flag and the shared handshake secret
//! travel on the bridge's stdin as a single JSON line; the pipe is closed
//! immediately afterwards. The spawn completes only once the bridge
//! reports readiness on its stdout.

use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::unistd::{Gid, Uid, chown};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use protocol::BridgeBootstrap;

use crate::config::AuthdConfig;
use crate::error::AuthdError;

/// How long the daemon waits for the bridge's readiness line.
pub const BRIDGE_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the spawner needs to know about the authenticated session.
pub struct SpawnRequest {
    /// Session identifier the bridge adopts.
    pub session_id: String,
    /// Socket leaf name requested by the server; sanitized before use.
    pub requested_leaf: String,
    /// Account name, used for the bridge's environment.
    pub user: String,
    /// Account uid.
    pub uid: u32,
    /// Account primary gid.
    pub gid: u32,
    /// Home directory for `$HOME` in the bridge's environment.
    pub home: PathBuf,
    /// Whether the session is privileged.
    pub privileged: bool,
}

/// Spawns a bridge for the session, returning the socket path once the
/// bridge signals readiness.
pub async fn spawn_bridge(
    config: &AuthdConfig,
    linuxio_gid: Gid,
    request: SpawnRequest,
) -> Result<PathBuf, AuthdError> {
    let socket_path = prepare_socket_dir(config, linuxio_gid, &request)?;

    let mut command = Command::new(&config.bridge_binary);
    command
        .arg("--socket")
        .arg(&socket_path)
        .env_clear()
        .env("HOME", &request.home)
        .env("USER", &request.user)
        .env("PATH", "/usr/sbin:/usr/bin:/sbin:/bin")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    // A privileged session keeps the daemon's root identity; everything
    // else drops to the authenticated account before exec.
    if !request.privileged {
        command.uid(request.uid).gid(request.gid);
    }

    let mut child = command
        .spawn()
        .map_err(|err| AuthdError::BridgeSpawn(format!("exec {:?}: {err}", config.bridge_binary)))?;

    let bootstrap = BridgeBootstrap {
        session_id: request.session_id.clone(),
        privileged: request.privileged,
        secret: config.secret.clone(),
    };
    let mut line = serde_json::to_vec(&bootstrap)
        .map_err(|err| AuthdError::BridgeSpawn(format!("encode bootstrap: {err}")))?;
    line.push(b'\n');

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&line)
            .await
            .map_err(|err| AuthdError::BridgeSpawn(format!("write bootstrap: {err}")))?;
        // Closing the pipe is part of the contract: the bridge reads the
        // document exactly once and never sees the descriptor again.
        drop(stdin);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AuthdError::BridgeSpawn("bridge stdout not captured".to_owned()))?;
    let mut reader = BufReader::new(stdout);
    let mut ready = String::new();
    match timeout(BRIDGE_READY_TIMEOUT, reader.read_line(&mut ready)).await {
        Ok(Ok(n)) if n > 0 => {}
        Ok(Ok(_)) => {
            let _ = child.start_kill();
            return Err(AuthdError::BridgeSpawn(
                "bridge exited before signalling readiness".to_owned(),
            ));
        }
        Ok(Err(err)) => {
            let _ = child.start_kill();
            return Err(AuthdError::BridgeSpawn(format!("read readiness: {err}")));
        }
        Err(_) => {
            let _ = child.start_kill();
            return Err(AuthdError::BridgeSpawn(
                "bridge readiness timed out".to_owned(),
            ));
        }
    }

    let session_id = request.session_id;
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => info!(session = %session_id, %status, "bridge exited"),
            Err(err) => warn!(session = %session_id, %err, "bridge reap failed"),
        }
    });

    Ok(socket_path)
}

fn prepare_socket_dir(
    config: &AuthdConfig,
    linuxio_gid: Gid,
    request: &SpawnRequest,
) -> Result<PathBuf, AuthdError> {
    let dir = config.run_dir.join(request.uid.to_string());
    std::fs::create_dir_all(&dir)?;
    chown(&dir, Some(Uid::from_raw(request.uid)), Some(linuxio_gid))?;
    // Setgid so the socket the bridge binds inherits the linuxio group.
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o2770))?;

    let leaf = sanitize_leaf(&request.requested_leaf, &request.session_id);
    let socket_path = dir.join(leaf);
    match std::fs::remove_file(&socket_path) {
        Ok(()) => debug!(path = %socket_path.display(), "removed stale bridge socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(socket_path)
}

/// Accepts the requested leaf name only when it is a plain file name.
fn sanitize_leaf(requested: &str, session_id: &str) -> String {
    let candidate = Path::new(requested);
    let is_plain = !requested.is_empty()
        && candidate.components().count() == 1
        && candidate.file_name().is_some_and(|name| name == requested);
    if is_plain {
        requested.to_owned()
    } else {
        format!("linuxio-bridge-{session_id}.sock")
    }
}
