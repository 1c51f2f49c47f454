//! Privilege probe via `sudo -v`.
//!
//! After PAM accepts the credentials, a short-lived `sudo -k -S -v` run as
//! the target user decides whether the session is privileged. The password
//! is written once to the child's stdin and the pipe closed; a non-zero
//! exit or any spawn failure degrades to unprivileged rather than failing
//! the login.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use zeroize::Zeroizing;

use protocol::AuthMode;
use protocol::limits::PAM_TIMEOUT;

/// Probes sudo validation for `user`, returning the session mode.
pub async fn probe(user: &str, uid: u32, gid: u32, password: &Zeroizing<String>) -> AuthMode {
    let mut command = Command::new("sudo");
    command
        .arg("-k")
        .arg("-S")
        .arg("-v")
        .uid(uid)
        .gid(gid)
        .env_clear()
        .env("USER", user)
        .env("PATH", "/usr/sbin:/usr/bin:/sbin:/bin")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            debug!(%err, user, "sudo probe failed to spawn");
            return AuthMode::Unprivileged;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let line = Zeroizing::new(format!("{}\n", password.as_str()));
        if stdin.write_all(line.as_bytes()).await.is_err() {
            // sudo may exit before reading when the user has no sudo rights.
            debug!(user, "sudo probe closed stdin early");
        }
        drop(stdin);
    }

    match timeout(PAM_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => AuthMode::Privileged,
        Ok(_) => AuthMode::Unprivileged,
        Err(_) => {
            let _ = child.start_kill();
            debug!(user, "sudo probe timed out");
            AuthMode::Unprivileged
        }
    }
}
