//! Auth daemon failures.

use std::path::PathBuf;

/// Failure raised inside the auth daemon.
#[derive(Debug, thiserror::Error)]
pub enum AuthdError {
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
    /// The `linuxio` group does not exist on this host.
    #[error("group {0:?} is not defined on this host")]
    GroupMissing(String),
    /// Unix account or group lookup failed.
    #[error("account lookup: {0}")]
    Lookup(#[from] nix::errno::Errno),
    /// PAM rejected the credentials or the PAM stack failed.
    #[error("pam: {0}")]
    Pam(String),
    /// The PAM worker thread is gone.
    #[error("pam worker unavailable")]
    PamWorkerGone,
    /// The bridge process could not be spawned or never became ready.
    #[error("bridge spawn: {0}")]
    BridgeSpawn(String),
    /// A client sent a malformed request line.
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}
