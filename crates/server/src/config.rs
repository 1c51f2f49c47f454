//! Server configuration.
//!
//! `/etc/linuxio/config.yaml` is the single persisted server state. It
//! holds the listen address, the auth-daemon socket, the shared bridge
//! secret, and session policy. Everything has a production default except
//! the secret, which must be present and non-empty.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ServerError;

fn default_listen() -> String {
    "127.0.0.1:8090".to_owned()
}

fn default_auth_socket() -> PathBuf {
    PathBuf::from(protocol::auth::DEFAULT_AUTH_SOCKET)
}

fn default_idle_timeout_s() -> u64 {
    30 * 60
}

/// Parsed and validated server configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// TCP address the HTTP server binds.
    ///
    /// TLS is terminated in front of this address; the fabric itself
    /// never speaks TLS.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Auth daemon socket path.
    #[serde(default = "default_auth_socket")]
    pub auth_socket: PathBuf,
    /// Shared bridge secret, also used by the auth daemon.
    pub secret: String,
    /// Sessions idle longer than this are torn down.
    #[serde(default = "default_idle_timeout_s")]
    pub session_idle_timeout_s: u64,
    /// Socket probed at login for the `indexer_available` hint.
    #[serde(default)]
    pub indexer_socket: Option<PathBuf>,
}

impl ServerConfig {
    /// Loads the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ServerError::Config {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        let config: Self = serde_yaml::from_str(&raw).map_err(|err| ServerError::Config {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        if config.secret.is_empty() {
            return Err(ServerError::Config {
                path: path.to_owned(),
                reason: "secret must not be empty".to_owned(),
            });
        }
        Ok(config)
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_s)
    }

    /// Probes the indexer hint for the login response.
    #[must_use]
    pub fn indexer_available(&self) -> bool {
        self.indexer_socket
            .as_deref()
            .is_some_and(|socket| socket.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config("secret: abc\n");
        let config = ServerConfig::load(file.path()).expect("loads");
        assert_eq!(config.listen, "127.0.0.1:8090");
        assert_eq!(config.auth_socket, PathBuf::from("/run/linuxio/auth.sock"));
        assert_eq!(config.idle_timeout(), Duration::from_secs(1800));
        assert!(!config.indexer_available());
    }

    #[test]
    fn missing_secret_is_rejected() {
        let file = write_config("listen: 0.0.0.0:80\n");
        assert!(matches!(
            ServerConfig::load(file.path()).unwrap_err(),
            ServerError::Config { .. }
        ));
    }

    #[test]
    fn indexer_hint_reflects_socket_existence() {
        let marker = tempfile::NamedTempFile::new().expect("temp file");
        let yaml = format!("secret: abc\nindexer_socket: {}\n", marker.path().display());
        let file = write_config(&yaml);
        let config = ServerConfig::load(file.path()).expect("loads");
        assert!(config.indexer_available());
    }
}
