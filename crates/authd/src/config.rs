//! Auth daemon configuration.
//!
//! The daemon reads the same `/etc/linuxio/config.yaml` as the server but
//! only for the fields it needs: the shared bridge secret and the bridge
//! binary location. Socket and runtime-directory paths come from the
//! command line with production defaults.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AuthdError;

fn default_bridge_binary() -> PathBuf {
    PathBuf::from("/usr/libexec/linuxio/linuxio-bridge")
}

fn default_run_dir() -> PathBuf {
    PathBuf::from(protocol::auth::DEFAULT_RUN_DIR)
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    /// Shared secret echoed by bridges during the socket handshake.
    secret: String,
    #[serde(default = "default_bridge_binary")]
    bridge_binary: PathBuf,
    #[serde(default = "default_run_dir")]
    run_dir: PathBuf,
}

/// Resolved daemon configuration.
#[derive(Clone, Debug)]
pub struct AuthdConfig {
    /// Listening socket path.
    pub socket_path: PathBuf,
    /// Shared bridge secret handed to spawned bridges.
    pub secret: String,
    /// Bridge binary to execute per session.
    pub bridge_binary: PathBuf,
    /// Directory that receives per-uid socket subdirectories.
    pub run_dir: PathBuf,
    /// Group admitted to the socket.
    pub group: String,
}

impl AuthdConfig {
    /// Loads the daemon configuration from `config_path`.
    pub fn load(config_path: &OsStr, socket_path: &OsStr) -> Result<Self, AuthdError> {
        let path = Path::new(config_path);
        let raw = std::fs::read_to_string(path).map_err(|err| AuthdError::Config {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        let file: ConfigFile = serde_yaml::from_str(&raw).map_err(|err| AuthdError::Config {
            path: path.to_owned(),
            reason: err.to_string(),
        })?;
        if file.secret.is_empty() {
            return Err(AuthdError::Config {
                path: path.to_owned(),
                reason: "secret must not be empty".to_owned(),
            });
        }
        Ok(Self {
            socket_path: PathBuf::from(socket_path),
            secret: file.secret,
            bridge_binary: file.bridge_binary,
            run_dir: file.run_dir,
            group: protocol::auth::LINUXIO_GROUP.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::io::Write as _;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn loads_secret_and_defaults() {
        let file = write_config("secret: abc123\n");
        let config = AuthdConfig::load(
            file.path().as_os_str(),
            OsString::from("/tmp/auth.sock").as_os_str(),
        )
        .expect("loads");
        assert_eq!(config.secret, "abc123");
        assert_eq!(
            config.bridge_binary,
            PathBuf::from("/usr/libexec/linuxio/linuxio-bridge")
        );
        assert_eq!(config.run_dir, PathBuf::from("/run/linuxio"));
    }

    #[test]
    fn rejects_empty_secret() {
        let file = write_config("secret: \"\"\n");
        let err = AuthdConfig::load(
            file.path().as_os_str(),
            OsString::from("/tmp/auth.sock").as_os_str(),
        )
        .unwrap_err();
        assert!(matches!(err, AuthdError::Config { .. }));
    }

    #[test]
    fn rejects_missing_file() {
        let err = AuthdConfig::load(
            OsString::from("/nonexistent/config.yaml").as_os_str(),
            OsString::from("/tmp/auth.sock").as_os_str(),
        )
        .unwrap_err();
        assert!(matches!(err, AuthdError::Config { .. }));
    }

    #[test]
    fn honours_explicit_bridge_binary() {
        let file = write_config("secret: abc\nbridge_binary: /opt/linuxio/bridge\n");
        let config = AuthdConfig::load(
            file.path().as_os_str(),
            OsString::from("/tmp/auth.sock").as_os_str(),
        )
        .expect("loads");
        assert_eq!(config.bridge_binary, PathBuf::from("/opt/linuxio/bridge"));
    }
}
