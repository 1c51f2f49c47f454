//! Bridge bootstrap: the one-shot stdin document and readiness signal.

use tokio::io::{AsyncBufReadExt, BufReader};
use zeroize::Zeroize as _;

use protocol::BridgeBootstrap;

use crate::error::BridgeError;

/// Reads the bootstrap document the auth daemon wrote on stdin.
///
/// The document arrives exactly once; the raw line is wiped after parsing
/// because it carries the handshake secret.
pub async fn read_bootstrap() -> Result<BridgeBootstrap, BridgeError> {
    let mut line = String::new();
    let mut reader = BufReader::new(tokio::io::stdin());
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(BridgeError::Malformed(
            "stdin closed before the bootstrap document".to_owned(),
        ));
    }
    let bootstrap = serde_json::from_str(line.trim_end())
        .map_err(|err| BridgeError::Malformed(format!("bootstrap document: {err}")));
    line.zeroize();
    bootstrap
}

/// Signals readiness to the auth daemon.
///
/// The daemon blocks its login response on this newline, so it must be
/// written only after the listening socket is bound.
pub fn signal_ready() {
    use std::io::Write as _;
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(b"ready\n");
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_document_round_trips_through_json() {
        let document = r#"{"session_id":"sid-1","privileged":true,"secret":"s3cret"}"#;
        let bootstrap: BridgeBootstrap = serde_json::from_str(document).expect("parses");
        assert_eq!(bootstrap.session_id, "sid-1");
        assert!(bootstrap.privileged);
        assert_eq!(bootstrap.secret, "s3cret");
    }
}
