//! The HELLO/secret exchange performed on the raw socket.
//!
//! Before any multiplexed traffic the server writes one line naming the
//! protocol revision and the session, and the bridge answers with the
//! shared bridge secret it received from the auth daemon at spawn:
//!
//! ```text
//! server -> bridge:  HELLO linuxio/1 <session_id>\n
//! bridge -> server:  <secret>\n
//! ```
//!
//! A mismatch on either line tears the socket down before yamux starts.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use protocol::limits::HANDSHAKE_TIMEOUT;

use crate::error::TransportError;

/// Protocol banner prefix sent by the server.
pub const HELLO_PREFIX: &str = "HELLO linuxio/1";

/// Longest handshake line either side will read.
const MAX_LINE: usize = 512;

/// Server side: announce the session and verify the echoed secret.
pub async fn initiate<S>(
    stream: &mut S,
    session_id: &str,
    secret: &str,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(HANDSHAKE_TIMEOUT, async {
        let hello = format!("{HELLO_PREFIX} {session_id}\n");
        stream.write_all(hello.as_bytes()).await?;
        stream.flush().await?;

        let line = read_line(stream).await?;
        if line != secret {
            return Err(TransportError::BridgeAuthFailed);
        }
        Ok(())
    })
    .await
    .map_err(|_| TransportError::HandshakeTimeout)?
}

/// Bridge side: validate the banner and echo the shared secret.
pub async fn respond<S>(
    stream: &mut S,
    session_id: &str,
    secret: &str,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    timeout(HANDSHAKE_TIMEOUT, async {
        let line = read_line(stream).await?;
        let Some(peer_session) = line.strip_prefix(HELLO_PREFIX).map(str::trim) else {
            return Err(TransportError::HandshakeRejected(format!(
                "unexpected banner {line:?}"
            )));
        };
        if peer_session != session_id {
            return Err(TransportError::HandshakeRejected(format!(
                "banner names session {peer_session:?}"
            )));
        }

        stream.write_all(secret.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    })
    .await
    .map_err(|_| TransportError::HandshakeTimeout)?
}

/// Reads one newline-terminated line, rejecting oversized input.
async fn read_line<S>(stream: &mut S) -> Result<String, TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(TransportError::HandshakeRejected(
                "peer closed mid-handshake".to_owned(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= MAX_LINE {
            return Err(TransportError::HandshakeRejected(
                "handshake line too long".to_owned(),
            ));
        }
        line.push(byte[0]);
    }
    String::from_utf8(line)
        .map_err(|_| TransportError::HandshakeRejected("handshake line is not UTF-8".to_owned()))
}
