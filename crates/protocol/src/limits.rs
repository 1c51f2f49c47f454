//! Compile-time protocol constants.
//!
//! The window and chunk sizes are fixed rather than negotiated per stream;
//! both endpoints compile against the same values.

use std::time::Duration;

/// Largest payload accepted in a single outer or inner frame.
pub const MAX_FRAME_PAYLOAD: u32 = 16 * 1024 * 1024;

/// Chunk size used by the upload handler and expected from upload clients.
pub const UPLOAD_CHUNK_SIZE: u32 = 1024 * 1024;

/// Maximum number of unacknowledged upload bytes in flight.
pub const UPLOAD_WINDOW_SIZE: u64 = 4 * 1024 * 1024;

/// The upload handler acknowledges received bytes at this interval.
pub const UPLOAD_ACK_INTERVAL: u64 = 512 * 1024;

/// Largest data frame emitted by the PTY pump.
pub const PTY_CHUNK_SIZE: usize = 32 * 1024;

/// Upper bound on concurrent streams per yamux session.
pub const MAX_STREAMS_PER_SESSION: usize = 256;

/// Deadline for a request/response (`bridge`) stream.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for spawn-heavy and long-running operations.
pub const LONG_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// An upload stream is aborted after this much inactivity.
pub const UPLOAD_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Deadline for a PAM authentication exchange.
pub const PAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the bridge socket handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for module-declared commands without `timeout_s`.
pub const MODULE_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
