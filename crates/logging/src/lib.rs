#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Shared tracing initialization.
//!
//! All three binaries (server, auth daemon, bridge) install the same
//! subscriber shape: an `EnvFilter` honouring `LINUXIO_LOG`, falling back to
//! the level supplied by configuration or the command line. Passwords and
//! bridge secrets never reach a log record; the wire types redact them
//! before `Debug` formatting can see them.

use std::io::IsTerminal as _;

use tracing_subscriber::EnvFilter;

/// Environment variable consulted for a filter directive override.
pub const LOG_ENV: &str = "LINUXIO_LOG";

/// Installs the global subscriber.
///
/// `default_directive` is used when [`LOG_ENV`] is unset, e.g. `"info"` or
/// `"linuxio=debug"`. Returns `false` when a global subscriber was already
/// installed (tests set their own), which callers may ignore.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_reports_failure_instead_of_panicking() {
        init("info");
        assert!(!init("debug"));
    }
}
