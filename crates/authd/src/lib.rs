#![deny(unsafe_code)]

//! # Overview
//!
//! `authd` is the only privileged process in the fabric. It listens on a
//! root-owned Unix socket, authenticates login requests against PAM,
//! probes `sudo -v` to classify the session as privileged or not, and
//! spawns one bridge process per session with a private socket under
//! `/run/linuxio/<uid>/`. The unprivileged server delegates every login to
//! this daemon and never escalates its own privileges.
//!
//! # Design
//!
//! One connection carries one line-framed JSON request and one response.
//! Peer admission is decided from `SO_PEERCRED` before any bytes are read:
//! only members of the `linuxio` group (and root) may talk to the daemon.
//! PAM is not thread-safe, so all authentications drain through a single
//! worker thread; the sudo probe and the bridge spawn run on the async
//! side afterwards.
//!
//! # Invariants
//!
//! - Passwords are zeroized as soon as the sudo probe finishes and are
//!   never logged.
//! - The privileged flag reaches the bridge only through its one-shot
//!   stdin document.
//! - A sudo failure still authenticates the session, just unprivileged;
//!   only PAM decides acceptance.
//! - The daemon keeps no per-session state beyond the live bridge
//!   children it reaps.

mod config;
mod daemon;
mod error;
mod pam_worker;
mod peer;
mod ratelimit;
mod spawn;
mod sudo;

pub use config::AuthdConfig;
pub use daemon::AuthDaemon;
pub use error::AuthdError;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;

/// Command-line arguments of `linuxio-auth`.
#[derive(Debug, Parser)]
#[command(name = "linuxio-auth", about = "linuxio privileged auth daemon")]
struct Args {
    /// Path of the listening socket.
    #[arg(long, default_value = protocol::auth::DEFAULT_AUTH_SOCKET)]
    socket: OsString,
    /// Server configuration file (read for the shared bridge secret).
    #[arg(long, default_value = "/etc/linuxio/config.yaml")]
    config: OsString,
    /// Default log directive when LINUXIO_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Entry point used by the `linuxio-auth` binary.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match Args::try_parse_from(args) {
        Ok(args) => args,
        Err(err) => {
            // Clap renders usage and help itself.
            let _ = err.print();
            return ExitCode::from(2);
        }
    };

    logging::init(&args.log);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let config = AuthdConfig::load(args.config.as_os_str(), args.socket.as_os_str())?;
        AuthDaemon::bind(config)?.serve().await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "auth daemon exited");
            ExitCode::FAILURE
        }
    }
}
