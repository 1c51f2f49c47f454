#![deny(unsafe_code)]

//! # Overview
//!
//! `bridge` is the per-user child process with direct OS privileges (as
//! permitted). It accepts one connection from the server on a private
//! Unix socket, answers the HELLO handshake with the shared secret, and
//! then serves multiplexed streams: request/response `bridge` calls,
//! persistent `terminal`/`container` PTYs, progress-bearing transfers,
//! and bridge-initiated pushes. All generic execution is gated behind the
//! YAML module loader; there is no ad-hoc command path from the wire.
//!
//! # Design
//!
//! Startup order matters: the bootstrap document (privileged flag plus
//! handshake secret) is read once from stdin, modules are discovered and
//! the registries frozen, the socket is bound, and only then is readiness
//! signalled so the auth daemon's login response implies a connectable
//! socket. The dispatcher runs until the yamux session ends, which is
//! also how logout reaches the bridge: the server closes the session and
//! this process exits.
//!
//! # Invariants
//!
//! - The privileged flag is stored once in [`SessionInfo`] and never
//!   mutated.
//! - The handler registry and command router never change after startup.
//! - A handler failure or panic answers on its own stream; the accept
//!   loop is unaffected.

mod context;
/// Stream dispatch: the accept loop and per-stream routing.
pub mod dispatch;
mod error;
/// Module discovery, validation, and the generic executors.
pub mod modules;
mod push;
/// Stream-type registry and privilege middleware.
pub mod registry;
/// The `bridge` request/response type and command registry.
pub mod rpc;
mod startup;
mod stream;
mod terminal;
mod transfer;
mod upload;

pub use context::{Gates, SessionInfo, StreamContext};
pub use error::BridgeError;
pub use push::PushStreams;
pub use stream::{StreamEvent, StreamReader, StreamWriter};

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::UnixListener;
use tracing::{error, info};

use protocol::limits::LONG_OPERATION_TIMEOUT;

use crate::registry::{Handler, HandlerRegistry, require_privileged};
use crate::rpc::CommandRouter;

/// Command-line arguments of `linuxio-bridge`.
#[derive(Debug, Parser)]
#[command(name = "linuxio-bridge", about = "linuxio per-session bridge")]
struct Args {
    /// Path of the private session socket to bind.
    #[arg(long)]
    socket: PathBuf,
    /// Default log directive when LINUXIO_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Builds the built-in stream-type handler map.
///
/// Also used by the CLI so module validation sees the same reserved
/// names as a running bridge.
#[must_use]
pub fn builtin_handlers() -> HashMap<String, Handler> {
    let mut handlers = HashMap::new();
    handlers.insert("bridge".to_owned(), rpc::bridge_handler());
    handlers.insert("terminal".to_owned(), terminal::terminal_handler());
    handlers.insert(
        "container".to_owned(),
        require_privileged(terminal::container_handler()),
    );
    handlers.insert("fb-upload".to_owned(), upload::upload_handler());
    handlers.insert("fb-download".to_owned(), transfer::download_handler());
    handlers
}

/// Entry point used by the `linuxio-bridge` binary.
pub fn run<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args = match Args::try_parse_from(args) {
        Ok(args) => args,
        Err(err) => {
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

    match runtime.block_on(serve(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "bridge exited");
            ExitCode::FAILURE
        }
    }
}

async fn serve(args: Args) -> Result<(), BridgeError> {
    let bootstrap = startup::read_bootstrap().await?;
    let session = SessionInfo {
        session_id: bootstrap.session_id.clone(),
        privileged: bootstrap.privileged,
    };
    info!(session = %session.session_id, privileged = session.privileged, "bridge starting");

    // Freeze the registries before anything can reach them.
    let handlers = builtin_handlers();
    let registry = HandlerRegistry::new(handlers);
    let discovery = modules::discover(&modules::module_dirs(), |name| registry.is_builtin(name));
    let mut router = CommandRouter::default();
    modules::register_all(&mut router, &discovery.modules)
        .map_err(|err| BridgeError::Internal(err.to_string()))?;
    info!(
        modules = discovery.modules.len(),
        commands = router.len(),
        rejected = discovery.rejected.len(),
        "module registry frozen"
    );
    let registry = Arc::new(registry);
    let ctx = StreamContext::new(session, router);

    let _ = std::fs::remove_file(&args.socket);
    let listener = UnixListener::bind(&args.socket)?;
    {
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(&args.socket, std::fs::Permissions::from_mode(0o660))?;
    }

    startup::signal_ready();

    // Exactly one connection per bridge lifetime: the owning server.
    let accepted = tokio::time::timeout(LONG_OPERATION_TIMEOUT, listener.accept()).await;
    let (mut stream, _addr) = match accepted {
        Ok(Ok(pair)) => pair,
        Ok(Err(err)) => return Err(err.into()),
        Err(_) => {
            return Err(BridgeError::Unavailable(
                "server never connected to the session socket".to_owned(),
            ));
        }
    };
    drop(listener);

    transport::handshake::respond(&mut stream, &bootstrap.session_id, &bootstrap.secret).await?;
    info!(session = %bootstrap.session_id, "session transport established");

    let (mux, incoming) = transport::Multiplex::server(stream);
    let ctx = ctx.with_push(PushStreams::new(mux.clone()));

    tokio::select! {
        () = dispatch::serve(incoming, registry, ctx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; closing session");
            mux.close().await;
        }
    }

    let _ = std::fs::remove_file(&args.socket);
    info!("bridge exiting");
    Ok(())
}
