#![deny(unsafe_code)]

//! # Overview
//!
//! `server` is the unprivileged dashboard server. It terminates the
//! browser side of the fabric: HTTP login and logout, the per-session
//! WebSocket, and the byte-copying relay onto each user's bridge. It
//! holds no privileges of its own; every login is delegated to the root
//! auth daemon over a Unix socket, and all privileged work happens in the
//! per-user bridge processes.
//!
//! # Design
//!
//! State is two maps: sessions by id and cookie tokens by value, both on
//! a sharded concurrent map written only at login and logout. Each
//! session owns one yamux transport; the relay copies frames 1:1 between
//! WebSocket messages and yamux substreams without reading payloads.
//! Supervision is pessimistic: a dead bridge removes the session, and
//! clients re-authenticate.
//!
//! # Invariants
//!
//! - `Session.privileged` is set once at login from the auth daemon's
//!   answer and never written again.
//! - The server never escalates: no PAM, no sudo, no root sockets.
//! - A bridge crash tears down its session but never the server.

/// Auth daemon client.
pub mod authc;
/// YAML configuration.
pub mod config;
mod error;
/// HTTP routes and router assembly.
pub mod http;
/// The WebSocket relay.
pub mod relay;
/// Session state and the session map.
pub mod session;
/// Crash watchers and the idle reaper.
pub mod supervisor;

pub use config::ServerConfig;
pub use error::ServerError;
pub use http::{AppState, SESSION_COOKIE, router};
pub use session::{Session, SessionMap};

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

/// Runs the server until SIGINT or SIGTERM.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "server listening");

    let state = Arc::new(AppState {
        config,
        sessions: SessionMap::default(),
    });

    tokio::spawn(supervisor::reap_idle(Arc::clone(&state)));

    #[cfg(all(target_os = "linux", feature = "sd-notify"))]
    {
        let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);
    }

    let app = router(Arc::clone(&state));
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            info!("shutting down; closing sessions");
            supervisor::teardown_all(&shutdown_state).await;
        })
        .await?;

    Ok(())
}

async fn wait_for_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(_) => return,
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sigint) => sigint,
        Err(_) => return,
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
