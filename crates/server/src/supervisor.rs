//! Background supervision: crash watchers and the idle reaper.
//!
//! A bridge is never resurrected transparently. When its transport dies
//! the session is removed and the client must re-authenticate; when a
//! session sits idle past the configured timeout it is closed the same
//! way.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};

use crate::http::AppState;
use crate::session::Session;

/// How often the reaper scans for idle sessions.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Watches one session's transport and removes the session when it dies.
pub fn watch_session(state: Arc<AppState>, session: Arc<Session>) {
    tokio::spawn(async move {
        session.mux.closed().await;
        // Logout closes the transport too; teardown is idempotent, so the
        // crash path and the logout path can safely race.
        warn!(session = %session.id, user = %session.user, "bridge transport ended");
        state.sessions.teardown(&session.id).await;
    });
}

/// Runs the idle reaper until the server shuts down.
pub async fn reap_idle(state: Arc<AppState>) {
    let timeout = state.config.idle_timeout();
    let mut ticker = interval(REAP_INTERVAL);
    loop {
        ticker.tick().await;
        for session in state.sessions.idle_sessions(timeout) {
            info!(session = %session.id, user = %session.user, "reaping idle session");
            state.sessions.teardown(&session.id).await;
        }
    }
}

/// Closes every session; used on graceful shutdown.
pub async fn teardown_all(state: &Arc<AppState>) {
    for session in state.sessions.all() {
        state.sessions.teardown(&session.id).await;
    }
}
