//! Session state and the server-wide session map.
//!
//! A session owns its bridge: the yamux transport handle, the socket
//! path, and the immutable privilege decision. The map is written only at
//! login and logout and read on every frame, so it lives in a sharded
//! concurrent map.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use transport::{IncomingStreams, Multiplex};

/// One authenticated user session.
pub struct Session {
    /// Session identifier, stable for the bridge's process lifetime.
    pub id: String,
    /// Local account name.
    pub user: String,
    /// Immutable privilege decision from the auth daemon.
    pub privileged: bool,
    /// Bridge socket path, for diagnostics.
    pub socket_path: PathBuf,
    /// Transport to the bridge.
    pub mux: Multiplex,
    /// Bridge-initiated streams; taken by the relay when the WebSocket
    /// attaches (one WebSocket per session).
    pub incoming: AsyncMutex<Option<IncomingStreams>>,
    /// When the session was established.
    pub created_at: Instant,
    last_active: Mutex<Instant>,
}

impl Session {
    /// Builds a session around an established bridge transport.
    #[must_use]
    pub fn new(
        id: String,
        user: String,
        privileged: bool,
        socket_path: PathBuf,
        mux: Multiplex,
        incoming: IncomingStreams,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            user,
            privileged,
            socket_path,
            mux,
            incoming: AsyncMutex::new(Some(incoming)),
            created_at: now,
            last_active: Mutex::new(now),
        }
    }

    /// Records activity for the idle reaper.
    pub fn touch(&self) {
        let mut last = self
            .last_active
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *last = Instant::now();
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = self
            .last_active
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        last.elapsed()
    }

    /// Reports whether the bridge transport is gone.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.mux.is_closed()
    }
}

/// The server's session table plus the cookie-token index.
#[derive(Default)]
pub struct SessionMap {
    sessions: DashMap<String, Arc<Session>>,
    tokens: DashMap<String, String>,
}

impl SessionMap {
    /// Registers a session under a fresh cookie token.
    pub fn insert(&self, session: Arc<Session>, token: String) {
        self.tokens.insert(token, session.id.clone());
        self.sessions.insert(session.id.clone(), session);
    }

    /// Resolves a cookie token to its live session.
    #[must_use]
    pub fn session_for_token(&self, token: &str) -> Option<Arc<Session>> {
        let id = self.tokens.get(token)?;
        self.sessions.get(id.value()).map(|entry| Arc::clone(&entry))
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Reports whether no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Closes a session and removes it from both indexes.
    pub async fn teardown(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            info!(session = %session_id, user = %session.user, "closing session");
            session.mux.close().await;
        }
        self.tokens.retain(|_, id| id != session_id);
    }

    /// Sessions idle past `timeout`, for the reaper.
    #[must_use]
    pub fn idle_sessions(&self, timeout: Duration) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.idle_for() >= timeout)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Every live session, for shutdown.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}
