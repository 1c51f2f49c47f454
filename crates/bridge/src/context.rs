//! Shared state handed to every dispatched stream.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::push::PushStreams;
use crate::rpc::CommandRouter;

/// Concurrent heavyweight render/read tasks allowed per bridge.
pub const HEAVY_TASK_LIMIT: usize = 8;

/// Immutable identity of the session this bridge serves.
///
/// The privileged flag is written exactly once, from the bootstrap document
/// the auth daemon passes on stdin, and is never mutable afterwards.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    /// Session identifier assigned at login.
    pub session_id: String,
    /// Whether handlers requiring administrator rights may run.
    pub privileged: bool,
}

/// Bridge-wide resource gates.
pub struct Gates {
    /// Bounds concurrent memory-heavy tasks (file reads into memory,
    /// archive rendering) so one session cannot exhaust the process.
    pub heavy: Semaphore,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            heavy: Semaphore::new(HEAVY_TASK_LIMIT),
        }
    }
}

/// Per-stream view of the bridge's shared state.
#[derive(Clone)]
pub struct StreamContext {
    /// Session identity, shared across all streams.
    pub session: Arc<SessionInfo>,
    /// Frozen command registry for `bridge`-type calls.
    pub commands: Arc<CommandRouter>,
    /// Resource gates.
    pub gates: Arc<Gates>,
    /// Factory for bridge-initiated push streams, once the session
    /// transport exists.
    pub push: Option<PushStreams>,
}

impl StreamContext {
    /// Builds the context shared by every stream of this bridge.
    #[must_use]
    pub fn new(session: SessionInfo, commands: CommandRouter) -> Self {
        Self {
            session: Arc::new(session),
            commands: Arc::new(commands),
            gates: Arc::new(Gates::default()),
            push: None,
        }
    }

    /// Attaches the push-stream factory.
    #[must_use]
    pub fn with_push(mut self, push: PushStreams) -> Self {
        self.push = Some(push);
        self
    }

    #[cfg(test)]
    pub(crate) fn for_tests(session: SessionInfo) -> Self {
        Self::new(session, CommandRouter::default())
    }
}
