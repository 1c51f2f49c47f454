//! The `bridge` request/response stream type and its command registry.
//!
//! A `bridge` stream carries exactly one invocation: the opening payload
//! names `(handler, command, *args)`, the named command runs under a
//! deadline, and the stream ends with one `Result` frame followed by
//! `Close`. The registry is populated once at startup (built-ins plus the
//! module loader) and is read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use protocol::limits::REQUEST_TIMEOUT;
use protocol::payload::ResultPayload;
use protocol::{BridgeCall, OpeningPayload};

use crate::context::StreamContext;
use crate::error::BridgeError;
use crate::registry::Handler;
use crate::stream::{StreamEvent, StreamReader, StreamWriter};

type CommandFn = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, Result<Value, BridgeError>> + Send + Sync>;

/// A command reachable through `bridge` streams.
#[derive(Clone)]
pub struct RegisteredCommand {
    func: CommandFn,
    requires_privilege: bool,
    timeout: Duration,
}

impl RegisteredCommand {
    /// Wraps an async function as a command with the default deadline.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BridgeError>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |args| Box::pin(func(args))),
            requires_privilege: false,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Marks the command as requiring a privileged session.
    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.requires_privilege = true;
        self
    }

    /// Overrides the deadline applied to one invocation.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn invoke(&self, args: Vec<String>) -> BoxFuture<'static, Result<Value, BridgeError>> {
        (self.func)(args)
    }
}

/// Registration failure; surfaces at startup, never on the wire.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    /// The `(handler, command)` pair is already taken.
    #[error("command {handler}.{command} is already registered")]
    Duplicate {
        /// Handler group of the clashing entry.
        handler: String,
        /// Command name of the clashing entry.
        command: String,
    },
}

/// Frozen map of `(handler, command)` to executable commands.
///
/// Every generic command or DBus execution must resolve to an entry here;
/// there is no other path from the wire to an executor.
#[derive(Clone, Default)]
pub struct CommandRouter {
    map: HashMap<(String, String), RegisteredCommand>,
}

impl CommandRouter {
    /// Registers a command, refusing duplicates.
    pub fn register(
        &mut self,
        handler: impl Into<String>,
        command: impl Into<String>,
        entry: RegisteredCommand,
    ) -> Result<(), RegisterError> {
        let key = (handler.into(), command.into());
        if self.map.contains_key(&key) {
            return Err(RegisterError::Duplicate {
                handler: key.0,
                command: key.1,
            });
        }
        self.map.insert(key, entry);
        Ok(())
    }

    /// Looks up a command.
    #[must_use]
    pub fn get(&self, handler: &str, command: &str) -> Option<&RegisteredCommand> {
        self.map.get(&(handler.to_owned(), command.to_owned()))
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Reports whether no commands are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates the registered `(handler, command)` pairs.
    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map
            .keys()
            .map(|(handler, command)| (handler.as_str(), command.as_str()))
    }
}

/// Builds the `bridge` stream-type handler.
#[must_use]
pub fn bridge_handler() -> Handler {
    Handler::new(handle_bridge)
}

async fn handle_bridge(
    ctx: StreamContext,
    mut reader: StreamReader,
    writer: StreamWriter,
    opening: OpeningPayload,
) -> Result<(), BridgeError> {
    let call = BridgeCall::from_opening(&opening)?;
    let Some(entry) = ctx.commands.get(&call.handler, &call.command) else {
        return Err(BridgeError::NotFound(format!(
            "unknown command {}.{}",
            call.handler, call.command
        )));
    };
    if entry.requires_privilege && !ctx.session.privileged {
        return Err(BridgeError::PrivilegeDenied);
    }

    debug!(handler = %call.handler, command = %call.command, "dispatching bridge call");
    let invocation = entry.invoke(call.args);

    let value = tokio::select! {
        outcome = tokio::time::timeout(entry.timeout, invocation) => match outcome {
            Ok(result) => result?,
            Err(_) => return Err(BridgeError::Timeout),
        },
        () = wait_for_cancel(&mut reader) => return Err(BridgeError::Cancelled),
    };

    writer.send_result(&ResultPayload::ok(value)).await?;
    writer.send_close().await?;
    Ok(())
}

/// Resolves when the client closes or aborts the stream mid-call.
async fn wait_for_cancel(reader: &mut StreamReader) {
    loop {
        match reader.next_event().await {
            Ok(StreamEvent::Close | StreamEvent::Aborted) | Err(_) => return,
            Ok(StreamEvent::Data(_) | StreamEvent::Resize(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionInfo;
    use crate::stream::tests_support::loopback;
    use protocol::inner::{InnerFrame, Opcode};
    use protocol::{ErrorCode, ResultStatus};
    use serde_json::json;
    use transport::{read_frame, write_frame};

    fn router() -> CommandRouter {
        let mut router = CommandRouter::default();
        router
            .register(
                "docker",
                "list_containers",
                RegisteredCommand::new(|_args| async { Ok(json!(["web", "db"])) }),
            )
            .expect("registers");
        router
            .register(
                "wireguard",
                "add_interface",
                RegisteredCommand::new(|_args| async { Ok(Value::Null) }).privileged(),
            )
            .expect("registers");
        router
            .register(
                "slow",
                "sleep",
                RegisteredCommand::new(|_args| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                })
                .with_timeout(Duration::from_millis(50)),
            )
            .expect("registers");
        router
    }

    fn context(privileged: bool) -> StreamContext {
        StreamContext::new(
            SessionInfo {
                session_id: "sid".to_owned(),
                privileged,
            },
            router(),
        )
    }

    async fn run_call(
        privileged: bool,
        opening: &[u8],
    ) -> (Result<(), BridgeError>, Vec<InnerFrame>) {
        let rig = loopback(1).await;
        let opening = OpeningPayload::parse(opening).expect("opening");
        let writer = rig.writer.clone();
        let outcome = handle_bridge(context(privileged), rig.reader, writer, opening).await;

        let mut frames = Vec::new();
        let mut peer = rig.peer;
        if outcome.is_ok() {
            while let Some(frame) = read_frame(&mut peer).await.expect("read") {
                let done = frame.opcode() == Opcode::Close;
                frames.push(frame);
                if done {
                    break;
                }
            }
        }
        (outcome, frames)
    }

    #[tokio::test]
    async fn happy_path_emits_result_then_close() {
        let (outcome, frames) =
            run_call(false, b"bridge\0docker\0list_containers").await;
        outcome.expect("call succeeds");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].opcode(), Opcode::Result);
        let result = ResultPayload::from_bytes(frames[0].payload()).expect("payload");
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(result.data, Some(json!(["web", "db"])));
        assert_eq!(frames[1].opcode(), Opcode::Close);
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let (outcome, _) = run_call(false, b"bridge\0docker\0does_not_exist").await;
        assert_eq!(outcome.unwrap_err().code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn privileged_command_refuses_unprivileged_sessions() {
        let (outcome, _) =
            run_call(false, b"bridge\0wireguard\0add_interface\0wg0\x0010.0.0.1/24").await;
        assert_eq!(outcome.unwrap_err().code(), ErrorCode::PrivilegeDenied);
    }

    #[tokio::test]
    async fn privileged_command_runs_for_privileged_sessions() {
        let (outcome, frames) =
            run_call(true, b"bridge\0wireguard\0add_interface\0wg0\x0010.0.0.1/24").await;
        outcome.expect("call succeeds");
        assert_eq!(frames[0].opcode(), Opcode::Result);
    }

    #[tokio::test]
    async fn deadline_overrun_maps_to_timeout() {
        let (outcome, _) = run_call(false, b"bridge\0slow\0sleep").await;
        assert_eq!(outcome.unwrap_err().code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn client_close_cancels_a_running_call() {
        let rig = loopback(1).await;
        let opening = OpeningPayload::parse(b"bridge\0slow\0sleep").expect("opening");
        let writer = rig.writer.clone();
        let call = tokio::spawn(handle_bridge(context(false), rig.reader, writer, opening));

        let mut peer = rig.peer;
        let close = InnerFrame::new(Opcode::Close, 1, Vec::new()).expect("frame");
        write_frame(&mut peer, &close).await.expect("write");

        let outcome = call.await.expect("join");
        assert_eq!(outcome.unwrap_err().code(), ErrorCode::Cancelled);
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let mut router = router();
        let err = router
            .register(
                "docker",
                "list_containers",
                RegisteredCommand::new(|_args| async { Ok(Value::Null) }),
            )
            .unwrap_err();
        assert!(matches!(err, RegisterError::Duplicate { .. }));
    }
}
