//! Stream-type handler registry and privilege middleware.
//!
//! Registration happens once at bridge start; afterwards the registry is
//! read-only behind an `Arc` and lookups are lock-free. Privilege
//! enforcement is a decorator: [`require_privileged`] wraps a handler with
//! the session check, and [`require_privileged_all`] wraps a whole map.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use protocol::OpeningPayload;

use crate::context::StreamContext;
use crate::error::BridgeError;
use crate::stream::{StreamReader, StreamWriter};

/// A registered stream-type handler.
///
/// Handlers own the reader, share the writer with the dispatcher, and
/// report failures by returning an error; the dispatcher turns that error
/// into the terminal `Result` frame.
#[derive(Clone)]
pub struct Handler(
    Arc<
        dyn Fn(
                StreamContext,
                StreamReader,
                StreamWriter,
                OpeningPayload,
            ) -> BoxFuture<'static, Result<(), BridgeError>>
            + Send
            + Sync,
    >,
);

impl Handler {
    /// Wraps an async function as a handler.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(StreamContext, StreamReader, StreamWriter, OpeningPayload) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), BridgeError>> + Send + 'static,
    {
        Self(Arc::new(move |ctx, reader, writer, opening| {
            Box::pin(func(ctx, reader, writer, opening))
        }))
    }

    /// Invokes the handler.
    pub fn call(
        &self,
        ctx: StreamContext,
        reader: StreamReader,
        writer: StreamWriter,
        opening: OpeningPayload,
    ) -> BoxFuture<'static, Result<(), BridgeError>> {
        (self.0)(ctx, reader, writer, opening)
    }
}

/// Wraps a handler with the session privilege check.
///
/// At call time the wrapper consults the immutable privileged flag; an
/// unprivileged session receives [`BridgeError::PrivilegeDenied`] and the
/// inner handler never runs.
#[must_use]
pub fn require_privileged(inner: Handler) -> Handler {
    Handler::new(move |ctx: StreamContext, reader, writer, opening| {
        let inner = inner.clone();
        async move {
            if !ctx.session.privileged {
                return Err(BridgeError::PrivilegeDenied);
            }
            inner.call(ctx, reader, writer, opening).await
        }
    })
}

/// Wraps every handler in `map` with the privilege check.
#[must_use]
pub fn require_privileged_all(map: HashMap<String, Handler>) -> HashMap<String, Handler> {
    map.into_iter()
        .map(|(name, handler)| (name, require_privileged(handler)))
        .collect()
}

/// Stream types whose direct invocation is disabled by design.
///
/// Generic execution is reachable only through module-registered commands;
/// a wire request for these types is always refused.
pub const DISABLED_TYPES: [&str; 2] = ["command", "generic_dbus"];

/// Immutable map from stream type to handler.
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Builds the registry from its final handler map.
    #[must_use]
    pub fn new(handlers: HashMap<String, Handler>) -> Self {
        Self { handlers }
    }

    /// Looks up the handler for a stream type.
    #[must_use]
    pub fn get(&self, stream_type: &str) -> Option<&Handler> {
        self.handlers.get(stream_type)
    }

    /// Reports whether a name collides with a registered stream type.
    #[must_use]
    pub fn is_builtin(&self, name: &str) -> bool {
        self.handlers.contains_key(name) || DISABLED_TYPES.contains(&name)
    }

    /// Returns the registered stream types, for startup logging.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}
