//! The generic DBus executor.
//!
//! Like the shell executor, this path is reachable only through
//! module-registered handlers. Calls are fully declared in the manifest:
//! bus, destination, object path, interface, method, and static string
//! arguments. The reply body is rendered to JSON for the wire.

use serde_json::Value;
use tracing::debug;

use crate::error::BridgeError;
use crate::modules::manifest::{BusKind, DbusSpec};

/// Calls the declared method and renders its reply.
pub(crate) async fn call_method(spec: &DbusSpec) -> Result<Value, BridgeError> {
    debug!(
        destination = %spec.destination,
        interface = %spec.interface,
        method = %spec.method,
        "executing module dbus call"
    );

    let connection = match spec.bus {
        BusKind::System => zbus::Connection::system().await,
        BusKind::Session => zbus::Connection::session().await,
    }
    .map_err(|err| BridgeError::Unavailable(format!("dbus connect: {err}")))?;

    // The body is the method's argument tuple, so the declared strings
    // must be passed as individual arguments, not one array.
    let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
    let destination = Some(spec.destination.as_str());
    let interface = Some(spec.interface.as_str());
    let path = spec.path.as_str();
    let method = spec.method.as_str();
    let call = match args.as_slice() {
        [] => connection.call_method(destination, path, interface, method, &()).await,
        [a] => connection.call_method(destination, path, interface, method, a).await,
        [a, b] => connection.call_method(destination, path, interface, method, &(a, b)).await,
        [a, b, c] => {
            connection.call_method(destination, path, interface, method, &(a, b, c)).await
        }
        [a, b, c, d] => {
            connection.call_method(destination, path, interface, method, &(a, b, c, d)).await
        }
        _ => {
            return Err(BridgeError::InvalidArg(
                "dbus handlers support at most 4 static arguments".to_owned(),
            ));
        }
    };
    let reply = call.map_err(|err| BridgeError::Unavailable(format!("dbus call: {err}")))?;

    Ok(body_to_value(&reply.body()))
}

/// Renders a reply body as JSON.
///
/// zvariant values serialize through serde, so the conversion reuses the
/// serde bridge rather than walking the variant tree by hand. Replies the
/// bridge cannot render come back as null rather than failing the call.
fn body_to_value(body: &zbus::message::Body) -> Value {
    if let Ok(value) = body.deserialize::<zbus::zvariant::Value<'_>>() {
        return serde_json::to_value(&value).unwrap_or(Value::Null);
    }
    if let Ok(structure) = body.deserialize::<zbus::zvariant::Structure<'_>>() {
        return serde_json::to_value(&structure).unwrap_or(Value::Null);
    }
    // Empty reply bodies and shapes the serde bridge cannot express.
    Value::Null
}
