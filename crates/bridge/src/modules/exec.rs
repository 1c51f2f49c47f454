//! The generic shell executor.
//!
//! This is one of exactly two code paths that execute anything on the
//! host, and it is private to the module loader's closures: nothing on the
//! wire can reach it without resolving a registered `(module, command)`
//! entry first.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::BridgeError;

/// Outcome of one shell execution, shaped for the wire.
pub(crate) fn output_to_value(exit_code: i32, stdout: &str, stderr: &str) -> Value {
    // Opportunistic but deterministic: when the whole stdout is valid
    // JSON the parsed document is returned instead of the raw text.
    let stdout_value = serde_json::from_str::<Value>(stdout.trim())
        .unwrap_or_else(|_| Value::String(stdout.to_owned()));

    let mut object = json!({
        "exitCode": exit_code,
        "stdout": stdout_value,
    });
    if exit_code != 0 && !stderr.is_empty() {
        object["error"] = Value::String(stderr.trim_end().to_owned());
    }
    object
}

/// Runs a rendered command template under `sh -c` with a deadline.
///
/// On overrun the child is SIGKILLed and the invocation reports
/// `timeout`. A non-zero exit is not an error at this layer; the exit
/// code travels in the result object.
pub(crate) async fn run_shell(rendered: &str, deadline: Duration) -> Result<Value, BridgeError> {
    debug!(command = rendered, "executing module command");

    let child = Command::new("sh")
        .arg("-c")
        .arg(rendered)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| BridgeError::Unavailable(format!("spawn sh: {err}")))?;

    let output = match timeout(deadline, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            // kill_on_drop reaps the child when the future is dropped.
            return Err(BridgeError::Timeout);
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(output_to_value(exit_code, &stdout, &stderr))
}
