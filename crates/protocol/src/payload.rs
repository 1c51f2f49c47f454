//! JSON envelopes carried by `Result`, `Progress`, and `Resize` frames.
//!
//! Progress frames are never used to signal failure; a stream always ends
//! with exactly one terminal [`ResultPayload`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Outcome discriminator of a result envelope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// The operation completed.
    Ok,
    /// The operation failed; `error` and `code` describe why.
    Error,
}

/// Terminal envelope of a result-producing stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Outcome discriminator.
    pub status: ResultStatus,
    /// Handler return value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wire error classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl ResultPayload {
    /// Builds a success envelope carrying `data`.
    #[must_use]
    pub fn ok(data: impl Into<Option<Value>>) -> Self {
        Self {
            status: ResultStatus::Ok,
            data: data.into(),
            error: None,
            code: None,
        }
    }

    /// Builds a failure envelope with a wire code and description.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            data: None,
            error: Some(message.into()),
            code: Some(code),
        }
    }

    /// Reports whether this envelope signals success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, ResultStatus::Ok)
    }

    /// Serializes the envelope into its wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        // A struct of scalars and Value cannot fail to serialize.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"status\":\"error\"}".to_vec())
    }

    /// Parses an envelope from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Progress report emitted by transfer streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// Units completed so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    /// Total units, when known up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Completion percentage, when the emitter computes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<f64>,
    /// Bytes acknowledged by the upload handler's window protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked: Option<u64>,
}

impl ProgressPayload {
    /// Builds an upload acknowledgement report.
    #[must_use]
    pub const fn acked(bytes: u64) -> Self {
        Self {
            current: None,
            total: None,
            pct: None,
            acked: Some(bytes),
        }
    }

    /// Builds a `current/total` report with a derived percentage.
    #[must_use]
    pub fn of_total(current: u64, total: u64) -> Self {
        let pct = if total == 0 {
            None
        } else {
            Some((current as f64 / total as f64) * 100.0)
        };
        Self {
            current: Some(current),
            total: Some(total),
            pct,
            acked: None,
        }
    }

    /// Serializes the report into its wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec())
    }

    /// Parses a report from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Terminal window size carried by `Resize` frames.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResizePayload {
    /// Columns.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl ResizePayload {
    /// Serializes the resize request into its wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| b"{}".to_vec())
    }

    /// Parses a resize request from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_envelope_serializes_without_error_fields() {
        let payload = ResultPayload::ok(json!(["a", "b"]));
        let text = String::from_utf8(payload.to_bytes()).expect("utf8");
        assert!(text.contains("\"status\":\"ok\""));
        assert!(!text.contains("\"error\""));
        assert!(!text.contains("\"code\""));
    }

    #[test]
    fn error_envelope_round_trips_code_and_message() {
        let payload = ResultPayload::error(ErrorCode::Timeout, "deadline exceeded");
        let back = ResultPayload::from_bytes(&payload.to_bytes()).expect("parses");
        assert_eq!(back, payload);
        assert!(!back.is_ok());
        assert_eq!(back.code, Some(ErrorCode::Timeout));
    }

    #[test]
    fn progress_of_total_computes_percentage() {
        let progress = ProgressPayload::of_total(50, 200);
        assert_eq!(progress.pct, Some(25.0));
    }

    #[test]
    fn progress_of_zero_total_omits_percentage() {
        let progress = ProgressPayload::of_total(0, 0);
        assert_eq!(progress.pct, None);
    }

    #[test]
    fn acked_report_carries_only_the_ack() {
        let text = String::from_utf8(ProgressPayload::acked(524_288).to_bytes()).expect("utf8");
        assert_eq!(text, "{\"acked\":524288}");
    }

    #[test]
    fn resize_round_trips() {
        let resize = ResizePayload { cols: 80, rows: 24 };
        let back = ResizePayload::from_bytes(&resize.to_bytes()).expect("parses");
        assert_eq!(back, resize);
    }
}
