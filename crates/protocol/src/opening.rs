//! Opening payload tokenizer.
//!
//! The first payload of any stream is `type\0arg1\0arg2\0...`: NUL-separated
//! UTF-8 tokens whose first token names the stream type. For the
//! request/response type `bridge` the arguments are
//! `(handler, command, *args)`, each argument a UTF-8 string with structured
//! values JSON-encoded by the caller.

use memchr::memchr_iter;

use crate::error::FrameError;

/// Separator between opening payload tokens.
pub const TOKEN_SEPARATOR: u8 = 0;

/// Parsed opening payload of a stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpeningPayload {
    stream_type: String,
    args: Vec<String>,
}

impl OpeningPayload {
    /// Builds an opening payload from a type and arguments.
    ///
    /// Tokens may not embed NUL, which the wire format reserves as the
    /// separator.
    pub fn new(
        stream_type: impl Into<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, FrameError> {
        let stream_type = stream_type.into();
        let args: Vec<String> = args.into_iter().collect();
        if stream_type.is_empty() {
            return Err(FrameError::InvalidOpening("empty stream type".to_owned()));
        }
        for token in std::iter::once(&stream_type).chain(&args) {
            if token.as_bytes().contains(&TOKEN_SEPARATOR) {
                return Err(FrameError::InvalidOpening(
                    "token embeds the NUL separator".to_owned(),
                ));
            }
        }
        Ok(Self { stream_type, args })
    }

    /// Parses an opening payload from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| FrameError::InvalidOpening(format!("payload is not UTF-8: {err}")))?;

        let mut tokens = Vec::new();
        let mut start = 0usize;
        for nul in memchr_iter(TOKEN_SEPARATOR, bytes) {
            tokens.push(text[start..nul].to_owned());
            start = nul + 1;
        }
        tokens.push(text[start..].to_owned());

        let mut tokens = tokens.into_iter();
        let stream_type = tokens
            .next()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FrameError::InvalidOpening("missing stream type".to_owned()))?;

        Ok(Self {
            stream_type,
            args: tokens.collect(),
        })
    }

    /// Returns the stream type token.
    #[must_use]
    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    /// Returns the argument tokens following the stream type.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Encodes the payload into its NUL-separated wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.stream_type.len() + self.args.iter().map(|a| a.len() + 1).sum::<usize>(),
        );
        out.extend_from_slice(self.stream_type.as_bytes());
        for arg in &self.args {
            out.push(TOKEN_SEPARATOR);
            out.extend_from_slice(arg.as_bytes());
        }
        out
    }
}

/// A request/response invocation parsed from a `bridge` opening payload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BridgeCall {
    /// Named handler group, e.g. `docker` or `module.monitoring`.
    pub handler: String,
    /// Command within the handler group.
    pub command: String,
    /// Remaining arguments, JSON-encoded by the caller where structured.
    pub args: Vec<String>,
}

impl BridgeCall {
    /// Extracts the `(handler, command, *args)` form from an opening payload.
    pub fn from_opening(opening: &OpeningPayload) -> Result<Self, FrameError> {
        let mut args = opening.args().iter();
        let handler = args
            .next()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FrameError::InvalidOpening("bridge call missing handler".to_owned()))?
            .clone();
        let command = args
            .next()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FrameError::InvalidOpening("bridge call missing command".to_owned()))?
            .clone();
        Ok(Self {
            handler,
            command,
            args: args.cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_and_args() {
        let opening = OpeningPayload::parse(b"bridge\0docker\0list_containers").expect("parses");
        assert_eq!(opening.stream_type(), "bridge");
        assert_eq!(opening.args(), ["docker", "list_containers"]);
    }

    #[test]
    fn parses_type_without_args() {
        let opening = OpeningPayload::parse(b"terminal").expect("parses");
        assert_eq!(opening.stream_type(), "terminal");
        assert!(opening.args().is_empty());
    }

    #[test]
    fn rejects_empty_payload() {
        let err = OpeningPayload::parse(b"").unwrap_err();
        assert!(matches!(err, FrameError::InvalidOpening(_)));
    }

    #[test]
    fn rejects_leading_separator() {
        let err = OpeningPayload::parse(b"\0terminal").unwrap_err();
        assert!(matches!(err, FrameError::InvalidOpening(_)));
    }

    #[test]
    fn rejects_non_utf8_payload() {
        let err = OpeningPayload::parse(&[0x66, 0xFF, 0x00, 0x67]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidOpening(_)));
    }

    #[test]
    fn encode_round_trips() {
        let opening = OpeningPayload::new(
            "fb-upload",
            ["/tmp/x".to_owned(), "104857600".to_owned()],
        )
        .expect("constructible");
        let parsed = OpeningPayload::parse(&opening.encode()).expect("parses");
        assert_eq!(parsed, opening);
    }

    #[test]
    fn new_rejects_embedded_nul() {
        let err = OpeningPayload::new("terminal", ["a\0b".to_owned()]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidOpening(_)));
    }

    #[test]
    fn bridge_call_extracts_handler_command_and_args() {
        let opening =
            OpeningPayload::parse(b"bridge\0wireguard\0add_interface\0wg0\010.0.0.1/24")
                .expect("parses");
        let call = BridgeCall::from_opening(&opening).expect("well-formed call");
        assert_eq!(call.handler, "wireguard");
        assert_eq!(call.command, "add_interface");
        assert_eq!(call.args, ["wg0", "10.0.0.1/24"]);
    }

    #[test]
    fn bridge_call_requires_handler_and_command() {
        let opening = OpeningPayload::parse(b"bridge\0docker").expect("parses");
        let err = BridgeCall::from_opening(&opening).unwrap_err();
        assert!(matches!(err, FrameError::InvalidOpening(_)));
    }
}
