//! Inner frame codec.
//!
//! Inner frames travel between the server and the bridge over yamux
//! streams: `opcode:u8 | stream_id:u32 BE | length:u32 BE | payload`.
//! yamux presents a byte stream, so the explicit `length` field preserves
//! frame boundaries; [`InnerFrame::decode_from_slice`] therefore returns
//! the unconsumed remainder for the next frame.

use bytes::Bytes;

use crate::error::FrameError;
use crate::limits::MAX_FRAME_PAYLOAD;

/// Length of the fixed inner frame header.
pub const INNER_HEADER_LEN: usize = 9;

/// Operation carried by an inner frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// First frame of a stream; payload is the opening payload.
    Open = 0x80,
    /// Raw payload bytes.
    Data = 0x81,
    /// End-of-write from the sender side.
    Close = 0x82,
    /// Terminal window size change for interactive streams.
    Resize = 0x83,
    /// Progress report for transfer streams.
    Progress = 0x84,
    /// Terminal result envelope for result-producing streams.
    Result = 0x85,
}

impl Opcode {
    /// Every defined opcode, in wire order.
    pub const ALL: [Self; 6] = [
        Self::Open,
        Self::Data,
        Self::Close,
        Self::Resize,
        Self::Progress,
        Self::Result,
    ];

    /// Maps a raw byte onto an opcode.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x80 => Some(Self::Open),
            0x81 => Some(Self::Data),
            0x82 => Some(Self::Close),
            0x83 => Some(Self::Resize),
            0x84 => Some(Self::Progress),
            0x85 => Some(Self::Result),
            _ => None,
        }
    }

    /// Returns the wire byte for this opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded header of an inner frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InnerHeader {
    /// Frame operation.
    pub opcode: Opcode,
    /// Stream the frame belongs to.
    pub stream_id: u32,
    /// Payload length announced by the sender.
    pub length: u32,
}

impl InnerHeader {
    /// Builds a header, validating the announced length.
    ///
    /// A zero length is accepted for every opcode except [`Opcode::Open`],
    /// whose payload names the stream type and can never be empty.
    pub const fn new(opcode: Opcode, stream_id: u32, length: u32) -> Result<Self, FrameError> {
        if length > MAX_FRAME_PAYLOAD {
            return Err(FrameError::OversizedPayload(length as u64));
        }
        if length == 0 && matches!(opcode, Opcode::Open) {
            return Err(FrameError::EmptyOpen);
        }
        Ok(Self {
            opcode,
            stream_id,
            length,
        })
    }

    /// Encodes the header into its fixed-size wire form.
    #[must_use]
    pub const fn encode(self) -> [u8; INNER_HEADER_LEN] {
        let id = self.stream_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [
            self.opcode.as_u8(),
            id[0],
            id[1],
            id[2],
            id[3],
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }

    /// Decodes a header from the first [`INNER_HEADER_LEN`] bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < INNER_HEADER_LEN {
            return Err(FrameError::TruncatedHeader {
                actual: bytes.len(),
                expected: INNER_HEADER_LEN,
            });
        }
        let opcode = Opcode::from_u8(bytes[0]).ok_or(FrameError::UnknownOpcode(bytes[0]))?;
        let stream_id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let length = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Self::new(opcode, stream_id, length)
    }
}

/// A complete inner frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InnerFrame {
    opcode: Opcode,
    stream_id: u32,
    payload: Bytes,
}

impl InnerFrame {
    /// Builds a frame, applying the same validation as [`InnerHeader::new`].
    pub fn new(
        opcode: Opcode,
        stream_id: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() as u64 > u64::from(MAX_FRAME_PAYLOAD) {
            return Err(FrameError::OversizedPayload(payload.len() as u64));
        }
        if payload.is_empty() && opcode == Opcode::Open {
            return Err(FrameError::EmptyOpen);
        }
        Ok(Self {
            opcode,
            stream_id,
            payload,
        })
    }

    /// Returns the frame operation.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the stream identifier.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Returns the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Recomputes the wire header for the current payload.
    pub fn header(&self) -> Result<InnerHeader, FrameError> {
        InnerHeader::new(self.opcode, self.stream_id, self.payload.len() as u32)
    }

    /// Encodes the frame into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INNER_HEADER_LEN + self.payload.len());
        let header = InnerHeader {
            opcode: self.opcode,
            stream_id: self.stream_id,
            length: self.payload.len() as u32,
        };
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes one frame from the front of `bytes`, returning the remainder.
    pub fn decode_from_slice(bytes: &[u8]) -> Result<(Self, &[u8]), FrameError> {
        let header = InnerHeader::decode(bytes)?;
        let total = INNER_HEADER_LEN + header.length as usize;
        if bytes.len() < total {
            return Err(FrameError::TruncatedPayload {
                actual: bytes.len() - INNER_HEADER_LEN,
                expected: header.length as usize,
            });
        }
        let frame = Self {
            opcode: header.opcode,
            stream_id: header.stream_id,
            payload: Bytes::copy_from_slice(&bytes[INNER_HEADER_LEN..total]),
        };
        Ok((frame, &bytes[total..]))
    }

    /// Decodes exactly one frame, rejecting trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (frame, remainder) = Self::decode_from_slice(bytes)?;
        if !remainder.is_empty() {
            return Err(FrameError::TrailingBytes(remainder.len()));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_from_slice_round_trips_and_exposes_remainder() {
        let first = InnerFrame::new(Opcode::Data, 3, &b"hello"[..]).expect("frame");
        let second = InnerFrame::new(Opcode::Close, 3, Bytes::new()).expect("frame");

        let mut concatenated = first.encode();
        concatenated.extend_from_slice(&second.encode());

        let (frame, remainder) =
            InnerFrame::decode_from_slice(&concatenated).expect("decode succeeds");
        assert_eq!(frame, first);
        assert_eq!(remainder, second.encode().as_slice());
    }

    #[test]
    fn decode_errors_for_truncated_header() {
        let err = InnerFrame::decode_from_slice(&[0x81, 0x00]).unwrap_err();
        assert_eq!(
            err,
            FrameError::TruncatedHeader {
                actual: 2,
                expected: INNER_HEADER_LEN
            }
        );
    }

    #[test]
    fn decode_errors_for_truncated_payload() {
        let header = InnerHeader::new(Opcode::Data, 1, 4).expect("header");
        let mut bytes = Vec::from(header.encode());
        bytes.extend_from_slice(&[0xAA, 0xBB]);

        let err = InnerFrame::decode_from_slice(&bytes).unwrap_err();
        assert_eq!(
            err,
            FrameError::TruncatedPayload {
                actual: 2,
                expected: 4
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_opcodes() {
        let mut bytes = InnerFrame::new(Opcode::Data, 1, &b"x"[..])
            .expect("frame")
            .encode();
        bytes[0] = 0x90;
        let err = InnerFrame::decode_from_slice(&bytes).unwrap_err();
        assert_eq!(err, FrameError::UnknownOpcode(0x90));
    }

    #[test]
    fn empty_payload_is_accepted_for_every_opcode_except_open() {
        for opcode in Opcode::ALL {
            let result = InnerFrame::new(opcode, 9, Bytes::new());
            if opcode == Opcode::Open {
                assert_eq!(result.unwrap_err(), FrameError::EmptyOpen);
            } else {
                assert!(result.is_ok(), "{opcode:?} must accept empty payloads");
            }
        }
    }

    #[test]
    fn header_rejects_length_past_the_ceiling() {
        let err = InnerHeader::new(Opcode::Data, 1, MAX_FRAME_PAYLOAD + 1).unwrap_err();
        assert_eq!(
            err,
            FrameError::OversizedPayload(u64::from(MAX_FRAME_PAYLOAD) + 1)
        );
    }

    #[test]
    fn header_accepts_length_at_the_ceiling() {
        let header = InnerHeader::new(Opcode::Data, 1, MAX_FRAME_PAYLOAD).expect("max length");
        assert_eq!(header.length, MAX_FRAME_PAYLOAD);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = InnerFrame::new(Opcode::Result, 5, &b"{}"[..])
            .expect("frame")
            .encode();
        bytes.extend_from_slice(&[0xFF]);
        let err = InnerFrame::decode(&bytes).unwrap_err();
        assert_eq!(err, FrameError::TrailingBytes(1));
    }

    proptest! {
        #[test]
        fn prop_round_trip_for_random_frames(
            opcode in proptest::sample::select(&Opcode::ALL),
            stream_id in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 1..512),
        ) {
            let frame = InnerFrame::new(opcode, stream_id, payload).expect("constructible frame");
            let decoded = InnerFrame::decode(&frame.encode()).expect("decode succeeds");
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn prop_header_round_trips(
            opcode in proptest::sample::select(&Opcode::ALL),
            stream_id in any::<u32>(),
            length in 1u32..=MAX_FRAME_PAYLOAD,
        ) {
            let header = InnerHeader::new(opcode, stream_id, length).expect("constructible header");
            let decoded = InnerHeader::decode(&header.encode()).expect("decode succeeds");
            prop_assert_eq!(decoded, header);
        }
    }
}
