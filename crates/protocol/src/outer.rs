//! Outer frame codec.
//!
//! One outer frame travels in each WebSocket binary message between the
//! browser and the server: `stream_id:u32 BE | flags:u8 | payload`. The
//! WebSocket layer preserves message boundaries, so decoding expects exactly
//! one frame per input and rejects trailing bytes.

use std::fmt;
use std::ops::BitOr;

use bytes::Bytes;

use crate::error::FrameError;
use crate::limits::MAX_FRAME_PAYLOAD;

/// Length of the fixed outer frame header.
pub const OUTER_HEADER_LEN: usize = 5;

/// Bitset over the defined outer frame flags.
///
/// Exactly one SYN opens a stream and carries the opening payload; DATA
/// frames are raw; FIN signals end-of-write from the sender side; RST aborts
/// the stream immediately.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct OuterFlags(u8);

impl OuterFlags {
    /// First frame of a stream, carrying the opening payload.
    pub const SYN: Self = Self(0x01);
    /// Raw payload bytes.
    pub const DATA: Self = Self(0x04);
    /// End-of-write from the sender side.
    pub const FIN: Self = Self(0x08);
    /// Immediate abort.
    pub const RST: Self = Self(0x10);

    const ALL_BITS: u8 = 0x01 | 0x04 | 0x08 | 0x10;

    /// Validates a raw flags byte.
    ///
    /// Unknown bits are rejected rather than silently ignored, and a frame
    /// must carry at least one defined flag.
    pub const fn from_bits(bits: u8) -> Result<Self, FrameError> {
        if bits & !Self::ALL_BITS != 0 {
            return Err(FrameError::UnknownFlags(bits));
        }
        if bits == 0 {
            return Err(FrameError::EmptyFlags);
        }
        Ok(Self(bits))
    }

    /// Returns the raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Reports whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OuterFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for OuterFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::SYN) {
            names.push("SYN");
        }
        if self.contains(Self::DATA) {
            names.push("DATA");
        }
        if self.contains(Self::FIN) {
            names.push("FIN");
        }
        if self.contains(Self::RST) {
            names.push("RST");
        }
        write!(f, "OuterFlags({})", names.join("|"))
    }
}

/// A decoded outer frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OuterFrame {
    stream_id: u32,
    flags: OuterFlags,
    payload: Bytes,
}

impl OuterFrame {
    /// Builds a frame, validating the payload against the size ceiling.
    pub fn new(
        stream_id: u32,
        flags: OuterFlags,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() as u64 > u64::from(MAX_FRAME_PAYLOAD) {
            return Err(FrameError::OversizedPayload(payload.len() as u64));
        }
        Ok(Self {
            stream_id,
            flags,
            payload,
        })
    }

    /// Convenience constructor for a SYN frame carrying an opening payload.
    pub fn syn(stream_id: u32, opening: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(stream_id, OuterFlags::SYN, opening)
    }

    /// Convenience constructor for a DATA frame.
    pub fn data(stream_id: u32, payload: impl Into<Bytes>) -> Result<Self, FrameError> {
        Self::new(stream_id, OuterFlags::DATA, payload)
    }

    /// Convenience constructor for an empty FIN frame.
    #[must_use]
    pub fn fin(stream_id: u32) -> Self {
        Self {
            stream_id,
            flags: OuterFlags::FIN,
            payload: Bytes::new(),
        }
    }

    /// Convenience constructor for an empty RST frame.
    #[must_use]
    pub fn rst(stream_id: u32) -> Self {
        Self {
            stream_id,
            flags: OuterFlags::RST,
            payload: Bytes::new(),
        }
    }

    /// Returns the stream identifier.
    #[must_use]
    pub const fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Returns the flag bitset.
    #[must_use]
    pub const fn flags(&self) -> OuterFlags {
        self.flags
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

    /// Encodes the frame into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OUTER_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.stream_id.to_be_bytes());
        out.push(self.flags.bits());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes exactly one frame from `bytes`.
    ///
    /// The outer transport preserves message boundaries, so the input must
    /// contain the frame and nothing else.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < OUTER_HEADER_LEN {
            return Err(FrameError::TruncatedHeader {
                actual: bytes.len(),
                expected: OUTER_HEADER_LEN,
            });
        }
        let stream_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let flags = OuterFlags::from_bits(bytes[4])?;
        let payload = &bytes[OUTER_HEADER_LEN..];
        if payload.len() as u64 > u64::from(MAX_FRAME_PAYLOAD) {
            return Err(FrameError::OversizedPayload(payload.len() as u64));
        }
        Ok(Self {
            stream_id,
            flags,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let frame = OuterFrame::new(7, OuterFlags::SYN, &b"terminal\x0080\x0024"[..])
            .expect("constructible frame");
        let decoded = OuterFrame::decode(&frame.encode()).expect("decode succeeds");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_rejects_short_header() {
        let err = OuterFrame::decode(&[0, 0, 1]).unwrap_err();
        assert_eq!(
            err,
            FrameError::TruncatedHeader {
                actual: 3,
                expected: OUTER_HEADER_LEN
            }
        );
    }

    #[test]
    fn decode_rejects_unknown_flag_bits() {
        let mut bytes = OuterFrame::fin(1).encode();
        bytes[4] = 0x28; // FIN plus an undefined bit
        let err = OuterFrame::decode(&bytes).unwrap_err();
        assert_eq!(err, FrameError::UnknownFlags(0x28));
    }

    #[test]
    fn decode_rejects_zero_flags() {
        let mut bytes = OuterFrame::fin(1).encode();
        bytes[4] = 0;
        let err = OuterFrame::decode(&bytes).unwrap_err();
        assert_eq!(err, FrameError::EmptyFlags);
    }

    #[test]
    fn new_rejects_payload_past_the_ceiling() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD as usize + 1];
        let err = OuterFrame::new(1, OuterFlags::DATA, payload).unwrap_err();
        assert_eq!(
            err,
            FrameError::OversizedPayload(u64::from(MAX_FRAME_PAYLOAD) + 1)
        );
    }

    #[test]
    fn payload_at_the_ceiling_is_accepted() {
        let payload = vec![0u8; MAX_FRAME_PAYLOAD as usize];
        let frame = OuterFrame::new(1, OuterFlags::DATA, payload).expect("max payload fits");
        assert_eq!(frame.payload().len(), MAX_FRAME_PAYLOAD as usize);
    }

    #[test]
    fn combined_flags_survive_a_round_trip() {
        let flags = OuterFlags::DATA | OuterFlags::FIN;
        let frame = OuterFrame::new(3, flags, &b"tail"[..]).expect("constructible frame");
        let decoded = OuterFrame::decode(&frame.encode()).expect("decode succeeds");
        assert!(decoded.flags().contains(OuterFlags::DATA));
        assert!(decoded.flags().contains(OuterFlags::FIN));
    }

    proptest! {
        #[test]
        fn prop_round_trip_for_random_frames(
            stream_id in any::<u32>(),
            bits in proptest::sample::select(&[0x01u8, 0x04, 0x08, 0x10, 0x05, 0x0c, 0x11]),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let flags = OuterFlags::from_bits(bits).expect("defined bits");
            let frame = OuterFrame::new(stream_id, flags, payload).expect("constructible frame");
            let decoded = OuterFrame::decode(&frame.encode()).expect("decode succeeds");
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn prop_unknown_bits_are_always_rejected(bits in 0u8..=u8::MAX) {
            prop_assume!(bits & !0x1du8 != 0);
            prop_assert_eq!(OuterFlags::from_bits(bits), Err(FrameError::UnknownFlags(bits)));
        }
    }
}
