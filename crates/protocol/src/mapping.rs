//! The 1:1 mapping between outer and inner frames.
//!
//! SYN, FIN, and RST map to `Open`, `Close`, and a transport-level reset
//! at the flag level. Everything else crosses inside a DATA frame whose
//! payload starts with the inner opcode byte:
//!
//! ```text
//! outer DATA payload = opcode:u8 | inner payload
//! ```
//!
//! The relay copies the byte without interpreting what follows, so it
//! stays a pure byte relay while both endpoints keep the full frame
//! taxonomy.

use bytes::Bytes;

use crate::error::FrameError;
use crate::inner::{InnerFrame, Opcode};

/// Opcodes that may travel inside a DATA payload.
///
/// `Open` and `Close` have dedicated outer flags and are rejected here.
const fn carried_in_data(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Data | Opcode::Resize | Opcode::Progress | Opcode::Result
    )
}

/// Builds the outer DATA payload for an inner frame.
pub fn outer_data_payload(frame: &InnerFrame) -> Result<Vec<u8>, FrameError> {
    if !carried_in_data(frame.opcode()) {
        return Err(FrameError::UnknownOpcode(frame.opcode().as_u8()));
    }
    let mut out = Vec::with_capacity(1 + frame.payload().len());
    out.push(frame.opcode().as_u8());
    out.extend_from_slice(frame.payload());
    Ok(out)
}

/// Rebuilds the inner frame from an outer DATA payload.
pub fn inner_from_outer_data(stream_id: u32, payload: &[u8]) -> Result<InnerFrame, FrameError> {
    let Some((&kind, rest)) = payload.split_first() else {
        return Err(FrameError::TruncatedHeader {
            actual: 0,
            expected: 1,
        });
    };
    let opcode = Opcode::from_u8(kind).ok_or(FrameError::UnknownOpcode(kind))?;
    if !carried_in_data(opcode) {
        return Err(FrameError::UnknownOpcode(kind));
    }
    InnerFrame::new(opcode, stream_id, Bytes::copy_from_slice(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frames_round_trip_through_the_mapping() {
        let inner = InnerFrame::new(Opcode::Data, 9, &b"chunk"[..]).expect("frame");
        let payload = outer_data_payload(&inner).expect("mappable");
        let back = inner_from_outer_data(9, &payload).expect("rebuilds");
        assert_eq!(back, inner);
    }

    #[test]
    fn resize_progress_and_result_are_mappable() {
        for opcode in [Opcode::Resize, Opcode::Progress, Opcode::Result] {
            let inner = InnerFrame::new(opcode, 1, &b"{}"[..]).expect("frame");
            let payload = outer_data_payload(&inner).expect("mappable");
            assert_eq!(payload[0], opcode.as_u8());
            let back = inner_from_outer_data(1, &payload).expect("rebuilds");
            assert_eq!(back.opcode(), opcode);
        }
    }

    #[test]
    fn open_and_close_are_refused_inside_data() {
        let close = InnerFrame::new(Opcode::Close, 1, Bytes::new()).expect("frame");
        assert!(outer_data_payload(&close).is_err());
        assert!(inner_from_outer_data(1, &[Opcode::Open.as_u8(), b'x']).is_err());
        assert!(inner_from_outer_data(1, &[Opcode::Close.as_u8()]).is_err());
    }

    #[test]
    fn unknown_kind_bytes_are_rejected() {
        let err = inner_from_outer_data(1, &[0x42, 1, 2]).unwrap_err();
        assert_eq!(err, FrameError::UnknownOpcode(0x42));
    }

    #[test]
    fn empty_data_payload_is_rejected() {
        assert!(inner_from_outer_data(1, &[]).is_err());
    }
}
