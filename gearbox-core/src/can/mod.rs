//! CAN frames exchanged by the rear node.
//!
//! `frames` holds the payload layouts; this module only deals with the frame
//! envelope itself.

use core::fmt;

pub mod frames;

pub use frames::{
    BrakePressure, ClutchPositions, DiagTag, DtaMessage, GearCommand, LAUNCH_OPCODE,
    encode_current_gear, encode_neutral_success, encode_pair, is_launch_request,
};

/// Largest classic CAN payload.
pub const MAX_PAYLOAD: usize = 8;

/// Frame envelope errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameError {
    /// Payload longer than a classic CAN frame can carry.
    TooLong { len: usize },
    /// Payload shorter than the layout being decoded.
    TooShort { expected: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooLong { len } => {
                write!(f, "payload of {len} bytes exceeds {MAX_PAYLOAD}")
            }
            FrameError::TooShort { expected, actual } => {
                write!(f, "payload of {actual} bytes, expected {expected}")
            }
        }
    }
}

/// Received or outgoing frame with an extended identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    id: u32,
    data: [u8; MAX_PAYLOAD],
    len: u8,
}

impl Frame {
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::TooLong { len: payload.len() });
        }
        let mut data = [0; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            data,
            len: payload.len() as u8,
        })
    }

    pub const fn id(&self) -> u32 {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    pub const fn len(&self) -> usize {
        self.len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Returns the first `N` bytes of `payload`.
pub(crate) fn take<const N: usize>(payload: &[u8]) -> Result<[u8; N], FrameError> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(FrameError::TooShort {
            expected: N,
            actual: payload.len(),
        })
}
