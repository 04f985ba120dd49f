//! Payload layouts of the frames the rear node consumes and produces.

use core::fmt;

use super::{FrameError, take};
use crate::Ticks;
use crate::config::CanIds;
use crate::gear::{Approach, Gear};

/// Gear requests from the mid node, matched byte for byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GearCommand {
    Up,
    Down,
    NeutralSingle,
    NeutralRepeat,
}

impl GearCommand {
    pub const ALL: [GearCommand; 4] = [
        GearCommand::Up,
        GearCommand::Down,
        GearCommand::NeutralSingle,
        GearCommand::NeutralRepeat,
    ];

    pub const fn opcode(self) -> [u8; 4] {
        match self {
            GearCommand::Up => *b"PUPU",
            GearCommand::Down => *b"NWOD",
            GearCommand::NeutralSingle => *b"LGNS",
            GearCommand::NeutralRepeat => *b"TEPR",
        }
    }

    /// Only an exact match of payload and opcode counts.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.opcode().as_slice() == payload)
    }
}

impl fmt::Display for GearCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GearCommand::Up => "up",
            GearCommand::Down => "down",
            GearCommand::NeutralSingle => "neutral",
            GearCommand::NeutralRepeat => "neutral-repeat",
        };
        f.write_str(label)
    }
}

/// Payload of a launch-control request on the launch identifier.
pub const LAUNCH_OPCODE: [u8; 4] = *b"HCNL";

pub fn is_launch_request(payload: &[u8]) -> bool {
    payload == LAUNCH_OPCODE.as_slice()
}

/// Raw clutch paddle positions forwarded by the mid node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClutchPositions {
    pub left: u16,
    pub right: u16,
}

impl ClutchPositions {
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let bytes = take::<4>(payload)?;
        Ok(Self {
            right: u16::from_le_bytes([bytes[0], bytes[1]]),
            left: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }

    pub fn to_payload(self) -> [u8; 4] {
        let [r0, r1] = self.right.to_le_bytes();
        let [l0, l1] = self.left.to_le_bytes();
        [r0, r1, l0, l1]
    }
}

/// Fields of the engine computer broadcast used by the rear node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DtaMessage {
    Revs(u16),
    /// Raw gear-position sensor reading.
    GearPot(u16),
    /// Another frame of the broadcast; still proves the engine computer is alive.
    Other,
}

impl DtaMessage {
    pub fn decode(ids: &CanIds, id: u32, payload: &[u8]) -> Result<Self, FrameError> {
        if id == ids.dta_revs {
            let bytes = take::<8>(payload)?;
            Ok(DtaMessage::Revs(u16::from_be_bytes([bytes[6], bytes[7]])))
        } else if id == ids.dta_gear_pot {
            let bytes = take::<4>(payload)?;
            Ok(DtaMessage::GearPot(u16::from_be_bytes([bytes[2], bytes[3]])))
        } else {
            Ok(DtaMessage::Other)
        }
    }
}

/// Brake pressure broadcast by the front node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BrakePressure(pub u16);

impl BrakePressure {
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let bytes = take::<4>(payload)?;
        Ok(Self(u16::from_le_bytes([bytes[2], bytes[3]])))
    }
}

/// Packs two readings as `(high << 16) | low`, sent least significant byte
/// first. Used by the wheel speed, suspension, filtered clutch and duty logs.
pub fn encode_pair(high: u16, low: u16) -> [u8; 4] {
    ((u32::from(high) << 16) | u32::from(low)).to_le_bytes()
}

/// Try-time that found neutral: up pulses in the high half, down pulses in the
/// low half, zero when neutral was already engaged.
pub fn encode_neutral_success(last: Option<Approach>, try_up: Ticks, try_down: Ticks) -> [u8; 4] {
    match last {
        Some(Approach::FromFirst) => encode_pair(try_up.as_u16(), 0),
        Some(Approach::FromSecond) => encode_pair(0, try_down.as_u16()),
        None => [0; 4],
    }
}

pub fn encode_current_gear(gear: Gear) -> [u8; 1] {
    [gear.code()]
}

/// ASCII trace markers sent while searching for neutral.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagTag {
    /// Linear search started.
    Lin0,
    /// Another attempt is about to pulse.
    Rept,
    /// Search fell back to a single attempt at the start.
    Sng0,
    /// Search fell back to a single attempt mid-way.
    Sng1,
    /// Waiting for the gear sensor to settle.
    Lbts,
    /// Attempt limit reached.
    Stop,
}

impl DiagTag {
    pub const fn id(self) -> u32 {
        match self {
            DiagTag::Lin0 => 0x6000,
            DiagTag::Rept => 0x6011,
            DiagTag::Sng0 => 0x6030,
            DiagTag::Sng1 => 0x6031,
            DiagTag::Lbts => 0x6099,
            DiagTag::Stop => 0x60FF,
        }
    }

    pub const fn payload(self) -> [u8; 4] {
        match self {
            DiagTag::Lin0 => *b"LIN0",
            DiagTag::Rept => *b"REPT",
            DiagTag::Sng0 => *b"SNG0",
            DiagTag::Sng1 => *b"SNG1",
            DiagTag::Lbts => *b"LBTS",
            DiagTag::Stop => *b"STOP",
        }
    }

    pub fn from_frame(id: u32, payload: &[u8]) -> Option<Self> {
        [
            DiagTag::Lin0,
            DiagTag::Rept,
            DiagTag::Sng0,
            DiagTag::Sng1,
            DiagTag::Lbts,
            DiagTag::Stop,
        ]
        .into_iter()
        .find(|tag| tag.id() == id && tag.payload().as_slice() == payload)
    }
}

impl fmt::Display for DiagTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self.payload();
        let text = core::str::from_utf8(&payload).map_err(|_| fmt::Error)?;
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LUR7_CAN_IDS;

    #[test]
    fn gear_commands_require_exact_payload() {
        assert_eq!(GearCommand::from_payload(b"PUPU"), Some(GearCommand::Up));
        assert_eq!(GearCommand::from_payload(b"NWOD"), Some(GearCommand::Down));
        assert_eq!(
            GearCommand::from_payload(b"LGNS"),
            Some(GearCommand::NeutralSingle)
        );
        assert_eq!(
            GearCommand::from_payload(b"TEPR"),
            Some(GearCommand::NeutralRepeat)
        );
        assert_eq!(GearCommand::from_payload(b"PUP"), None);
        assert_eq!(GearCommand::from_payload(b"PUPUP"), None);
        assert_eq!(GearCommand::from_payload(b"pupu"), None);
        assert!(is_launch_request(b"HCNL"));
        assert!(!is_launch_request(b"HCN"));
    }

    #[test]
    fn clutch_positions_are_low_byte_first() {
        let positions = ClutchPositions::from_payload(&[0x10, 0x01, 0xE0, 0x01]).expect("4 bytes");
        assert_eq!(positions.right, 0x0110);
        assert_eq!(positions.left, 0x01E0);
        assert_eq!(positions.to_payload(), [0x10, 0x01, 0xE0, 0x01]);
    }

    #[test]
    fn engine_computer_fields_are_big_endian() {
        let revs = DtaMessage::decode(&LUR7_CAN_IDS, 0x2000, &[0, 0, 0, 0, 0, 0, 0x1F, 0x40])
            .expect("revs frame");
        assert_eq!(revs, DtaMessage::Revs(8000));

        let pot = DtaMessage::decode(&LUR7_CAN_IDS, 0x2004, &[0, 0, 0x03, 0x17, 0, 0, 0, 0])
            .expect("gear frame");
        assert_eq!(pot, DtaMessage::GearPot(791));

        assert_eq!(
            DtaMessage::decode(&LUR7_CAN_IDS, 0x2001, &[0; 8]),
            Ok(DtaMessage::Other)
        );
        assert!(DtaMessage::decode(&LUR7_CAN_IDS, 0x2000, &[0; 4]).is_err());
    }

    #[test]
    fn brake_pressure_uses_bytes_two_and_three() {
        assert_eq!(
            BrakePressure::from_payload(&[0xFF, 0xFF, 0x65, 0x00]),
            Ok(BrakePressure(101))
        );
    }

    #[test]
    fn neutral_success_log_places_up_time_in_the_high_half() {
        assert_eq!(
            encode_neutral_success(Some(Approach::FromFirst), Ticks::new(240), Ticks::new(250)),
            [0, 0, 240, 0]
        );
        assert_eq!(
            encode_neutral_success(Some(Approach::FromSecond), Ticks::new(240), Ticks::new(250)),
            [250, 0, 0, 0]
        );
        assert_eq!(
            encode_neutral_success(None, Ticks::new(240), Ticks::new(250)),
            [0; 4]
        );
    }

    #[test]
    fn diagnostic_tags_keep_trace_identifiers() {
        assert_eq!(DiagTag::Lin0.id(), 0x6000);
        assert_eq!(&DiagTag::Stop.payload(), b"STOP");
        assert_eq!(DiagTag::from_frame(0x6099, b"LBTS"), Some(DiagTag::Lbts));
        assert_eq!(DiagTag::from_frame(0x6098, b"LBTS"), None);
    }
}
