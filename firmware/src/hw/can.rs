//! Glue between FDCAN frames and the core's frame type.
//!
//! The peripheral accepts every extended frame into FIFO 1; which peer a frame
//! belongs to is decided in software by the core's mailbox table.

use embassy_stm32::can;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_can::Id;
use gearbox_core::can::Frame;

/// Outgoing frames waiting for the transmit task.
pub const CAN_TX_DEPTH: usize = 16;

pub type CanTxQueue = Channel<CriticalSectionRawMutex, Frame, CAN_TX_DEPTH>;

pub static CAN_TX: CanTxQueue = Channel::new();

/// Converts a received frame. Standard identifiers are widened.
pub fn from_bus(frame: &can::Frame) -> Option<Frame> {
    let id = match frame.id() {
        Id::Standard(id) => u32::from(id.as_raw()),
        Id::Extended(id) => id.as_raw(),
    };
    Frame::new(id, frame.data()).ok()
}

/// Converts an outgoing frame; every identifier the node sends is extended.
pub fn to_bus(frame: &Frame) -> Option<can::Frame> {
    can::Frame::new_extended(frame.id(), frame.payload()).ok()
}
