//! Hardware collaborators the rear-node logic depends on.
//!
//! Register-level drivers live in the firmware crate; host tests and the
//! emulator provide recording implementations of the same traits.

use core::fmt;

use crate::Ticks;

/// Number of hardware CAN mailboxes available to receivers and transmitters.
pub const MAILBOX_COUNT: usize = 6;

/// Digital outputs driven by the rear node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Output {
    /// Ignition cut request to the engine computer.
    ShiftCut,
    /// Gear-up solenoid.
    GearUp,
    /// Gear-down solenoid.
    GearDown,
    /// Launch control request to the engine computer.
    Launch,
    BrakeLight,
}

impl Output {
    pub const ALL: [Output; 5] = [
        Output::ShiftCut,
        Output::GearUp,
        Output::GearDown,
        Output::Launch,
        Output::BrakeLight,
    ];

    pub const fn as_index(self) -> usize {
        match self {
            Output::ShiftCut => 0,
            Output::GearUp => 1,
            Output::GearDown => 2,
            Output::Launch => 3,
            Output::BrakeLight => 4,
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Output::ShiftCut => "shift-cut",
            Output::GearUp => "gear-up",
            Output::GearDown => "gear-down",
            Output::Launch => "launch",
            Output::BrakeLight => "brake-light",
        };
        f.write_str(label)
    }
}

/// Output drive level. Outputs are open-drain: asserted pulls to ground.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    Asserted,
    TriState,
}

/// Analog inputs sampled directly by the rear node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AnalogChannel {
    /// Locally wired brake pressure sensor, used once the front node is silent.
    BackupBrakePressure,
    /// Locally wired clutch paddle sensor, used once the mid node is silent.
    BackupClutch,
    SuspensionLeft,
    SuspensionRight,
}

/// Opaque handle of an armed receive mailbox.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MailboxHandle(u8);

impl MailboxHandle {
    pub const fn new(slot: u8) -> Self {
        Self(slot)
    }

    pub const fn slot(self) -> u8 {
        self.0
    }
}

/// Failure to arm a receive mailbox.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MailboxError {
    /// Every mailbox is already allocated.
    Exhausted,
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::Exhausted => f.write_str("no free CAN mailbox"),
        }
    }
}

/// Single countdown timer that reports expiry back to the sequencer.
pub trait OneShotTimer {
    /// Arms the timer, replacing any countdown already in progress.
    fn arm(&mut self, duration: Ticks);
}

/// Digital output stage.
pub trait OutputDriver {
    fn set_output(&mut self, output: Output, level: Level);
}

/// Calibrated ADC access.
pub trait AnalogInput {
    fn read_analog(&mut self, channel: AnalogChannel) -> u16;
}

/// Mailbox-style CAN controller.
pub trait CanTransport {
    /// Queues a frame for transmission. Transmit failures are handled by the
    /// transport itself (abort and retry), never by the caller.
    fn send(&mut self, id: u32, payload: &[u8]);

    /// Arms a receive mailbox for identifiers matching `id` under `mask`.
    fn register_receiver(&mut self, id: u32, mask: u32, len: u8)
    -> Result<MailboxHandle, MailboxError>;

    /// Releases a previously armed mailbox.
    fn free_receiver(&mut self, handle: MailboxHandle);
}

/// PWM output positioning the clutch servo.
pub trait ClutchServo {
    fn set_duty_cycle(&mut self, duty: u16);
}

/// Pin-change inputs for the wired gear buttons.
pub trait BackupInputs {
    fn enable_backup_buttons(&mut self);

    fn disable_backup_buttons(&mut self);
}

/// Everything the gear sequencer drives.
pub trait SequencerIo: OutputDriver + OneShotTimer + CanTransport {}

impl<T> SequencerIo for T where T: OutputDriver + OneShotTimer + CanTransport {}

/// Full set of collaborators used by the rear node.
pub trait NodeHardware: SequencerIo + AnalogInput + ClutchServo + BackupInputs {}

impl<T> NodeHardware for T where T: SequencerIo + AnalogInput + ClutchServo + BackupInputs {}

/// Software model of the controller's mailbox table.
///
/// Transports without hardware mailboxes use this to decide which armed
/// receiver, if any, accepts an incoming frame.
#[derive(Clone, Debug, Default)]
pub struct MailboxTable {
    slots: [Option<ReceiverFilter>; MAILBOX_COUNT],
}

/// Acceptance filter of an armed mailbox.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReceiverFilter {
    pub id: u32,
    pub mask: u32,
    pub len: u8,
}

impl ReceiverFilter {
    pub const fn new(id: u32, mask: u32, len: u8) -> Self {
        Self { id, mask, len }
    }

    /// Returns `true` when `id` passes the identifier/mask comparison.
    pub const fn accepts(&self, id: u32) -> bool {
        (id & self.mask) == (self.id & self.mask)
    }
}

impl MailboxTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAILBOX_COUNT],
        }
    }

    /// Allocates the lowest free slot.
    pub fn allocate(&mut self, filter: ReceiverFilter) -> Result<MailboxHandle, MailboxError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(MailboxError::Exhausted)?;
        *slot = Some(filter);
        Ok(MailboxHandle::new(index as u8))
    }

    /// Frees a slot. Freeing an idle slot is a no-op.
    pub fn release(&mut self, handle: MailboxHandle) {
        if let Some(slot) = self.slots.get_mut(usize::from(handle.slot())) {
            *slot = None;
        }
    }

    /// Returns the first armed mailbox accepting `id`.
    pub fn route(&self, id: u32) -> Option<MailboxHandle> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.filter(|filter| filter.accepts(id))
                .map(|_| MailboxHandle::new(index as u8))
        })
    }

    pub fn filter(&self, handle: MailboxHandle) -> Option<ReceiverFilter> {
        self.slots
            .get(usize::from(handle.slot()))
            .copied()
            .flatten()
    }

    /// Number of armed mailboxes.
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_filter_accepts_neighbouring_ids() {
        let filter = ReceiverFilter::new(0x1500, 0xFFFF_FFFC, 4);
        assert!(filter.accepts(0x1500));
        assert!(filter.accepts(0x1502));
        assert!(!filter.accepts(0x1504));
    }

    #[test]
    fn mailbox_table_reuses_freed_slots() {
        let mut table = MailboxTable::new();
        let first = table
            .allocate(ReceiverFilter::new(0x2000, 0xFFFF_FFFC, 8))
            .expect("first slot");
        let second = table
            .allocate(ReceiverFilter::new(0x4002, 0xFFFF_FFFF, 4))
            .expect("second slot");
        assert_eq!(table.in_use(), 2);
        assert_eq!(table.route(0x2001), Some(first));
        assert_eq!(table.route(0x4002), Some(second));

        table.release(first);
        assert_eq!(table.route(0x2001), None);
        let again = table
            .allocate(ReceiverFilter::new(0x2000, 0xFFFF_FFFC, 8))
            .expect("slot reuse");
        assert_eq!(again, first);
    }

    #[test]
    fn mailbox_table_reports_exhaustion() {
        let mut table = MailboxTable::new();
        for id in 0..MAILBOX_COUNT as u32 {
            table
                .allocate(ReceiverFilter::new(id, u32::MAX, 1))
                .expect("free slot");
        }
        assert_eq!(
            table.allocate(ReceiverFilter::new(0x99, u32::MAX, 1)),
            Err(MailboxError::Exhausted)
        );
    }
}
