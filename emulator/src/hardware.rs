//! Host stand-in for the rear node's peripherals.
//!
//! Time is a simple counter of 100 µs timer ticks advanced by the session.
//! Solenoid pulses are measured from assert to release and queued for the
//! gearbox model; every transmitted frame is kept until the session drains it.

use gearbox_core::Ticks;
use gearbox_core::can::Frame;
use gearbox_core::hal::{
    AnalogChannel, AnalogInput, BackupInputs, CanTransport, ClutchServo, Level, MailboxError,
    MailboxHandle, MailboxTable, OneShotTimer, Output, OutputDriver, ReceiverFilter,
};

use crate::gearbox::Stroke;

/// A finished solenoid pulse.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pulse {
    pub stroke: Stroke,
    pub length: Ticks,
}

/// A frame the node put on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub at: u64,
    pub frame: Frame,
}

#[derive(Debug)]
pub struct SimHardware {
    now: u64,
    deadline: Option<u64>,
    levels: [Level; 5],
    asserted_at: [Option<u64>; 5],
    pulses: Vec<Pulse>,
    analog: [u16; 4],
    mailboxes: MailboxTable,
    sent: Vec<SentFrame>,
    duty: Option<u16>,
    backup_buttons: bool,
}

impl SimHardware {
    pub fn new() -> Self {
        Self {
            now: 0,
            deadline: None,
            levels: [Level::TriState; 5],
            asserted_at: [None; 5],
            pulses: Vec::new(),
            analog: [0; 4],
            mailboxes: MailboxTable::new(),
            sent: Vec::new(),
            duty: None,
            backup_buttons: false,
        }
    }

    /// Timer ticks since the session started.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    pub fn level(&self, output: Output) -> Level {
        self.levels[output.as_index()]
    }

    pub fn set_analog(&mut self, channel: AnalogChannel, value: u16) {
        self.analog[analog_index(channel)] = value;
    }

    pub fn route(&self, id: u32) -> Option<MailboxHandle> {
        self.mailboxes.route(id)
    }

    pub fn mailboxes_in_use(&self) -> usize {
        self.mailboxes.in_use()
    }

    pub fn duty(&self) -> Option<u16> {
        self.duty
    }

    pub fn backup_buttons_enabled(&self) -> bool {
        self.backup_buttons
    }

    pub fn take_pulses(&mut self) -> Vec<Pulse> {
        std::mem::take(&mut self.pulses)
    }

    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

fn analog_index(channel: AnalogChannel) -> usize {
    match channel {
        AnalogChannel::BackupBrakePressure => 0,
        AnalogChannel::BackupClutch => 1,
        AnalogChannel::SuspensionLeft => 2,
        AnalogChannel::SuspensionRight => 3,
    }
}

fn stroke_for(output: Output) -> Option<Stroke> {
    match output {
        Output::GearUp => Some(Stroke::Up),
        Output::GearDown => Some(Stroke::Down),
        _ => None,
    }
}

impl OutputDriver for SimHardware {
    fn set_output(&mut self, output: Output, level: Level) {
        let index = output.as_index();
        match level {
            Level::Asserted => {
                if self.levels[index] == Level::TriState {
                    self.asserted_at[index] = Some(self.now);
                }
            }
            Level::TriState => {
                if let (Some(started), Some(stroke)) =
                    (self.asserted_at[index].take(), stroke_for(output))
                {
                    let elapsed = self.now.saturating_sub(started);
                    let length = Ticks::new(u16::try_from(elapsed).unwrap_or(u16::MAX));
                    self.pulses.push(Pulse { stroke, length });
                }
            }
        }
        self.levels[index] = level;
    }
}

impl OneShotTimer for SimHardware {
    fn arm(&mut self, duration: Ticks) {
        self.deadline = Some(self.now + u64::from(duration.as_u16()));
    }
}

impl AnalogInput for SimHardware {
    fn read_analog(&mut self, channel: AnalogChannel) -> u16 {
        self.analog[analog_index(channel)]
    }
}

impl CanTransport for SimHardware {
    fn send(&mut self, id: u32, payload: &[u8]) {
        if let Ok(frame) = Frame::new(id, payload) {
            self.sent.push(SentFrame { at: self.now, frame });
        }
    }

    fn register_receiver(
        &mut self,
        id: u32,
        mask: u32,
        len: u8,
    ) -> Result<MailboxHandle, MailboxError> {
        self.mailboxes.allocate(ReceiverFilter::new(id, mask, len))
    }

    fn free_receiver(&mut self, handle: MailboxHandle) {
        self.mailboxes.release(handle);
    }
}

impl ClutchServo for SimHardware {
    fn set_duty_cycle(&mut self, duty: u16) {
        self.duty = Some(duty);
    }
}

impl BackupInputs for SimHardware {
    fn enable_backup_buttons(&mut self) {
        self.backup_buttons = true;
    }

    fn disable_backup_buttons(&mut self) {
        self.backup_buttons = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_solenoid_pulses() {
        let mut hw = SimHardware::new();
        hw.set_now(100);
        hw.set_output(Output::GearUp, Level::Asserted);
        hw.set_now(340);
        hw.set_output(Output::GearUp, Level::TriState);
        hw.set_output(Output::ShiftCut, Level::Asserted);
        hw.set_output(Output::ShiftCut, Level::TriState);

        assert_eq!(
            hw.take_pulses(),
            vec![Pulse {
                stroke: Stroke::Up,
                length: Ticks::new(240)
            }]
        );
        assert!(hw.take_pulses().is_empty());
    }

    #[test]
    fn releasing_an_idle_output_is_not_a_pulse() {
        let mut hw = SimHardware::new();
        hw.set_output(Output::GearDown, Level::TriState);
        assert!(hw.take_pulses().is_empty());
    }

    #[test]
    fn timer_deadline_is_absolute() {
        let mut hw = SimHardware::new();
        hw.set_now(50);
        hw.arm(Ticks::new(300));
        assert_eq!(hw.deadline(), Some(350));
    }
}
