//! Rear-node glue: CAN and tick call-ins, the main-loop pass and the state
//! they share.
//!
//! Interrupt-side entry points only decode, store and raise flags. Anything
//! that drives the sequencer or the clutch servo happens in [`RearNode::poll`],
//! which the firmware runs from its main loop.

use portable_atomic::{AtomicU8, AtomicU16, AtomicU32, Ordering};

use crate::brake::BrakeLight;
use crate::can::{
    BrakePressure, ClutchPositions, DtaMessage, Frame, GearCommand, encode_current_gear,
    encode_pair, is_launch_request,
};
use crate::clutch::ClutchActuator;
use crate::config::{CalibrationError, NodeConfig, SearchStrategy};
use crate::failsafe::{FailsafeEvent, FailsafeMonitor, Peer};
use crate::gear::{GearState, gear_from_pot};
use crate::hal::{AnalogChannel, Level, MailboxError, MailboxHandle, NodeHardware, Output};
use crate::sequencer::GearSequencer;
use crate::telemetry::{TELEMETRY_RING_CAPACITY, TelemetryPayload, TelemetryRecorder, Timestamp};

/// Work requested from interrupt context for the main loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Action {
    GearUp,
    GearDown,
    NeutralSingle,
    NeutralRepeat,
    Launch,
    /// New clutch positions are waiting to be filtered.
    ClutchUpdate,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::GearUp,
        Action::GearDown,
        Action::NeutralSingle,
        Action::NeutralRepeat,
        Action::Launch,
        Action::ClutchUpdate,
    ];

    const fn bit(self) -> u8 {
        match self {
            Action::GearUp => 1 << 0,
            Action::GearDown => 1 << 1,
            Action::NeutralSingle => 1 << 2,
            Action::NeutralRepeat => 1 << 3,
            Action::Launch => 1 << 4,
            Action::ClutchUpdate => 1 << 5,
        }
    }
}

impl From<GearCommand> for Action {
    fn from(command: GearCommand) -> Self {
        match command {
            GearCommand::Up => Action::GearUp,
            GearCommand::Down => Action::GearDown,
            GearCommand::NeutralSingle => Action::NeutralSingle,
            GearCommand::NeutralRepeat => Action::NeutralRepeat,
        }
    }
}

/// Snapshot of taken action flags.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ActionSet(u8);

impl ActionSet {
    pub const fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Action flags raised by interrupt handlers and consumed by the main loop.
#[derive(Debug, Default)]
pub struct ActionFlags(AtomicU8);

impl ActionFlags {
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn raise(&self, action: Action) {
        self.0.fetch_or(action.bit(), Ordering::AcqRel);
    }

    /// Takes every raised flag at once, clearing them.
    pub fn take(&self) -> ActionSet {
        ActionSet(self.0.swap(0, Ordering::AcqRel))
    }

    pub fn is_raised(&self, action: Action) -> bool {
        self.0.load(Ordering::Acquire) & action.bit() != 0
    }
}

/// Wired gear buttons used once the mid node is silent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackupButton {
    Up,
    Down,
    Neutral,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WheelSide {
    Left,
    Right,
}

const fn pack(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}

const fn unpack(word: u32) -> (u16, u16) {
    ((word >> 16) as u16, word as u16)
}

/// Sensor values handed between interrupt handlers and the main loop. Pairs
/// are packed into one word so both sides always update together.
#[derive(Debug, Default)]
pub struct SharedInputs {
    clutch: AtomicU32,
    suspension: AtomicU32,
    wheel_left: AtomicU16,
    wheel_right: AtomicU16,
}

impl SharedInputs {
    pub const fn new() -> Self {
        Self {
            clutch: AtomicU32::new(0),
            suspension: AtomicU32::new(0),
            wheel_left: AtomicU16::new(0),
            wheel_right: AtomicU16::new(0),
        }
    }

    pub fn set_clutch(&self, positions: ClutchPositions) {
        self.clutch
            .store(pack(positions.left, positions.right), Ordering::Release);
    }

    pub fn clutch(&self) -> ClutchPositions {
        let (left, right) = unpack(self.clutch.load(Ordering::Acquire));
        ClutchPositions { left, right }
    }

    pub fn set_suspension(&self, left: u16, right: u16) {
        self.suspension.store(pack(left, right), Ordering::Release);
    }

    pub fn suspension(&self) -> (u16, u16) {
        unpack(self.suspension.load(Ordering::Acquire))
    }

    /// Counts one wheel-speed sensor pulse.
    pub fn count_wheel_pulse(&self, side: WheelSide) {
        let counter = match side {
            WheelSide::Left => &self.wheel_left,
            WheelSide::Right => &self.wheel_right,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns and resets the pulse counts.
    pub fn take_wheel_counts(&self) -> (u16, u16) {
        (
            self.wheel_left.swap(0, Ordering::Relaxed),
            self.wheel_right.swap(0, Ordering::Relaxed),
        )
    }
}

/// State shared between the node and its interrupt handlers.
#[derive(Debug, Default)]
pub struct NodeShared {
    pub gear: GearState,
    pub inputs: SharedInputs,
    pub flags: ActionFlags,
}

impl NodeShared {
    pub const fn new() -> Self {
        Self {
            gear: GearState::new(),
            inputs: SharedInputs::new(),
            flags: ActionFlags::new(),
        }
    }
}

/// The rear node: gear sequencing, clutch servo, brake light and failsafe.
pub struct RearNode<'a, H, const N: usize = TELEMETRY_RING_CAPACITY> {
    config: NodeConfig,
    shared: &'a NodeShared,
    hw: H,
    sequencer: GearSequencer,
    clutch: ClutchActuator,
    failsafe: FailsafeMonitor,
    brake: BrakeLight,
    strategy: SearchStrategy,
    telemetry: TelemetryRecorder<N>,
}

impl<'a, H: NodeHardware, const N: usize> RearNode<'a, H, N> {
    pub fn new(config: NodeConfig, shared: &'a NodeShared, hw: H) -> Result<Self, CalibrationError> {
        config.validate()?;
        Ok(Self {
            clutch: ClutchActuator::new(&config.clutch)?,
            sequencer: GearSequencer::new(&config),
            failsafe: FailsafeMonitor::new(config.failsafe, &config.can),
            brake: BrakeLight::new(config.brake),
            strategy: config.neutral.strategy,
            telemetry: TelemetryRecorder::new(),
            config,
            shared,
            hw,
        })
    }

    /// Releases every output and arms the peer receivers.
    pub fn init(&mut self) -> Result<(), MailboxError> {
        for output in Output::ALL {
            self.hw.set_output(output, Level::TriState);
        }
        self.hw.disable_backup_buttons();
        self.failsafe.arm_receivers(&mut self.hw)
    }

    /// CAN receive call-in. Frames on mailboxes no peer owns are ignored.
    pub fn on_can_frame(&mut self, handle: MailboxHandle, frame: &Frame) {
        let Some(peer) = self.failsafe.peer_for(handle) else {
            return;
        };
        if let Some(event) = self.failsafe.on_frame(peer) {
            self.apply_failsafe_event(event);
        }

        let ids = &self.config.can;
        let payload = frame.payload();
        match peer {
            Peer::Mid => {
                if frame.id() == ids.gear {
                    if let Some(command) = GearCommand::from_payload(payload) {
                        self.shared.flags.raise(command.into());
                    }
                } else if frame.id() == ids.clutch {
                    if let Ok(positions) = ClutchPositions::from_payload(payload) {
                        self.shared.inputs.set_clutch(positions);
                        self.shared.flags.raise(Action::ClutchUpdate);
                    }
                } else if frame.id() == ids.launch && is_launch_request(payload) {
                    self.shared.flags.raise(Action::Launch);
                }
            }
            Peer::Front => {
                if let Ok(BrakePressure(pressure)) = BrakePressure::from_payload(payload) {
                    self.brake.update(pressure, &mut self.hw);
                }
            }
            Peer::Dta => match DtaMessage::decode(ids, frame.id(), payload) {
                Ok(DtaMessage::Revs(revs)) => self.shared.gear.set_revs(revs),
                Ok(DtaMessage::GearPot(raw)) => self.shared.gear.set_gear(gear_from_pot(raw)),
                Ok(DtaMessage::Other) | Err(_) => {}
            },
        }
    }

    /// Scheduler tick call-in (100 Hz). `tick` counts up from zero.
    pub fn on_tick(&mut self, tick: Timestamp) {
        self.telemetry.set_clock(tick);

        for event in self.failsafe.on_tick(&mut self.hw, &self.shared.gear) {
            self.apply_failsafe_event(event);
        }

        if self.failsafe.is_tripped(Peer::Mid) {
            self.shared.flags.raise(Action::ClutchUpdate);
        }

        let ids = self.config.can;
        if tick % 10 == 0 {
            let (left, right) = self.shared.inputs.take_wheel_counts();
            self.hw.send(ids.log_wheel_speed, &encode_pair(left, right));
        }
        if tick.wrapping_add(2) % 5 == 0 {
            let (left, right) = self.shared.inputs.suspension();
            self.hw.send(ids.log_suspension, &encode_pair(left, right));
        }
        if tick.wrapping_add(5) % 10 == 0 {
            let left = self.clutch.left();
            let right = self.clutch.right();
            self.hw.send(
                ids.log_clutch_filtered,
                &encode_pair(right.filtered() as u16, left.filtered() as u16),
            );
            self.hw.send(
                ids.log_duty_cycle,
                &encode_pair(right.duty() as u16, left.duty() as u16),
            );
        }
        let gear = self.shared.gear.gear();
        self.hw.send(ids.log_current_gear, &encode_current_gear(gear));
    }

    /// One-shot timer expiry call-in.
    pub fn on_timer_expired(&mut self) {
        let gear = self.shared.gear.gear();
        self.sequencer
            .on_timer_expired(gear, &mut self.hw, &mut self.telemetry);
    }

    /// Falling edge on a wired gear button. Ignored while the mid node is
    /// alive, since the buttons are only armed in failsafe.
    pub fn on_backup_button(&self, button: BackupButton) {
        if !self.failsafe.is_tripped(Peer::Mid) {
            return;
        }
        let action = match button {
            BackupButton::Up => Action::GearUp,
            BackupButton::Down => Action::GearDown,
            BackupButton::Neutral => Action::NeutralSingle,
        };
        self.shared.flags.raise(action);
    }

    /// One main-loop pass.
    pub fn poll(&mut self) {
        let actions = self.shared.flags.take();
        let gear_state = &self.shared.gear;

        if actions.contains(Action::GearUp) {
            self.sequencer
                .request_shift_up(gear_state.gear(), &mut self.hw, &mut self.telemetry);
        }
        if actions.contains(Action::GearDown) {
            self.sequencer
                .request_shift_down(gear_state.gear(), &mut self.hw, &mut self.telemetry);
        }
        if actions.contains(Action::NeutralSingle) {
            self.sequencer.request_neutral_single(
                gear_state.gear(),
                &mut self.hw,
                &mut self.telemetry,
            );
        }
        if actions.contains(Action::NeutralRepeat) {
            self.sequencer.request_neutral_repeated(
                self.strategy,
                gear_state.gear(),
                &mut self.hw,
                &mut self.telemetry,
            );
        }
        if actions.contains(Action::Launch) {
            self.sequencer
                .request_launch(&mut self.hw, &mut self.telemetry);
        }

        if actions.contains(Action::ClutchUpdate) {
            let positions = self.shared.inputs.clutch();
            let duty = self.clutch.update(positions.left, positions.right);
            self.hw.set_duty_cycle(duty);
        }

        let left = self.hw.read_analog(AnalogChannel::SuspensionLeft);
        let right = self.hw.read_analog(AnalogChannel::SuspensionRight);
        self.shared.inputs.set_suspension(left, right);

        if self.failsafe.is_tripped(Peer::Front) {
            let pressure = self.hw.read_analog(AnalogChannel::BackupBrakePressure);
            self.brake.update(pressure, &mut self.hw);
        }

        if self.failsafe.is_tripped(Peer::Mid) {
            let clutch = self.hw.read_analog(AnalogChannel::BackupClutch);
            self.shared.inputs.set_clutch(ClutchPositions {
                left: 0,
                right: clutch,
            });
        }
    }

    fn apply_failsafe_event(&mut self, event: FailsafeEvent) {
        self.telemetry.record(event.into(), TelemetryPayload::none());
        match event {
            FailsafeEvent::Tripped(Peer::Mid) => self.hw.enable_backup_buttons(),
            FailsafeEvent::Recovered(Peer::Mid) => self.hw.disable_backup_buttons(),
            _ => {}
        }
    }

    /// Search strategy used for repeated neutral requests.
    pub fn set_search_strategy(&mut self, strategy: SearchStrategy) {
        self.strategy = strategy;
    }

    pub const fn search_strategy(&self) -> SearchStrategy {
        self.strategy
    }

    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub const fn shared(&self) -> &'a NodeShared {
        self.shared
    }

    pub const fn sequencer(&self) -> &GearSequencer {
        &self.sequencer
    }

    pub const fn clutch(&self) -> &ClutchActuator {
        &self.clutch
    }

    pub const fn failsafe(&self) -> &FailsafeMonitor {
        &self.failsafe
    }

    pub const fn brake(&self) -> &BrakeLight {
        &self.brake
    }

    pub const fn telemetry(&self) -> &TelemetryRecorder<N> {
        &self.telemetry
    }

    pub const fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_taken_all_at_once() {
        let flags = ActionFlags::new();
        flags.raise(Action::GearUp);
        flags.raise(Action::ClutchUpdate);
        flags.raise(Action::GearUp);
        assert!(flags.is_raised(Action::GearUp));

        let taken = flags.take();
        assert!(taken.contains(Action::GearUp));
        assert!(taken.contains(Action::ClutchUpdate));
        assert!(!taken.contains(Action::Launch));
        assert!(flags.take().is_empty());
    }

    #[test]
    fn clutch_pair_is_stored_as_one_word() {
        let inputs = SharedInputs::new();
        inputs.set_clutch(ClutchPositions {
            left: 412,
            right: 399,
        });
        assert_eq!(
            inputs.clutch(),
            ClutchPositions {
                left: 412,
                right: 399
            }
        );
    }

    #[test]
    fn wheel_counts_reset_after_take() {
        let inputs = SharedInputs::new();
        for _ in 0..3 {
            inputs.count_wheel_pulse(WheelSide::Left);
        }
        inputs.count_wheel_pulse(WheelSide::Right);
        assert_eq!(inputs.take_wheel_counts(), (3, 1));
        assert_eq!(inputs.take_wheel_counts(), (0, 0));
    }
}
