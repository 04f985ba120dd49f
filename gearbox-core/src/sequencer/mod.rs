//! Timer-driven gear sequencer.
//!
//! Every gear action is a short chain of timed output changes. Instead of
//! blocking, each step sets the outputs, arms the one-shot timer and records
//! which step comes next; the owner of the timer calls
//! [`GearSequencer::on_timer_expired`] when the countdown ends and the
//! sequencer advances.
//!
//! Only one chain runs at a time. Requests arriving while `busy` is held are
//! dropped, never queued, and leave the outputs and the timer untouched.

use core::fmt;

use portable_atomic::{AtomicBool, Ordering};

use crate::Ticks;
use crate::can::{DiagTag, encode_neutral_success};
use crate::config::{NodeConfig, SearchStrategy, ShiftTimings};
use crate::gear::{Approach, Gear};
use crate::hal::{Level, Output, SequencerIo};
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder, attempt_number};

pub mod neutral;

pub use neutral::{BisectionBounds, NeutralSearch};

/// Gear actions the sequencer can run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SequenceKind {
    ShiftUp,
    ShiftDown,
    NeutralSingle,
    NeutralRepeat,
    Launch,
}

impl SequenceKind {
    pub const ALL: [SequenceKind; 5] = [
        SequenceKind::ShiftUp,
        SequenceKind::ShiftDown,
        SequenceKind::NeutralSingle,
        SequenceKind::NeutralRepeat,
        SequenceKind::Launch,
    ];

    pub const fn as_index(self) -> usize {
        match self {
            SequenceKind::ShiftUp => 0,
            SequenceKind::ShiftDown => 1,
            SequenceKind::NeutralSingle => 2,
            SequenceKind::NeutralRepeat => 3,
            SequenceKind::Launch => 4,
        }
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SequenceKind::ShiftUp),
            1 => Some(SequenceKind::ShiftDown),
            2 => Some(SequenceKind::NeutralSingle),
            3 => Some(SequenceKind::NeutralRepeat),
            4 => Some(SequenceKind::Launch),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SequenceKind::ShiftUp => "shift-up",
            SequenceKind::ShiftDown => "shift-down",
            SequenceKind::NeutralSingle => "neutral-single",
            SequenceKind::NeutralRepeat => "neutral-repeat",
            SequenceKind::Launch => "launch",
        };
        f.write_str(label)
    }
}

/// Step to run when the armed timer expires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    Idle,
    /// Shift-cut asserted, up-solenoid not yet fired.
    ShiftCut,
    /// Up or down solenoid energised for a gear change.
    ShiftPulse,
    LaunchPulse,
    NeutralSinglePulse,
    NeutralSingleSettle,
    NeutralSearchPulse,
    /// Outputs released, waiting for the gear sensor before the next attempt.
    NeutralSearchSettle,
}

/// Gear, neutral and launch sequencing for one node.
#[derive(Debug)]
pub struct GearSequencer {
    busy: AtomicBool,
    step: Step,
    active: Option<SequenceKind>,
    shift: ShiftTimings,
    neutral: NeutralSearch,
    log_neutral_id: u32,
}

impl GearSequencer {
    pub const fn new(config: &NodeConfig) -> Self {
        Self {
            busy: AtomicBool::new(false),
            step: Step::Idle,
            active: None,
            shift: config.shift,
            neutral: NeutralSearch::new(config.neutral),
            log_neutral_id: config.can.log_neutral,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub const fn step(&self) -> Step {
        self.step
    }

    pub const fn active(&self) -> Option<SequenceKind> {
        self.active
    }

    pub const fn neutral(&self) -> &NeutralSearch {
        &self.neutral
    }

    /// Up-shift: shift-cut lead, then the up-solenoid pulse.
    pub fn request_shift_up<H: SequencerIo, const N: usize>(
        &mut self,
        gear: Gear,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) -> bool {
        if !self.try_begin(SequenceKind::ShiftUp, telemetry) {
            return false;
        }
        io.set_output(Output::ShiftCut, Level::Asserted);
        self.schedule(Step::ShiftCut, self.shift.shift_cut_for(gear), io);
        true
    }

    /// Down-shift: a single down-solenoid pulse.
    pub fn request_shift_down<H: SequencerIo, const N: usize>(
        &mut self,
        gear: Gear,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) -> bool {
        if !self.try_begin(SequenceKind::ShiftDown, telemetry) {
            return false;
        }
        io.set_output(Output::GearDown, Level::Asserted);
        self.schedule(Step::ShiftPulse, self.shift.gear_down_for(gear), io);
        true
    }

    /// Launch-control request pulse to the engine computer.
    pub fn request_launch<H: SequencerIo, const N: usize>(
        &mut self,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) -> bool {
        if !self.try_begin(SequenceKind::Launch, telemetry) {
            return false;
        }
        io.set_output(Output::Launch, Level::Asserted);
        self.schedule(Step::LaunchPulse, self.shift.launch_pulse, io);
        true
    }

    /// One neutral pulse with the current try-time, then a settling wait.
    ///
    /// From first or an unknown gear the up-solenoid is used, from second the
    /// down-solenoid. Any other gear is ignored.
    pub fn request_neutral_single<H: SequencerIo, const N: usize>(
        &mut self,
        gear: Gear,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) -> bool {
        let approach = match gear {
            Gear::First | Gear::Unknown => Approach::FromFirst,
            Gear::Second => Approach::FromSecond,
            _ => {
                if self.is_busy() {
                    telemetry.record(
                        TelemetryEventKind::RequestDropped(SequenceKind::NeutralSingle),
                        TelemetryPayload::none(),
                    );
                }
                return false;
            }
        };
        if !self.try_begin(SequenceKind::NeutralSingle, telemetry) {
            return false;
        }
        self.single_pulse(approach, io);
        true
    }

    /// Repeated neutral attempts, tuning the try-times between pulses.
    ///
    /// With an unknown gear there is nothing to tune against, so a single
    /// attempt runs instead.
    pub fn request_neutral_repeated<H: SequencerIo, const N: usize>(
        &mut self,
        strategy: SearchStrategy,
        gear: Gear,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) -> bool {
        match gear {
            Gear::First | Gear::Second => {
                if !self.try_begin(SequenceKind::NeutralRepeat, telemetry) {
                    return false;
                }
                self.neutral.begin(strategy);
                self.trace(DiagTag::Lin0, io);
                self.search_attempt(gear, io, telemetry);
                true
            }
            Gear::Unknown => {
                let started = self.request_neutral_single(gear, io, telemetry);
                if started {
                    self.neutral.begin(strategy);
                    self.trace(DiagTag::Sng0, io);
                }
                started
            }
            _ => {
                if self.is_busy() {
                    telemetry.record(
                        TelemetryEventKind::RequestDropped(SequenceKind::NeutralRepeat),
                        TelemetryPayload::none(),
                    );
                }
                false
            }
        }
    }

    /// Advances the running chain. `gear` is the gear as reported right now.
    pub fn on_timer_expired<H: SequencerIo, const N: usize>(
        &mut self,
        gear: Gear,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) {
        match self.step {
            Step::Idle => {}
            Step::ShiftCut => {
                io.set_output(Output::ShiftCut, Level::TriState);
                io.set_output(Output::GearUp, Level::Asserted);
                self.schedule(Step::ShiftPulse, self.shift.gear_up_for(gear), io);
            }
            Step::ShiftPulse => {
                io.set_output(Output::ShiftCut, Level::TriState);
                release_solenoids(io);
                self.finish(telemetry);
            }
            Step::LaunchPulse => {
                io.set_output(Output::Launch, Level::TriState);
                self.finish(telemetry);
            }
            Step::NeutralSinglePulse => {
                release_solenoids(io);
                self.schedule(Step::NeutralSingleSettle, self.neutral.stabilisation(), io);
            }
            Step::NeutralSingleSettle => self.finish(telemetry),
            Step::NeutralSearchPulse => {
                release_solenoids(io);
                self.schedule(Step::NeutralSearchSettle, self.neutral.stabilisation(), io);
                self.trace(DiagTag::Lbts, io);
            }
            Step::NeutralSearchSettle => self.search_attempt(gear, io, telemetry),
        }
    }

    fn search_attempt<H: SequencerIo, const N: usize>(
        &mut self,
        gear: Gear,
        io: &mut H,
        telemetry: &mut TelemetryRecorder<N>,
    ) {
        if gear == Gear::Unknown {
            // busy stays held through the single attempt
            self.trace(DiagTag::Sng1, io);
            self.single_pulse(Approach::FromFirst, io);
            return;
        }

        let Some(approach) = Approach::from_gear(gear) else {
            let last = self.neutral.last();
            let try_up = self.neutral.try_time(Approach::FromFirst);
            let try_down = self.neutral.try_time(Approach::FromSecond);
            io.send(
                self.log_neutral_id,
                &encode_neutral_success(last, try_up, try_down),
            );
            telemetry.record(
                TelemetryEventKind::NeutralFound,
                TelemetryPayload::NeutralResult { try_up, try_down },
            );
            self.finish(telemetry);
            return;
        };

        if self.neutral.limit_reached() {
            self.trace(DiagTag::Stop, io);
            telemetry.record(
                TelemetryEventKind::NeutralSearchExhausted,
                TelemetryPayload::none(),
            );
            self.finish(telemetry);
            return;
        }

        self.trace(DiagTag::Rept, io);
        let try_time = self.neutral.prepare_attempt(approach);
        telemetry.record(
            TelemetryEventKind::NeutralAttempt(approach),
            TelemetryPayload::Neutral {
                attempt: attempt_number(usize::from(self.neutral.attempts())),
                try_time,
            },
        );
        io.set_output(solenoid_for(approach), Level::Asserted);
        self.schedule(Step::NeutralSearchPulse, try_time, io);
    }

    fn single_pulse<H: SequencerIo>(&mut self, approach: Approach, io: &mut H) {
        io.set_output(solenoid_for(approach), Level::Asserted);
        self.schedule(
            Step::NeutralSinglePulse,
            self.neutral.try_time(approach),
            io,
        );
    }

    fn try_begin<const N: usize>(
        &mut self,
        kind: SequenceKind,
        telemetry: &mut TelemetryRecorder<N>,
    ) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            telemetry.record(
                TelemetryEventKind::RequestDropped(kind),
                TelemetryPayload::none(),
            );
            return false;
        }
        self.active = Some(kind);
        telemetry.record(
            TelemetryEventKind::SequenceStarted(kind),
            TelemetryPayload::none(),
        );
        true
    }

    fn schedule<H: SequencerIo>(&mut self, next: Step, duration: Ticks, io: &mut H) {
        self.step = next;
        io.arm(duration);
    }

    fn finish<const N: usize>(&mut self, telemetry: &mut TelemetryRecorder<N>) {
        self.step = Step::Idle;
        if let Some(kind) = self.active.take() {
            telemetry.record(
                TelemetryEventKind::SequenceComplete(kind),
                TelemetryPayload::none(),
            );
        }
        self.busy.store(false, Ordering::Release);
    }

    /// Trace markers are only part of the linear search's trace format.
    fn trace<H: SequencerIo>(&self, tag: DiagTag, io: &mut H) {
        if self.neutral.strategy() == SearchStrategy::Linear {
            io.send(tag.id(), &tag.payload());
        }
    }
}

const fn solenoid_for(approach: Approach) -> Output {
    match approach {
        Approach::FromFirst => Output::GearUp,
        Approach::FromSecond => Output::GearDown,
    }
}

fn release_solenoids<H: SequencerIo>(io: &mut H) {
    io.set_output(Output::GearUp, Level::TriState);
    io.set_output(Output::GearDown, Level::TriState);
}
