mod common;

use common::MockHardware;
use gearbox_core::Ticks;
use gearbox_core::config::{REAR_NODE, REAR_NODE_LUR6, SearchStrategy};
use gearbox_core::gear::Gear;
use gearbox_core::hal::{Level, Output};
use gearbox_core::sequencer::{GearSequencer, SequenceKind, Step};
use gearbox_core::telemetry::{TelemetryEventKind, TelemetryRecorder};

#[test]
fn shift_up_from_first_follows_cut_then_pulse_timing() {
    let mut sequencer = GearSequencer::new(&REAR_NODE);
    let mut hw = MockHardware::default();
    let mut telemetry = TelemetryRecorder::<32>::new();

    assert!(sequencer.request_shift_up(Gear::First, &mut hw, &mut telemetry));
    assert!(sequencer.is_busy());
    assert_eq!(hw.level(Output::ShiftCut), Level::Asserted);
    assert_eq!(hw.level(Output::GearUp), Level::TriState);
    assert_eq!(hw.arms, vec![Ticks::new(300)]);

    sequencer.on_timer_expired(Gear::First, &mut hw, &mut telemetry);
    assert_eq!(hw.level(Output::ShiftCut), Level::TriState);
    assert_eq!(hw.level(Output::GearUp), Level::Asserted);
    // 400 base plus the 400 bonus out of first
    assert_eq!(hw.last_arm(), Some(Ticks::new(800)));
    assert!(sequencer.is_busy());

    sequencer.on_timer_expired(Gear::Second, &mut hw, &mut telemetry);
    assert!(hw.all_released());
    assert!(!sequencer.is_busy());
    assert_eq!(sequencer.step(), Step::Idle);
    assert_eq!(hw.arms.len(), 2);
    assert_eq!(
        telemetry.count(TelemetryEventKind::SequenceComplete(SequenceKind::ShiftUp)),
        1
    );
}

#[test]
fn shift_up_from_third_has_no_bonus() {
    let mut sequencer = GearSequencer::new(&REAR_NODE);
    let mut hw = MockHardware::default();
    let mut telemetry = TelemetryRecorder::<32>::new();

    sequencer.request_shift_up(Gear::Third, &mut hw, &mut telemetry);
    sequencer.on_timer_expired(Gear::Third, &mut hw, &mut telemetry);
    assert_eq!(hw.last_arm(), Some(Ticks::new(400)));
}

#[test]
fn shift_down_from_second_adds_the_bonus() {
    let mut sequencer = GearSequencer::new(&REAR_NODE_LUR6);
    let mut hw = MockHardware::default();
    let mut telemetry = TelemetryRecorder::<32>::new();

    assert!(sequencer.request_shift_down(Gear::Second, &mut hw, &mut telemetry));
    assert_eq!(hw.level(Output::GearDown), Level::Asserted);
    assert_eq!(hw.level(Output::ShiftCut), Level::TriState);
    assert_eq!(hw.arms, vec![Ticks::new(1_150)]);

    sequencer.on_timer_expired(Gear::First, &mut hw, &mut telemetry);
    assert!(hw.all_released());
    assert!(!sequencer.is_busy());
}

#[test]
fn shift_down_from_neutral_uses_the_neutral_pulse() {
    let mut sequencer = GearSequencer::new(&REAR_NODE);
    let mut hw = MockHardware::default();
    let mut telemetry = TelemetryRecorder::<32>::new();

    sequencer.request_shift_down(Gear::Neutral, &mut hw, &mut telemetry);
    assert_eq!(hw.arms, vec![REAR_NODE.shift.gear_down_from_neutral]);
}

#[test]
fn requests_while_busy_have_no_side_effects() {
    let mut sequencer = GearSequencer::new(&REAR_NODE);
    let mut hw = MockHardware::default();
    let mut telemetry = TelemetryRecorder::<32>::new();

    assert!(sequencer.request_shift_up(Gear::Second, &mut hw, &mut telemetry));
    let outputs = hw.output_log.clone();
    let arms = hw.arms.clone();
    let step = sequencer.step();

    assert!(!sequencer.request_shift_up(Gear::Second, &mut hw, &mut telemetry));
    assert!(!sequencer.request_shift_down(Gear::Second, &mut hw, &mut telemetry));
    assert!(!sequencer.request_launch(&mut hw, &mut telemetry));
    assert!(!sequencer.request_neutral_single(Gear::First, &mut hw, &mut telemetry));
    assert!(!sequencer.request_neutral_repeated(
        SearchStrategy::Linear,
        Gear::First,
        &mut hw,
        &mut telemetry
    ));

    assert_eq!(hw.output_log, outputs);
    assert_eq!(hw.arms, arms);
    assert!(hw.sent.is_empty());
    assert_eq!(sequencer.step(), step);
    assert_eq!(sequencer.active(), Some(SequenceKind::ShiftUp));
    assert!(sequencer.is_busy());

    for kind in [
        SequenceKind::ShiftUp,
        SequenceKind::ShiftDown,
        SequenceKind::Launch,
        SequenceKind::NeutralSingle,
        SequenceKind::NeutralRepeat,
    ] {
        assert_eq!(
            telemetry.count(TelemetryEventKind::RequestDropped(kind)),
            1,
            "{kind} drop not recorded"
        );
    }

    // the original chain still runs to completion
    sequencer.on_timer_expired(Gear::Second, &mut hw, &mut telemetry);
    sequencer.on_timer_expired(Gear::Third, &mut hw, &mut telemetry);
    assert!(!sequencer.is_busy());
    assert!(hw.all_released());
}

#[test]
fn a_new_shift_is_accepted_once_the_previous_completes() {
    let mut sequencer = GearSequencer::new(&REAR_NODE);
    let mut hw = MockHardware::default();
    let mut telemetry = TelemetryRecorder::<32>::new();

    sequencer.request_shift_down(Gear::Third, &mut hw, &mut telemetry);
    sequencer.on_timer_expired(Gear::Second, &mut hw, &mut telemetry);
    assert!(sequencer.request_shift_down(Gear::Second, &mut hw, &mut telemetry));
    assert_eq!(
        telemetry.count(TelemetryEventKind::SequenceStarted(SequenceKind::ShiftDown)),
        2
    );
}
