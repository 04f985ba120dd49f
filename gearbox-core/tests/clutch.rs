use gearbox_core::clutch::{ClutchActuator, ClutchFilter, DutyCurve};
use gearbox_core::config::{ClutchCalibration, MID_NODE_CLUTCH, REAR_NODE, REAR_NODE_LUR6};

fn calibrations() -> [ClutchCalibration; 3] {
    [
        REAR_NODE.clutch.left,
        REAR_NODE_LUR6.clutch.left,
        MID_NODE_CLUTCH.left,
    ]
}

#[test]
fn filter_settles_on_a_constant_input() {
    for factor in [0.05, 0.1, 0.5, 1.0] {
        let mut filter = ClutchFilter::new(factor);
        for _ in 0..2_000 {
            filter.filter(437);
        }
        assert!((filter.value() - 437.0).abs() < 1e-2, "factor {factor}");
    }
}

#[test]
fn every_preset_clamps_outside_its_calibrated_travel() {
    for calibration in calibrations() {
        let curve = DutyCurve::new(&calibration).expect("preset validates");
        assert_eq!(curve.compute_duty_cycle(0.0), calibration.dc_closed);
        assert_eq!(
            curve.compute_duty_cycle(calibration.closed - 1.0),
            calibration.dc_closed
        );
        assert_eq!(
            curve.compute_duty_cycle(calibration.open + 1.0),
            calibration.dc_open
        );
        assert_eq!(curve.compute_duty_cycle(4_095.0), calibration.dc_open);
    }
}

#[test]
fn every_preset_is_continuous_at_its_break_points() {
    for calibration in calibrations() {
        let curve = DutyCurve::new(&calibration).expect("preset validates");
        for point in [
            calibration.closed,
            calibration.break_closed,
            calibration.break_open,
            calibration.open,
        ] {
            let at = curve.compute_duty_cycle(point);
            let above = curve.compute_duty_cycle(point + 0.01);
            let below = curve.compute_duty_cycle(point - 0.01);
            assert!((at - above).abs() < 5.0, "jump above {point}");
            assert!((at - below).abs() < 5.0, "jump below {point}");
        }
    }
}

#[test]
fn mid_node_clutch_follows_the_more_pressed_paddle() {
    let mut actuator = ClutchActuator::new(&MID_NODE_CLUTCH).expect("preset validates");
    let mut duty = 0;
    for _ in 0..1_000 {
        duty = actuator.update(300, 500);
    }
    assert_eq!(duty, 13_000);
    assert_eq!(actuator.left().duty(), 3_000.0);
}
