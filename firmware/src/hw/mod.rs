//! Board support for the rear node.
//!
//! Pin map (STM32G0B1KE):
//!
//! | Signal               | Pin  | Mode                  |
//! |----------------------|------|-----------------------|
//! | Shift cut            | PA4  | open drain            |
//! | Gear up solenoid     | PA5  | open drain            |
//! | Gear down solenoid   | PA6  | open drain            |
//! | Launch request       | PA7  | open drain            |
//! | Brake light          | PB0  | open drain            |
//! | Backup brake sensor  | PA0  | ADC                   |
//! | Backup clutch sensor | PA1  | ADC                   |
//! | Suspension L / R     | PA2 / PA3 | ADC              |
//! | Clutch servo         | PB4  | TIM3 CH1, 50 Hz       |
//! | Backup up/down/N     | PB5 / PB6 / PB7 | EXTI, pull-up |
//! | Wheel speed L / R    | PA8 / PA9 | EXTI, pull-up    |
//! | FDCAN1 RX / TX       | PA11 / PA12 |                 |

use embassy_stm32::adc::{Adc, AnyAdcChannel, SampleTime};
use embassy_stm32::gpio::OutputOpenDrain;
use embassy_stm32::peripherals::{ADC1, TIM3};
use embassy_stm32::timer::simple_pwm::SimplePwmChannel;
use embassy_time::{Duration, Instant};
use gearbox_core::Ticks;
use gearbox_core::can::Frame;
use gearbox_core::hal::{
    AnalogChannel, AnalogInput, BackupInputs, CanTransport, ClutchServo, Level, MailboxError,
    MailboxHandle, MailboxTable, OneShotTimer, Output, OutputDriver, ReceiverFilter,
};
use gearbox_core::ticks::TICK_MICROS;
use portable_atomic::{AtomicBool, Ordering};

pub mod can;

pub use can::CAN_TX;

/// Servo timer counts per 20 ms frame that the calibrated duty values assume.
pub const SERVO_FRAME_COUNTS: u32 = 40_000;

/// Set while the wired gear buttons should be acted on.
pub static BACKUP_BUTTONS_ARMED: AtomicBool = AtomicBool::new(false);

/// Outputs in [`Output::ALL`] order.
pub struct Outputs<'d> {
    pub shift_cut: OutputOpenDrain<'d>,
    pub gear_up: OutputOpenDrain<'d>,
    pub gear_down: OutputOpenDrain<'d>,
    pub launch: OutputOpenDrain<'d>,
    pub brake_light: OutputOpenDrain<'d>,
}

/// Analog inputs in [`AnalogChannel`] order.
pub struct AnalogInputs {
    pub backup_brake: AnyAdcChannel<ADC1>,
    pub backup_clutch: AnyAdcChannel<ADC1>,
    pub suspension_left: AnyAdcChannel<ADC1>,
    pub suspension_right: AnyAdcChannel<ADC1>,
}

/// Concrete collaborators handed to the rear-node core.
pub struct RearHardware {
    outputs: Outputs<'static>,
    adc: Adc<'static, ADC1>,
    analog: AnalogInputs,
    servo: SimplePwmChannel<'static, TIM3>,
    mailboxes: MailboxTable,
    deadline: Option<Instant>,
}

impl RearHardware {
    pub fn new(
        outputs: Outputs<'static>,
        mut adc: Adc<'static, ADC1>,
        analog: AnalogInputs,
        mut servo: SimplePwmChannel<'static, TIM3>,
    ) -> Self {
        adc.set_sample_time(SampleTime::CYCLES79_5);
        servo.enable();
        Self {
            outputs,
            adc,
            analog,
            servo,
            mailboxes: MailboxTable::new(),
            deadline: None,
        }
    }

    /// Armed mailbox accepting `id`, if any.
    pub fn route(&self, id: u32) -> Option<MailboxHandle> {
        self.mailboxes.route(id)
    }

    /// Instant at which the one-shot timer fires.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarms the one-shot timer ahead of dispatching its expiry.
    pub fn clear_deadline(&mut self) {
        self.deadline = None;
    }

    fn output_mut(&mut self, output: Output) -> &mut OutputOpenDrain<'static> {
        match output {
            Output::ShiftCut => &mut self.outputs.shift_cut,
            Output::GearUp => &mut self.outputs.gear_up,
            Output::GearDown => &mut self.outputs.gear_down,
            Output::Launch => &mut self.outputs.launch,
            Output::BrakeLight => &mut self.outputs.brake_light,
        }
    }
}

impl OutputDriver for RearHardware {
    fn set_output(&mut self, output: Output, level: Level) {
        let pin = self.output_mut(output);
        match level {
            Level::Asserted => pin.set_low(),
            Level::TriState => pin.set_high(),
        }
    }
}

impl OneShotTimer for RearHardware {
    fn arm(&mut self, duration: Ticks) {
        let micros = u64::from(duration.as_u16()) * TICK_MICROS;
        self.deadline = Some(Instant::now() + Duration::from_micros(micros));
    }
}

impl AnalogInput for RearHardware {
    fn read_analog(&mut self, channel: AnalogChannel) -> u16 {
        let input = match channel {
            AnalogChannel::BackupBrakePressure => &mut self.analog.backup_brake,
            AnalogChannel::BackupClutch => &mut self.analog.backup_clutch,
            AnalogChannel::SuspensionLeft => &mut self.analog.suspension_left,
            AnalogChannel::SuspensionRight => &mut self.analog.suspension_right,
        };
        self.adc.blocking_read(input)
    }
}

impl CanTransport for RearHardware {
    fn send(&mut self, id: u32, payload: &[u8]) {
        match Frame::new(id, payload) {
            Ok(frame) => {
                if CAN_TX.try_send(frame).is_err() {
                    defmt::warn!("can: tx queue full, dropped {=u32:#x}", id);
                }
            }
            Err(error) => defmt::warn!("can: {}", defmt::Display2Format(&error)),
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

impl ClutchServo for RearHardware {
    fn set_duty_cycle(&mut self, duty: u16) {
        let max = u32::from(self.servo.max_duty_cycle());
        let scaled = (u32::from(duty) * max / SERVO_FRAME_COUNTS).min(max);
        self.servo.set_duty_cycle(scaled as u16);
    }
}

impl BackupInputs for RearHardware {
    fn enable_backup_buttons(&mut self) {
        BACKUP_BUTTONS_ARMED.store(true, Ordering::Release);
        defmt::warn!("failsafe: backup gear buttons armed");
    }

    fn disable_backup_buttons(&mut self) {
        BACKUP_BUTTONS_ARMED.store(false, Ordering::Release);
        defmt::info!("failsafe: backup gear buttons released");
    }
}
