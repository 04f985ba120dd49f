use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{Either4, select4};
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::can as fdcan;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, OutputOpenDrain, OutputType, Pull, Speed};
use embassy_stm32::time::hz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Ticker, Timer};
use gearbox_core::config::REAR_NODE;
use gearbox_core::node::{BackupButton, NodeShared, RearNode, WheelSide};
use static_cell::StaticCell;

use crate::hw::{AnalogInputs, Outputs, RearHardware, can};
use crate::status::{self, StatusSnapshot};
use crate::telemetry::TelemetryLog;

mod can_task;
mod input_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

bind_interrupts!(struct Irqs {
    TIM16_FDCAN_IT0 => fdcan::IT0InterruptHandler<peripherals::FDCAN1>;
    TIM17_FDCAN_IT1 => fdcan::IT1InterruptHandler<peripherals::FDCAN1>;
});

const CAN_BITRATE: u32 = 500_000;
/// Scheduler period: the failsafe counters and periodic frames run at 100 Hz.
const SCHEDULER_PERIOD_MS: u64 = 10;
/// Status line once per second.
const STATUS_PERIOD_TICKS: u32 = 100;

pub(super) static SHARED: NodeShared = NodeShared::new();
pub(super) static BUTTON_EVENTS: Channel<CriticalSectionRawMutex, BackupButton, 4> =
    Channel::new();
static NODE: StaticCell<RearNode<'static, RearHardware>> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());

    let outputs = Outputs {
        shift_cut: OutputOpenDrain::new(p.PA4, Level::High, Speed::Low),
        gear_up: OutputOpenDrain::new(p.PA5, Level::High, Speed::Low),
        gear_down: OutputOpenDrain::new(p.PA6, Level::High, Speed::Low),
        launch: OutputOpenDrain::new(p.PA7, Level::High, Speed::Low),
        brake_light: OutputOpenDrain::new(p.PB0, Level::High, Speed::Low),
    };
    let analog = AnalogInputs {
        backup_brake: p.PA0.degrade_adc(),
        backup_clutch: p.PA1.degrade_adc(),
        suspension_left: p.PA2.degrade_adc(),
        suspension_right: p.PA3.degrade_adc(),
    };
    let servo = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new_ch1(p.PB4, OutputType::PushPull)),
        None,
        None,
        None,
        hz(50),
        CountingMode::EdgeAlignedUp,
    )
    .split()
    .ch1;
    let hardware = RearHardware::new(outputs, Adc::new(p.ADC1), analog, servo);

    let mut configurator = fdcan::CanConfigurator::new(p.FDCAN1, p.PA11, p.PA12, Irqs);
    configurator.properties().set_extended_filter(
        fdcan::filter::ExtendedFilterSlot::_0,
        fdcan::filter::ExtendedFilter::accept_all_into_fifo1(),
    );
    configurator.set_bitrate(CAN_BITRATE);
    let (can_tx, mut can_rx, _properties) = configurator.into_normal_mode().split();

    spawner
        .spawn(can_task::transmit(can_tx))
        .expect("failed to spawn CAN transmit task");
    for (pin, button) in [
        (ExtiInput::new(p.PB5, p.EXTI5, Pull::Up), BackupButton::Up),
        (ExtiInput::new(p.PB6, p.EXTI6, Pull::Up), BackupButton::Down),
        (ExtiInput::new(p.PB7, p.EXTI7, Pull::Up), BackupButton::Neutral),
    ] {
        spawner
            .spawn(input_task::button(pin, button))
            .expect("failed to spawn backup button task");
    }
    for (pin, side) in [
        (ExtiInput::new(p.PA8, p.EXTI8, Pull::Up), WheelSide::Left),
        (ExtiInput::new(p.PA9, p.EXTI9, Pull::Up), WheelSide::Right),
    ] {
        spawner
            .spawn(input_task::wheel(pin, side))
            .expect("failed to spawn wheel sensor task");
    }

    let node = NODE.init(RearNode::new(REAR_NODE, &SHARED, hardware).expect("rear node calibration"));
    node.init().expect("receive mailboxes");
    defmt::info!("node: {} ready", node.config().name);

    let mut ticker = Ticker::every(Duration::from_millis(SCHEDULER_PERIOD_MS));
    let mut tick: u32 = 0;
    let mut log = TelemetryLog::new();

    loop {
        let deadline = node.hw().deadline();
        let expiry = async move {
            match deadline {
                Some(at) => Timer::at(at).await,
                None => core::future::pending::<()>().await,
            }
        };

        match select4(can_rx.read(), ticker.next(), expiry, BUTTON_EVENTS.receive()).await {
            Either4::First(Ok(envelope)) => {
                if let Some(frame) = can::from_bus(&envelope.frame) {
                    if let Some(handle) = node.hw().route(frame.id()) {
                        node.on_can_frame(handle, &frame);
                    }
                }
            }
            Either4::First(Err(error)) => {
                defmt::warn!("can: bus error {}", defmt::Debug2Format(&error));
            }
            Either4::Second(()) => {
                node.on_tick(tick);
                if tick % STATUS_PERIOD_TICKS == 0 {
                    status::log(&StatusSnapshot::capture(node, tick));
                }
                tick = tick.wrapping_add(1);
            }
            Either4::Third(()) => {
                node.hw_mut().clear_deadline();
                node.on_timer_expired();
            }
            Either4::Fourth(button) => node.on_backup_button(button),
        }

        node.poll();
        log.drain(node.telemetry());
    }
}
