use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Timer};
use gearbox_core::node::{BackupButton, WheelSide};
use portable_atomic::Ordering;

use super::{BUTTON_EVENTS, SHARED};
use crate::hw::BACKUP_BUTTONS_ARMED;

const BUTTON_DEBOUNCE: Duration = Duration::from_millis(20);

/// Counts falling edges from one wheel-speed sensor.
#[embassy_executor::task(pool_size = 2)]
pub async fn wheel(mut pin: ExtiInput<'static>, side: WheelSide) -> ! {
    loop {
        pin.wait_for_falling_edge().await;
        SHARED.inputs.count_wheel_pulse(side);
    }
}

/// Wired gear button. Presses only reach the node while the mid node is
/// silent and the buttons have been armed.
#[embassy_executor::task(pool_size = 3)]
pub async fn button(mut pin: ExtiInput<'static>, button: BackupButton) -> ! {
    loop {
        pin.wait_for_falling_edge().await;
        Timer::after(BUTTON_DEBOUNCE).await;
        if pin.is_high() {
            continue;
        }
        if BACKUP_BUTTONS_ARMED.load(Ordering::Acquire)
            && BUTTON_EVENTS.try_send(button).is_err()
        {
            defmt::warn!("buttons: event queue full");
        }
        pin.wait_for_rising_edge().await;
    }
}
