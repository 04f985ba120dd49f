use embassy_stm32::can::CanTx;

use crate::hw::{CAN_TX, can};

/// Drains the transmit queue onto the bus. Frames the peripheral cannot
/// represent are dropped with a warning.
#[embassy_executor::task]
pub async fn transmit(mut tx: CanTx<'static>) -> ! {
    loop {
        let frame = CAN_TX.receive().await;
        match can::to_bus(&frame) {
            Some(bus_frame) => {
                tx.write(&bus_frame).await;
            }
            None => defmt::warn!("can: cannot encode {=u32:#x}", frame.id()),
        }
    }
}
