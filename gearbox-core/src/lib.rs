#![no_std]

// Rear-node gearbox control shared by the MCU firmware and host tooling.
//
// Nothing in here touches registers: timers, outputs, the ADC and the CAN
// controller are reached through the traits in `hal`, so the same sequencing,
// clutch and failsafe logic runs on the target and in host tests.

pub mod brake;
pub mod can;
pub mod clutch;
pub mod config;
pub mod failsafe;
pub mod gear;
pub mod hal;
pub mod node;
pub mod sequencer;
pub mod telemetry;
pub mod ticks;

pub use ticks::Ticks;
