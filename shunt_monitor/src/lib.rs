#![no_std]

#[cfg(test)]
extern crate std;

pub mod bsp;
pub mod calibration;
pub mod capacity;
pub mod error;
pub mod monitor;
pub mod protection;
pub mod run_flat;
pub mod settings;
pub mod storage;
pub mod telemetry;
