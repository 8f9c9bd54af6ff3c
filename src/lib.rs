//! Dripfeed firmware library.
//!
//! Control core of the irrigation controller: valve actuation with
//! pulse-and-confirm, the ISR-fed flow counter, the fault-tolerant soil
//! sampling loop, the automatic watering policy, and the lazy-default
//! settings store they all depend on.
//!
//! Everything here builds and is tested on the host; ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod error;
pub mod history;
pub mod settings;

pub mod adapters;
pub mod drivers;
pub mod sensors;

pub mod pins;

mod link_shims;
