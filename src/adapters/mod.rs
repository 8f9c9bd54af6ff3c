//! Driven adapters: storage, wall clock, and device-only transducers.

pub mod storage;
pub mod time;

#[cfg(target_os = "espidf")]
pub mod hardware;
