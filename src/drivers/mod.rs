//! Actuator drivers and device-only hardware bring-up.

pub mod valve;

#[cfg(target_os = "espidf")]
pub mod hw_init;
