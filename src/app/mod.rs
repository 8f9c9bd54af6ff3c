//! Domain layer: port traits and the automatic watering policy.

pub mod ports;
pub mod waterer;
