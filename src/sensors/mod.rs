//! Sensor subsystem: the ISR-fed flow counter and the powered soil
//! temperature/humidity sensor.

pub mod flow;
pub mod soil;
