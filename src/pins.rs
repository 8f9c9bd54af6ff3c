//! GPIO assignments.
//!
//! One place for the whole pin map so a board revision is a one-file
//! change. The valve is driven through an L9110-style H-bridge.

/// Valve H-bridge enable line.
pub const VALVE_EN_GPIO: i32 = 23;
/// Valve H-bridge direction input 1 (high + in2 low = open pulse).
pub const VALVE_IN1_GPIO: i32 = 22;
/// Valve H-bridge direction input 2.
pub const VALVE_IN2_GPIO: i32 = 21;

/// Flow sensor pulse output (edge-interrupt input).
pub const FLOW_PULSE_GPIO: i32 = 4;

/// Soil sensor single-wire data line.
pub const SOIL_DATA_GPIO: i32 = 18;
/// Soil sensor power rail switch.
pub const SOIL_POWER_GPIO: i32 = 19;
