//! Port traits — the boundary between control logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AutoWaterer (domain)
//! ```
//!
//! Driven adapters (valve driver, soil sensor, clock, storage) implement
//! these traits. The [`AutoWaterer`](super::waterer::AutoWaterer)
//! consumes them via generics, so the decision logic never touches
//! hardware directly and every loop is testable with mocks.

use core::time::Duration;

use crate::drivers::valve::ValveState;
use crate::error::{SensorError, SettingsError, ValveError};

// ───────────────────────────────────────────────────────────────
// Valve port (domain → actuator)
// ───────────────────────────────────────────────────────────────

/// Command/query interface of one latching valve.
///
/// `set_state` is asynchronous and not reentrant: a call must be awaited
/// to completion before the next one is issued (implementations refuse a
/// concurrent call with [`ValveError::Busy`]).
pub trait ValveControl {
    /// Non-blocking read of the latest known state.
    fn current_state(&self) -> ValveState;

    /// Drive the valve towards open (`true`) or closed (`false`).
    /// Resolves once the transition is confirmed or the attempt budget
    /// is exhausted.
    #[allow(async_fn_in_trait)]
    async fn set_state(&self, open: bool) -> Result<ValveState, ValveError>;
}

// ───────────────────────────────────────────────────────────────
// Soil sensor port (sensor → domain)
// ───────────────────────────────────────────────────────────────

/// Read side of the soil sensor plus its sampling cadence.
///
/// Readings are the last known good values; `None` means no reading has
/// succeeded yet or the readings were invalidated after repeated
/// failures — callers must not water on `None`.
pub trait SoilReadings {
    fn temperature(&self) -> Option<f32>;
    fn humidity(&self) -> Option<f32>;

    /// Current sampling period.
    fn sample_period(&self) -> Duration;

    /// Change the sampling period. Takes effect on the next loop
    /// iteration; a sleep already in progress is not interrupted.
    fn set_sample_period(&self, period: Duration);
}

/// One fused temperature/humidity sample from the transducer hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoilReading {
    pub temperature: f32,
    pub humidity: f32,
}

/// The raw transducer: one shot, no retry. Fault tolerance lives in the
/// sampling loop, not here.
pub trait Transducer {
    fn sample(&mut self) -> Result<SoilReading, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Wall clock port (scheduler → time source)
// ───────────────────────────────────────────────────────────────

/// Wall-clock time for the watering scheduler. Returns `None` until the
/// clock has been synced (pre-SNTP) — the scheduler simply skips ticks
/// with no trustworthy time.
pub trait WallClock {
    fn hour_minute(&self) -> Option<(u8, u8)>;
}

// ───────────────────────────────────────────────────────────────
// History sink port (domain → external log)
// ───────────────────────────────────────────────────────────────

/// Where successful sensor readings go. The historical log owns its own
/// storage format and rotation; the core only appends.
pub trait ReadingSink {
    fn append(&mut self, record: &crate::history::ReadingRecord);
}

// ───────────────────────────────────────────────────────────────
// Settings backend port (settings store → stable storage)
// ───────────────────────────────────────────────────────────────

/// Stable storage for the settings blob. One JSON document, written
/// whole on every mutation.
pub trait SettingsBackend {
    /// Load the stored blob. `Ok(None)` means nothing stored yet.
    fn load(&mut self) -> Result<Option<String>, SettingsError>;

    /// Replace the stored blob atomically.
    fn save(&mut self, json: &str) -> Result<(), SettingsError>;
}
