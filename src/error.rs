//! Error types, one enum per subsystem.
//!
//! Device-level errors (valve, sensor) are caught and logged at the
//! task boundary; they skip a cycle rather than terminate the
//! controller. All variants implement `core::error::Error`, so the
//! `main` boundary can wrap them in `anyhow` context where needed.

use core::fmt;

// ---------------------------------------------------------------------------
// Valve errors
// ---------------------------------------------------------------------------

/// Actuation failure. After `Unconfirmed` the valve's reported state is
/// left at the transient value (`Opening`/`Closing`) — the caller must
/// treat the physical state as unknown, not assume the opposite state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveError {
    /// The transition could not be confirmed within the attempt budget.
    Unconfirmed {
        /// Number of pulses issued before giving up.
        attempts: u8,
    },
    /// A pulse sequence is already outstanding; `set_state` is not
    /// reentrant.
    Busy,
    /// One of the drive lines could not be written.
    PinWrite,
}

impl fmt::Display for ValveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfirmed { attempts } => {
                write!(f, "unconfirmed after {attempts} pulse(s)")
            }
            Self::Busy => write!(f, "actuation already in progress"),
            Self::PinWrite => write!(f, "drive line write failed"),
        }
    }
}

impl core::error::Error for ValveError {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// The transducer did not answer or the bus transaction failed.
    ReadFailed,
    /// Reading is outside the physically plausible range.
    OutOfRange,
    /// The sensor power rail could not be switched.
    PowerRail,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFailed => write!(f, "read failed"),
            Self::OutOfRange => write!(f, "reading out of range"),
            Self::PowerRail => write!(f, "power rail switch failed"),
        }
    }
}

impl core::error::Error for SensorError {}

// ---------------------------------------------------------------------------
// Settings errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    /// The backing store could not be read or written.
    Io(&'static str),
    /// The stored blob is not valid JSON (or a list exceeds capacity).
    Corrupt,
    /// The key exists but holds a different value type.
    WrongType,
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "storage I/O failed: {msg}"),
            Self::Corrupt => write!(f, "stored settings blob is corrupt"),
            Self::WrongType => write!(f, "setting holds a different type"),
        }
    }
}

impl core::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        assert_eq!(
            ValveError::Unconfirmed { attempts: 5 }.to_string(),
            "unconfirmed after 5 pulse(s)"
        );
        assert_eq!(SensorError::ReadFailed.to_string(), "read failed");
        assert!(SettingsError::Io("nvs write failed")
            .to_string()
            .starts_with("storage I/O failed"));
    }
}
