//! Wall-clock adapters.
//!
//! The scheduler only needs hour and minute of day, and only once the
//! clock is trustworthy. On device that means SNTP has run at least
//! once; until then the adapter reports `None` and the scheduler skips
//! its tick.

use crate::app::ports::WallClock;

// ───────────────────────────────────────────────────────────────
// ESP32 system clock
// ───────────────────────────────────────────────────────────────

/// System clock via `gettimeofday` + `localtime_r`.
#[cfg(target_os = "espidf")]
pub struct SystemClock;

#[cfg(target_os = "espidf")]
impl WallClock for SystemClock {
    fn hour_minute(&self) -> Option<(u8, u8)> {
        use core::ptr;

        let mut tv = esp_idf_svc::sys::timeval { tv_sec: 0, tv_usec: 0 };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, ptr::null_mut()) } != 0 {
            return None;
        }
        // Reject obviously unsynced time (e.g. before 2020-01-01).
        const EPOCH_2020: i64 = 1_577_836_800;
        if tv.tv_sec < EPOCH_2020 {
            return None;
        }
        let secs = tv.tv_sec as esp_idf_svc::sys::time_t;
        let mut tm: esp_idf_svc::sys::tm = unsafe { core::mem::zeroed() };
        if unsafe { esp_idf_svc::sys::localtime_r(&secs, &mut tm) }.is_null() {
            return None;
        }
        if !(0..24).contains(&tm.tm_hour) || !(0..60).contains(&tm.tm_min) {
            return None;
        }
        Some((tm.tm_hour as u8, tm.tm_min as u8))
    }
}

// ───────────────────────────────────────────────────────────────
// Simulated clock (host tests)
// ───────────────────────────────────────────────────────────────

/// Settable clock for host-side tests and simulation.
pub struct SimClock {
    now: core::cell::Cell<Option<(u8, u8)>>,
}

impl SimClock {
    /// A clock that has not synced yet.
    pub fn unset() -> Self {
        Self {
            now: core::cell::Cell::new(None),
        }
    }

    pub fn at(hour: u8, minute: u8) -> Self {
        let clock = Self::unset();
        clock.set(hour, minute);
        clock
    }

    pub fn set(&self, hour: u8, minute: u8) {
        self.now.set(Some((hour, minute)));
    }
}

impl WallClock for SimClock {
    fn hour_minute(&self) -> Option<(u8, u8)> {
        self.now.get()
    }
}
