//! Property tests for the settings store, the flow counter and the
//! valve retry budget.
//!
//! Host only — proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};
use std::rc::Rc;

use embedded_hal::digital::OutputPin;
use futures_lite::future::block_on;
use proptest::prelude::*;

use dripfeed::adapters::storage::MemoryBackend;
use dripfeed::drivers::valve::{TransitionCheck, Valve, ValveState};
use dripfeed::error::ValveError;
use dripfeed::sensors::flow::{FlowSensor, FrequencyCounter};
use dripfeed::settings::Settings;

fn arb_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}(--[a-z_]{1,16})?"
}

// ── Settings: lazy-default semantics ──────────────────────────

proptest! {
    /// Whatever default reaches a key first is the value every later
    /// read sees, regardless of the later defaults.
    #[test]
    fn settings_first_default_wins(
        key in arb_key(),
        first in -1e9f64..1e9f64,
        later in -1e9f64..1e9f64,
    ) {
        // "created" is the fresh-store marker and already holds a bool.
        prop_assume!(key != "created");
        let s = Settings::load(Box::new(MemoryBackend::new()));
        prop_assert_eq!(s.get_f64(&key, first), Ok(first));
        prop_assert_eq!(s.get_f64(&key, later), Ok(first));
    }

    /// Any set of stored values survives a save/reload cycle through
    /// the backend blob byte-for-byte in meaning.
    #[test]
    fn settings_survive_reload(
        entries in proptest::collection::btree_map(
            arb_key(),
            -1e9f64..1e9f64,
            1..8,
        ),
    ) {
        let backend = MemoryBackend::new();
        let blob = backend.shared_blob();
        let s = Settings::load(Box::new(backend));
        for (key, value) in &entries {
            s.set(key, *value).unwrap();
        }

        let reloaded = Settings::load(Box::new(MemoryBackend::with_blob(blob)));
        for (key, value) in &entries {
            // A different default must not mask the stored value.
            prop_assert_eq!(reloaded.get_f64(key, value + 1.0), Ok(*value));
        }
    }

    /// Arbitrary garbage in the backing store never panics the loader;
    /// the store comes up fresh and usable.
    #[test]
    fn settings_tolerate_arbitrary_blobs(blob in ".*") {
        let s = Settings::load(Box::new(MemoryBackend::with_json(&blob)));
        prop_assert_eq!(s.get_f64("probe", 3.0), Ok(3.0));
    }
}

// ── Flow counter: window arithmetic ───────────────────────────

proptest! {
    /// frequency() is exactly count × 1000 / window for any window
    /// contents, and a rollover always leaves the live counter empty.
    #[test]
    fn frequency_matches_window_arithmetic(
        edges in 0u32..100_000u32,
        window_ms in 1u32..60_000u32,
    ) {
        static EDGES: AtomicU32 = AtomicU32::new(0);
        static WINDOW: AtomicU32 = AtomicU32::new(0);
        let c = FrequencyCounter::new(&EDGES, &WINDOW, window_ms);

        EDGES.store(edges, Ordering::Relaxed);
        c.roll_window();
        prop_assert_eq!(c.window_count(), edges);
        prop_assert_eq!(EDGES.load(Ordering::Relaxed), 0);

        let expected = edges as f32 * 1000.0 / window_ms as f32;
        prop_assert!((c.frequency() - expected).abs() <= expected * 1e-6);
    }

    /// The calibrated rate is zero exactly when the window is empty.
    #[test]
    fn rate_is_zero_iff_no_pulses(edges in 0u32..10_000u32) {
        static EDGES: AtomicU32 = AtomicU32::new(0);
        static WINDOW: AtomicU32 = AtomicU32::new(0);
        let sensor = FlowSensor::new(FrequencyCounter::new(&EDGES, &WINDOW, 1_000), 1.0 / 450.0);

        EDGES.store(edges, Ordering::Relaxed);
        sensor.counter().roll_window();
        prop_assert_eq!(sensor.rate() == 0.0, edges == 0);
    }
}

// ── Valve: retry budget ───────────────────────────────────────

#[derive(Clone, Default)]
struct CountingPin {
    highs: Rc<Cell<u32>>,
}

impl embedded_hal::digital::ErrorType for CountingPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for CountingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.highs.set(self.highs.get() + 1);
        Ok(())
    }
}

struct NeverConfirmed;
impl TransitionCheck for NeverConfirmed {
    async fn confirm(&self, _opening: bool) -> bool {
        false
    }
}

/// Confirms on the n-th attempt.
struct ConfirmOnAttempt {
    attempt: u8,
    calls: Cell<u8>,
}

impl TransitionCheck for ConfirmOnAttempt {
    async fn confirm(&self, _opening: bool) -> bool {
        self.calls.set(self.calls.get() + 1);
        self.calls.get() >= self.attempt
    }
}

fn fast_settings() -> Rc<Settings> {
    let s = Settings::load(Box::new(MemoryBackend::new()));
    s.set("valve1--pulse_duration", 0.001).unwrap();
    Rc::new(s)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// An unconfirmable transition pulses exactly `limit` times, ends
    /// with the enable line released, and reports the limit it spent.
    #[test]
    fn unconfirmed_valve_spends_exactly_its_budget(limit in 1u8..8u8) {
        let en = CountingPin::default();
        let en_highs = Rc::clone(&en.highs);
        let mut valve = Valve::with_check(
            "valve1",
            en,
            CountingPin::default(),
            CountingPin::default(),
            fast_settings(),
            NeverConfirmed,
        );
        valve.set_attempts_limit(limit);

        let result = block_on(valve.set_state(true));
        prop_assert_eq!(result, Err(ValveError::Unconfirmed { attempts: limit }));
        prop_assert_eq!(en_highs.get(), u32::from(limit));
        prop_assert!(valve.current_state().is_transient());
    }

    /// If confirmation arrives on attempt n ≤ limit, the valve commits
    /// after exactly n pulses.
    #[test]
    fn valve_stops_pulsing_once_confirmed(confirm_on in 1u8..6u8) {
        let en = CountingPin::default();
        let en_highs = Rc::clone(&en.highs);
        let mut valve = Valve::with_check(
            "valve1",
            en,
            CountingPin::default(),
            CountingPin::default(),
            fast_settings(),
            ConfirmOnAttempt { attempt: confirm_on, calls: Cell::new(0) },
        );
        valve.set_attempts_limit(8);

        let result = block_on(valve.set_state(true));
        prop_assert_eq!(result, Ok(ValveState::Open));
        prop_assert_eq!(en_highs.get(), u32::from(confirm_on));
    }
}
