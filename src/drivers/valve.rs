//! Latching-valve driver.
//!
//! The valve is driven by an H-bridge pair (`in1`/`in2`) plus an enable
//! line. A latching valve holds its last commanded position without
//! power, so a state change is a brief directional pulse: set the
//! direction, assert enable, hold for the pulse duration, release.
//! The enable line is deasserted after every pulse regardless of
//! outcome — drive current must never be left flowing, even if the
//! surrounding task is torn down mid-pulse (a drop guard covers the
//! suspension point).
//!
//! Confirmation is pluggable because feedback hardware is optional: a
//! plain valve trusts the pulse, a flow-aware valve checks the flow
//! sensor after each pulse and retries up to the attempt budget.

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;

use async_io_mini::Timer;
use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::app::ports::ValveControl;
use crate::error::ValveError;
use crate::sensors::flow::FlowSensor;
use crate::settings::Settings;

/// Pulse hold time when the settings key is absent, seconds.
pub const DEFAULT_PULSE_SECS: f64 = 1.0;

/// Pulse cycles before `set_state` gives up.
pub const DEFAULT_ATTEMPTS: u8 = 5;

/// Settle time a flow-aware valve allows between pulse and rate check.
pub const DEFAULT_TRANSITION: Duration = Duration::from_secs(2);

// ───────────────────────────────────────────────────────────────
// State
// ───────────────────────────────────────────────────────────────

/// Valve state. `Opening`/`Closing` are transient: they persist past an
/// actuation only when the transition could not be confirmed, which
/// callers must read as "state unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    Closed,
    Closing,
    Opening,
    Open,
}

impl ValveState {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Closing | Self::Opening)
    }
}

// ───────────────────────────────────────────────────────────────
// Transition confirmation
// ───────────────────────────────────────────────────────────────

/// Post-pulse feedback check. `opening` is the direction just pulsed.
pub trait TransitionCheck {
    #[allow(async_fn_in_trait)]
    async fn confirm(&self, opening: bool) -> bool;
}

/// No feedback hardware: every pulse is trusted.
pub struct AlwaysConfirmed;

impl TransitionCheck for AlwaysConfirmed {
    async fn confirm(&self, _opening: bool) -> bool {
        true
    }
}

/// Flow-sensor feedback: wait out the mechanical transition, then
/// require flow to have started (opening) or stopped (closing).
pub struct FlowConfirm {
    sensor: Rc<FlowSensor>,
    transition: Duration,
}

impl FlowConfirm {
    pub fn new(sensor: Rc<FlowSensor>, transition: Duration) -> Self {
        Self { sensor, transition }
    }
}

impl TransitionCheck for FlowConfirm {
    async fn confirm(&self, opening: bool) -> bool {
        Timer::after(self.transition).await;
        let rate = self.sensor.rate();
        if opening { rate > 0.0 } else { rate == 0.0 }
    }
}

// ───────────────────────────────────────────────────────────────
// Valve
// ───────────────────────────────────────────────────────────────

struct DriveLines<EN, IN1, IN2> {
    en: EN,
    in1: IN1,
    in2: IN2,
}

/// One electromechanical latching valve.
///
/// Interior mutability keeps the whole API `&self` so the valve can be
/// shared behind `Rc` between the decision loop and status reporting;
/// no `RefCell` borrow is held across a suspension point.
pub struct Valve<EN, IN1, IN2, C = AlwaysConfirmed> {
    name: &'static str,
    lines: RefCell<DriveLines<EN, IN1, IN2>>,
    state: Cell<ValveState>,
    busy: Cell<bool>,
    attempts_limit: u8,
    check: C,
    settings: Rc<Settings>,
}

/// Resets the busy flag when an actuation ends, normally or not.
struct BusyGuard<'a>(&'a Cell<bool>);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Deasserts the enable line when a pulse ends, normally or not.
struct EnableGuard<'a, EN: OutputPin, IN1: OutputPin, IN2: OutputPin, C> {
    valve: &'a Valve<EN, IN1, IN2, C>,
}

impl<EN: OutputPin, IN1: OutputPin, IN2: OutputPin, C> Drop for EnableGuard<'_, EN, IN1, IN2, C> {
    fn drop(&mut self) {
        self.valve.release();
    }
}

impl<EN, IN1, IN2> Valve<EN, IN1, IN2, AlwaysConfirmed>
where
    EN: OutputPin,
    IN1: OutputPin,
    IN2: OutputPin,
{
    /// A plain valve with no feedback hardware.
    pub fn new(name: &'static str, en: EN, in1: IN1, in2: IN2, settings: Rc<Settings>) -> Self {
        Self::with_check(name, en, in1, in2, settings, AlwaysConfirmed)
    }
}

impl<EN, IN1, IN2, C> Valve<EN, IN1, IN2, C>
where
    EN: OutputPin,
    IN1: OutputPin,
    IN2: OutputPin,
{
    /// A valve with a custom post-pulse confirmation check.
    pub fn with_check(
        name: &'static str,
        mut en: EN,
        in1: IN1,
        in2: IN2,
        settings: Rc<Settings>,
        check: C,
    ) -> Self {
        // Never trust the line state at boot.
        if en.set_low().is_err() {
            warn!("{name}: could not deassert enable at init");
        }
        Self {
            name,
            lines: RefCell::new(DriveLines { en, in1, in2 }),
            state: Cell::new(ValveState::Closed),
            busy: Cell::new(false),
            attempts_limit: DEFAULT_ATTEMPTS,
            check,
            settings,
        }
    }

    /// Override the pulse attempt budget.
    pub fn set_attempts_limit(&mut self, attempts: u8) {
        self.attempts_limit = attempts.max(1);
    }

    /// Latest known state; `Closed` until the first confirmed actuation.
    pub fn current_state(&self) -> ValveState {
        self.state.get()
    }

    /// Pulse hold time, re-read from settings on every actuation so a
    /// runtime change takes effect on the next pulse.
    fn pulse_duration(&self) -> Duration {
        let key = format!("{}--pulse_duration", self.name);
        let secs = match self.settings.get_f64(&key, DEFAULT_PULSE_SECS) {
            Ok(s) if s > 0.0 => s,
            Ok(_) => DEFAULT_PULSE_SECS,
            Err(e) => {
                warn!("{}: pulse duration unavailable ({e}), using default", self.name);
                DEFAULT_PULSE_SECS
            }
        };
        Duration::from_secs_f64(secs)
    }

    fn drive(&self, open: bool) -> Result<(), ValveError> {
        let mut l = self.lines.borrow_mut();
        l.en.set_low().map_err(|_| ValveError::PinWrite)?;
        if open {
            l.in1.set_high().map_err(|_| ValveError::PinWrite)?;
            l.in2.set_low().map_err(|_| ValveError::PinWrite)?;
        } else {
            l.in1.set_low().map_err(|_| ValveError::PinWrite)?;
            l.in2.set_high().map_err(|_| ValveError::PinWrite)?;
        }
        l.en.set_high().map_err(|_| ValveError::PinWrite)
    }

    fn release(&self) {
        if self.lines.borrow_mut().en.set_low().is_err() {
            warn!("{}: failed to release enable line", self.name);
        }
    }
}

impl<EN, IN1, IN2, C> Valve<EN, IN1, IN2, C>
where
    EN: OutputPin,
    IN1: OutputPin,
    IN2: OutputPin,
    C: TransitionCheck,
{
    /// Drive the valve open (`true`) or closed (`false`).
    ///
    /// The transient state is published immediately, so concurrent
    /// readers see intent before the call resolves. Up to
    /// `attempts_limit` pulse cycles are issued; the state commits only
    /// once a cycle is confirmed. On exhaustion the state stays
    /// transient and [`ValveError::Unconfirmed`] is returned.
    pub async fn set_state(&self, open: bool) -> Result<ValveState, ValveError> {
        if self.busy.replace(true) {
            return Err(ValveError::Busy);
        }
        let _busy = BusyGuard(&self.busy);
        self.actuate(open).await
    }

    async fn actuate(&self, open: bool) -> Result<ValveState, ValveError> {
        let (target, transient) = if open {
            (ValveState::Open, ValveState::Opening)
        } else {
            (ValveState::Closed, ValveState::Closing)
        };
        self.state.set(transient);
        let pulse = self.pulse_duration();

        for attempt in 1..=self.attempts_limit {
            {
                let _en = EnableGuard { valve: self };
                self.drive(open)?;
                Timer::after(pulse).await;
            } // enable deasserted here, also on error or cancellation

            if self.check.confirm(open).await {
                self.state.set(target);
                info!(
                    "{}: {} after {attempt} pulse(s)",
                    self.name,
                    if open { "opened" } else { "closed" }
                );
                return Ok(target);
            }
            warn!(
                "{}: pulse {attempt}/{} unconfirmed",
                self.name, self.attempts_limit
            );
        }
        Err(ValveError::Unconfirmed {
            attempts: self.attempts_limit,
        })
    }
}

impl<EN, IN1, IN2, C> ValveControl for Valve<EN, IN1, IN2, C>
where
    EN: OutputPin,
    IN1: OutputPin,
    IN2: OutputPin,
    C: TransitionCheck,
{
    fn current_state(&self) -> ValveState {
        Valve::current_state(self)
    }

    async fn set_state(&self, open: bool) -> Result<ValveState, ValveError> {
        Valve::set_state(self, open).await
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use core::sync::atomic::AtomicU32;
    use futures_lite::future::block_on;

    use crate::adapters::storage::MemoryBackend;
    use crate::sensors::flow::FrequencyCounter;

    /// Records every level written to a named line.
    #[derive(Clone)]
    struct MockPin {
        label: &'static str,
        log: Rc<RefCell<Vec<(&'static str, bool)>>>,
    }

    impl embedded_hal::digital::ErrorType for MockPin {
        type Error = Infallible;
    }

    impl OutputPin for MockPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.log.borrow_mut().push((self.label, false));
            Ok(())
        }
        fn set_high(&mut self) -> Result<(), Infallible> {
            self.log.borrow_mut().push((self.label, true));
            Ok(())
        }
    }

    struct NeverConfirmed;
    impl TransitionCheck for NeverConfirmed {
        async fn confirm(&self, _opening: bool) -> bool {
            false
        }
    }

    /// Fails the first `failures` confirms, then succeeds.
    struct FailThenPass {
        remaining: Cell<u8>,
        calls: Cell<u8>,
    }
    impl FailThenPass {
        fn new(failures: u8) -> Self {
            Self {
                remaining: Cell::new(failures),
                calls: Cell::new(0),
            }
        }
    }
    impl TransitionCheck for FailThenPass {
        async fn confirm(&self, _opening: bool) -> bool {
            self.calls.set(self.calls.get() + 1);
            if self.remaining.get() > 0 {
                self.remaining.set(self.remaining.get() - 1);
                false
            } else {
                true
            }
        }
    }

    fn pin_log() -> Rc<RefCell<Vec<(&'static str, bool)>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn pins(
        log: &Rc<RefCell<Vec<(&'static str, bool)>>>,
    ) -> (MockPin, MockPin, MockPin) {
        let mk = |label| MockPin {
            label,
            log: Rc::clone(log),
        };
        (mk("en"), mk("in1"), mk("in2"))
    }

    fn fast_settings() -> Rc<Settings> {
        let s = Settings::load(Box::new(MemoryBackend::new()));
        s.set("valve1--pulse_duration", 0.01).unwrap();
        Rc::new(s)
    }

    fn en_events(log: &Rc<RefCell<Vec<(&'static str, bool)>>>) -> Vec<bool> {
        log.borrow()
            .iter()
            .filter(|(l, _)| *l == "en")
            .map(|(_, v)| *v)
            .collect()
    }

    #[test]
    fn open_then_close_commits_state() {
        let log = pin_log();
        let (en, in1, in2) = pins(&log);
        let valve = Valve::new("valve1", en, in1, in2, fast_settings());

        block_on(async {
            assert_eq!(valve.current_state(), ValveState::Closed);
            assert_eq!(valve.set_state(true).await, Ok(ValveState::Open));
            assert_eq!(valve.current_state(), ValveState::Open);
            assert_eq!(valve.set_state(false).await, Ok(ValveState::Closed));
            assert_eq!(valve.current_state(), ValveState::Closed);
        });

        // Every pulse ends with the enable line deasserted.
        assert_eq!(en_events(&log).last(), Some(&false));
    }

    #[test]
    fn direction_lines_match_target() {
        let log = pin_log();
        let (en, in1, in2) = pins(&log);
        let valve = Valve::new("valve1", en, in1, in2, fast_settings());

        block_on(valve.set_state(true)).unwrap();
        let writes: Vec<_> = log.borrow().clone();
        // Opening pulse: in1 high, in2 low somewhere between en-low and en-high.
        assert!(writes.contains(&("in1", true)));
        assert!(writes.contains(&("in2", false)));

        log.borrow_mut().clear();
        block_on(valve.set_state(false)).unwrap();
        let writes: Vec<_> = log.borrow().clone();
        assert!(writes.contains(&("in1", false)));
        assert!(writes.contains(&("in2", true)));
    }

    #[test]
    fn unconfirmed_exhausts_attempt_budget() {
        let log = pin_log();
        let (en, in1, in2) = pins(&log);
        let mut valve =
            Valve::with_check("valve1", en, in1, in2, fast_settings(), NeverConfirmed);
        valve.set_attempts_limit(3);

        let result = block_on(valve.set_state(true));
        assert_eq!(result, Err(ValveError::Unconfirmed { attempts: 3 }));
        // State stays transient: physical state is unknown, not "closed".
        assert_eq!(valve.current_state(), ValveState::Opening);

        // Exactly 3 pulses, enable deasserted after each one.
        let en_log = en_events(&log);
        assert_eq!(en_log.iter().filter(|v| **v).count(), 3);
        assert_eq!(en_log.last(), Some(&false));
    }

    #[test]
    fn fail_once_succeeds_on_second_pulse() {
        let log = pin_log();
        let (en, in1, in2) = pins(&log);
        let check = FailThenPass::new(1);
        let valve = Valve::with_check("valve1", en, in1, in2, fast_settings(), check);

        assert_eq!(block_on(valve.set_state(true)), Ok(ValveState::Open));
        assert_eq!(valve.check.calls.get(), 2);
        assert_eq!(en_events(&log).iter().filter(|v| **v).count(), 2);
    }

    #[test]
    fn transient_state_visible_during_actuation() {
        let log = pin_log();
        let (en, in1, in2) = pins(&log);
        let valve = Valve::new("valve1", en, in1, in2, fast_settings());

        let ex: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
        block_on(ex.run(async {
            let task = ex.spawn(valve.set_state(true));
            Timer::after(Duration::from_millis(2)).await;
            assert_eq!(valve.current_state(), ValveState::Opening);
            assert_eq!(task.await, Ok(ValveState::Open));
        }));
    }

    #[test]
    fn concurrent_set_state_is_refused() {
        let log = pin_log();
        let (en, in1, in2) = pins(&log);
        let valve = Valve::new("valve1", en, in1, in2, fast_settings());

        let ex: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
        block_on(ex.run(async {
            let task = ex.spawn(valve.set_state(true));
            Timer::after(Duration::from_millis(2)).await;
            assert_eq!(valve.set_state(false).await, Err(ValveError::Busy));
            assert_eq!(task.await, Ok(ValveState::Open));
            // The busy flag clears once the first call resolves.
            assert_eq!(valve.set_state(false).await, Ok(ValveState::Closed));
        }));
    }

    #[test]
    fn flow_confirm_checks_rate_direction() {
        static EDGES: AtomicU32 = AtomicU32::new(0);
        static WINDOW: AtomicU32 = AtomicU32::new(0);
        let sensor = Rc::new(FlowSensor::new(
            FrequencyCounter::new(&EDGES, &WINDOW, 1_000),
            1.0,
        ));
        let check = FlowConfirm::new(Rc::clone(&sensor), Duration::from_millis(1));

        // No flow: closing confirms, opening does not.
        WINDOW.store(0, core::sync::atomic::Ordering::Relaxed);
        assert!(block_on(check.confirm(false)));
        assert!(!block_on(check.confirm(true)));

        // Flow present: opening confirms, closing does not.
        WINDOW.store(30, core::sync::atomic::Ordering::Relaxed);
        assert!(block_on(check.confirm(true)));
        assert!(!block_on(check.confirm(false)));
    }
}
