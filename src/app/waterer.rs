//! Automatic watering policy.
//!
//! One [`AutoWaterer`] binds a valve, a soil sensor and the settings
//! store. Two cooperating long-running tasks drive it:
//!
//! - [`schedule_loop`](AutoWaterer::schedule_loop) (coarse, once per
//!   minute) arms the watering intent when the wall clock hits a
//!   configured hour at the trigger minute. It never touches the valve.
//! - [`auto_water_loop`](AutoWaterer::auto_water_loop) runs the decision
//!   state machine: open the valve when the intent is armed and the soil
//!   qualifies, close it when the soil is wet enough or the session has
//!   run long enough.
//!
//! While armed-but-closed the decision loop polls at [`FAST_POLL`] so a
//! fresh intent is acted on promptly; while watering (or plain idle) it
//! backs off to `loop_delay`. Valve failures are logged and retried on
//! the next cycle — a failed actuation must never kill the loop.

use core::cell::Cell;
use core::time::Duration;
use std::rc::Rc;

use async_io_mini::Timer;
use log::{info, warn};

use crate::app::ports::{SoilReadings, ValveControl, WallClock};
use crate::drivers::valve::ValveState;
use crate::error::SettingsError;
use crate::settings::Settings;

/// Poll interval while the valve is closed and the loop is waiting for
/// an intent or qualifying conditions.
pub const FAST_POLL: Duration = Duration::from_millis(500);

/// Poll interval while parked in manual mode.
pub const IDLE_POLL: Duration = Duration::from_millis(100);

/// Scheduler cadence.
pub const SCHEDULE_POLL: Duration = Duration::from_secs(60);

/// Minute-of-hour at which a configured watering hour fires.
pub const TRIGGER_MINUTE: u8 = 1;

/// Sampling period forced on the soil sensor during a watering session
/// for faster feedback.
pub const WATERING_SAMPLE_PERIOD: Duration = Duration::from_secs(10);

/// Decision cadence while watering or idle, unless overridden.
pub const DEFAULT_LOOP_DELAY: Duration = Duration::from_secs(60);

pub struct AutoWaterer<V, S, C> {
    name: &'static str,
    valve: Rc<V>,
    sensor: Rc<S>,
    clock: Rc<C>,
    settings: Rc<Settings>,
    loop_delay: Duration,
    watering: Cell<bool>,
    elapsed_minutes: Cell<f64>,
    saved_period: Cell<Option<Duration>>,
}

impl<V, S, C> AutoWaterer<V, S, C>
where
    V: ValveControl,
    S: SoilReadings,
    C: WallClock,
{
    pub fn new(
        name: &'static str,
        valve: Rc<V>,
        sensor: Rc<S>,
        clock: Rc<C>,
        settings: Rc<Settings>,
    ) -> Self {
        let waterer = Self {
            name,
            valve,
            sensor,
            clock,
            settings,
            loop_delay: DEFAULT_LOOP_DELAY,
            watering: Cell::new(false),
            elapsed_minutes: Cell::new(0.0),
            saved_period: Cell::new(None),
        };
        // Populate the settings keys up front so the status façade can
        // enumerate them before the first decision cycle.
        let _ = waterer.auto_mode();
        let _ = waterer.lower_temperature();
        let _ = waterer.lower_humidity();
        let _ = waterer.upper_humidity();
        let _ = waterer.watering_hours();
        let _ = waterer.watering_minutes();
        waterer
    }

    /// Override the slow decision cadence (tests, fast hardware).
    pub fn set_loop_delay(&mut self, delay: Duration) {
        self.loop_delay = delay;
    }

    // ── Status accessors (side-effect free) ───────────────────

    pub fn watering(&self) -> bool {
        self.watering.get()
    }

    pub fn elapsed_minutes(&self) -> f64 {
        self.elapsed_minutes.get()
    }

    pub fn auto_mode(&self) -> bool {
        let key = format!("{}--auto_mode", self.name);
        self.settings.get_bool(&key, true).unwrap_or(true)
    }

    // ── Commands ──────────────────────────────────────────────

    /// Persist the auto-mode flag. Both loops observe the change within
    /// their poll granularity.
    pub fn set_auto_mode(&self, on: bool) -> Result<(), SettingsError> {
        let key = format!("{}--auto_mode", self.name);
        self.settings.set(&key, on)
    }

    /// Arm a watering session: reset the session clock and speed up the
    /// soil sensor for faster feedback.
    pub fn start_watering(&self) {
        if self.watering.replace(true) {
            return;
        }
        self.elapsed_minutes.set(0.0);
        self.saved_period.set(Some(self.sensor.sample_period()));
        self.sensor.set_sample_period(WATERING_SAMPLE_PERIOD);
        info!("{}: watering session armed", self.name);
    }

    /// End a watering session and restore the sensor cadence.
    pub fn stop_watering(&self) {
        if !self.watering.replace(false) {
            return;
        }
        if let Some(period) = self.saved_period.take() {
            self.sensor.set_sample_period(period);
        }
        info!("{}: watering session ended", self.name);
    }

    // ── Thresholds (lazy-default settings) ────────────────────

    fn setting_f64(&self, suffix: &str, default: f64) -> f64 {
        let key = format!("{}--{}", self.name, suffix);
        self.settings.get_f64(&key, default).unwrap_or_else(|e| {
            warn!("{}: {key} unavailable ({e}), using {default}", self.name);
            default
        })
    }

    fn lower_temperature(&self) -> f64 {
        self.setting_f64("lower_temperature", 5.0)
    }

    fn lower_humidity(&self) -> f64 {
        self.setting_f64("lower_humidity_threshold", 65.0)
    }

    fn upper_humidity(&self) -> f64 {
        self.setting_f64("upper_humidity_threshold", 75.0)
    }

    fn watering_minutes(&self) -> f64 {
        self.setting_f64("watering_minutes", 30.0)
    }

    fn watering_hours(&self) -> Vec<u8> {
        let key = format!("{}--watering_hours", self.name);
        match self.settings.get_numbers(&key, &[6.0, 12.0]) {
            Ok(hours) => hours.iter().map(|h| *h as u8).collect(),
            Err(e) => {
                warn!("{}: {key} unavailable ({e}), using default", self.name);
                vec![6, 12]
            }
        }
    }

    // ── Decision conditions ───────────────────────────────────

    /// The session is armed and the soil is dry enough (and warm enough
    /// that watering makes sense). Absent readings never qualify.
    fn start_condition(&self) -> bool {
        if !self.watering.get() {
            return false;
        }
        match (self.sensor.humidity(), self.sensor.temperature()) {
            (Some(h), Some(t)) => {
                f64::from(h) < self.lower_humidity() && f64::from(t) > self.lower_temperature()
            }
            _ => false,
        }
    }

    /// The soil is wet enough, or the session has hit its time budget.
    fn stop_condition(&self) -> bool {
        if !self.watering.get() {
            return false;
        }
        let soaked = self
            .sensor
            .humidity()
            .is_some_and(|h| f64::from(h) > self.upper_humidity());
        soaked || self.elapsed_minutes.get() > self.watering_minutes()
    }

    fn bump_elapsed(&self, by: Duration) {
        self.elapsed_minutes
            .set(self.elapsed_minutes.get() + by.as_secs_f64() / 60.0);
    }

    // ── Scheduler ─────────────────────────────────────────────

    /// One scheduler observation. Arms the intent when the hour is
    /// configured and the minute matches the trigger; never touches the
    /// valve.
    pub fn schedule_tick(&self, hour: u8, minute: u8) {
        if !self.auto_mode() || minute != TRIGGER_MINUTE {
            return;
        }
        if self.watering_hours().contains(&hour) {
            info!("{}: scheduling watering for hour {hour}", self.name);
            self.start_watering();
        }
    }

    /// Coarse scheduling task. Skips ticks until the wall clock is
    /// trustworthy (pre-SNTP the clock reports `None`).
    pub async fn schedule_loop(&self) {
        info!("{}: schedule loop started", self.name);
        loop {
            if let Some((hour, minute)) = self.clock.hour_minute() {
                self.schedule_tick(hour, minute);
            }
            Timer::after(SCHEDULE_POLL).await;
        }
    }

    // ── Decision loop ─────────────────────────────────────────

    /// One step of the watering state machine. Returns how long the
    /// loop should sleep before the next step. All valve errors are
    /// swallowed here: the next cycle retries.
    pub async fn decision_cycle(&self) -> Duration {
        if self.valve.current_state() == ValveState::Closed {
            if self.start_condition() {
                info!(
                    "{}: starting watering, humidity {:?} < {}",
                    self.name,
                    self.sensor.humidity(),
                    self.lower_humidity()
                );
                match self.valve.set_state(true).await {
                    Ok(_) => self.bump_elapsed(FAST_POLL),
                    Err(e) => warn!("{}: open failed: {e}", self.name),
                }
            }
            FAST_POLL
        } else {
            if self.stop_condition() {
                info!(
                    "{}: stopping watering after {:.1} min",
                    self.name,
                    self.elapsed_minutes.get()
                );
                match self.valve.set_state(false).await {
                    Ok(_) => {
                        self.stop_watering();
                        self.elapsed_minutes.set(0.0);
                    }
                    // Intent stays set so the stop is retried next cycle.
                    Err(e) => warn!("{}: close failed: {e}", self.name),
                }
            } else {
                self.bump_elapsed(self.loop_delay);
            }
            self.loop_delay
        }
    }

    /// The decision task. Runs the state machine while `auto_mode`
    /// holds; on mode exit it force-closes the valve (never leave it
    /// open with no task watching) and keeps retrying a failed close at
    /// the idle cadence until auto mode returns.
    pub async fn auto_water_loop(&self) {
        info!("{}: decision loop started", self.name);
        loop {
            while self.auto_mode() {
                let delay = self.decision_cycle().await;
                Timer::after(delay).await;
            }
            info!("{}: leaving automatic mode", self.name);
            while !self.auto_mode() {
                self.close_on_mode_exit().await;
                Timer::after(IDLE_POLL).await;
            }
            info!("{}: automatic mode resumed", self.name);
        }
    }

    /// Safety closure on mode exit: a watering session (or a valve left
    /// in any non-closed state) is shut down before the loop idles. The
    /// session intent survives a failed close, so the parked loop keeps
    /// retrying until the valve confirms closed.
    async fn close_on_mode_exit(&self) {
        if !self.watering.get() && self.valve.current_state() == ValveState::Closed {
            return;
        }
        info!("{}: mode exit with valve active, forcing closed", self.name);
        match self.valve.set_state(false).await {
            Ok(_) => {
                self.stop_watering();
                self.elapsed_minutes.set(0.0);
            }
            Err(e) => warn!("{}: safety close failed ({e}), retrying", self.name),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
