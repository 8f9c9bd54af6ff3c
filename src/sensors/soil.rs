//! Soil/ambient temperature + humidity sensor with its own power rail.
//!
//! The transducer is powered only around each sample when
//! `{name}--power_down_sensor` is set (the default) to save energy; a
//! 200 ms settle time is honoured whenever the rail comes up from off.
//!
//! The sampling loop is fault tolerant: one failed read never kills the
//! loop, but after more than [`MAX_CONSECUTIVE_FAILURES`] failures in a
//! row the last readings are invalidated rather than left stale — the
//! decision loop must never water on data that old.

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::rc::Rc;

use async_io_mini::Timer;
use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::app::ports::{SoilReading, SoilReadings, Transducer};
use crate::error::SensorError;
use crate::settings::Settings;

/// Consecutive failed reads tolerated before readings are invalidated.
pub const MAX_CONSECUTIVE_FAILURES: u8 = 10;

/// Power-up settle time before the transducer answers reliably.
pub const SETTLE_TIME: Duration = Duration::from_millis(200);

/// Sampling period until a controller adjusts it.
pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_secs(60);

pub struct SoilSensor<T, P> {
    name: &'static str,
    transducer: RefCell<T>,
    power: RefCell<P>,
    powered: Cell<bool>,
    temperature: Cell<Option<f32>>,
    humidity: Cell<Option<f32>>,
    failures: Cell<u8>,
    period: Cell<Duration>,
    settings: Rc<Settings>,
}

impl<T, P> SoilSensor<T, P>
where
    T: Transducer,
    P: OutputPin,
{
    pub fn new(name: &'static str, transducer: T, mut power: P, settings: Rc<Settings>) -> Self {
        if power.set_low().is_err() {
            warn!("{name}: could not deassert power rail at init");
        }
        Self {
            name,
            transducer: RefCell::new(transducer),
            power: RefCell::new(power),
            powered: Cell::new(false),
            temperature: Cell::new(None),
            humidity: Cell::new(None),
            failures: Cell::new(0),
            period: Cell::new(DEFAULT_SAMPLE_PERIOD),
            settings,
        }
    }

    /// Power the sensor, take one temperature + humidity reading, then
    /// power it back down unless configured to stay on. No retry here —
    /// fault handling belongs to the loop.
    pub async fn read_sensor(&self) -> Result<SoilReading, SensorError> {
        let key = format!("{}--power_down_sensor", self.name);
        let power_down = self.settings.get_bool(&key, true).unwrap_or(true);

        if !self.powered.get() {
            self.power
                .borrow_mut()
                .set_high()
                .map_err(|_| SensorError::PowerRail)?;
            self.powered.set(true);
            Timer::after(SETTLE_TIME).await;
        }

        let result = self.transducer.borrow_mut().sample();

        if power_down {
            if self.power.borrow_mut().set_low().is_ok() {
                self.powered.set(false);
            } else {
                warn!("{}: could not power sensor down", self.name);
            }
        }

        let reading = result?;
        self.temperature.set(Some(reading.temperature));
        self.humidity.set(Some(reading.humidity));
        Ok(reading)
    }

    /// One sampling-loop iteration: read, update failure bookkeeping,
    /// invoke the callback on success.
    pub async fn sample_once(&self, on_reading: &mut impl FnMut(&SoilReading)) {
        match self.read_sensor().await {
            Ok(reading) => {
                self.failures.set(0);
                on_reading(&reading);
            }
            Err(e) => {
                let failures = self.failures.get().saturating_add(1);
                self.failures.set(failures);
                warn!("{}: read failed ({e}), {failures} consecutive", self.name);
                if failures > MAX_CONSECUTIVE_FAILURES
                    && (self.temperature.get().is_some() || self.humidity.get().is_some())
                {
                    warn!("{}: invalidating stale readings", self.name);
                    self.temperature.set(None);
                    self.humidity.set(None);
                }
            }
        }
    }

    /// Long-running sampling task. Never terminates on a read failure;
    /// the period is re-read each iteration so runtime changes take
    /// effect after at most one old-period sleep.
    pub async fn run(&self, mut on_reading: impl FnMut(&SoilReading)) {
        info!("{}: sampling loop started", self.name);
        loop {
            self.sample_once(&mut on_reading).await;
            Timer::after(self.period.get()).await;
        }
    }

    pub fn consecutive_failures(&self) -> u8 {
        self.failures.get()
    }
}

impl<T, P> SoilReadings for SoilSensor<T, P>
where
    T: Transducer,
    P: OutputPin,
{
    fn temperature(&self) -> Option<f32> {
        self.temperature.get()
    }

    fn humidity(&self) -> Option<f32> {
        self.humidity.get()
    }

    fn sample_period(&self) -> Duration {
        self.period.get()
    }

    fn set_sample_period(&self, period: Duration) {
        self.period.set(period);
    }
}
