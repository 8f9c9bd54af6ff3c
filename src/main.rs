//! Dripfeed firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  NvsBackend      SystemClock     Dht22      PinDriver GPIO   │
//! │  (settings)      (WallClock)     (Transducer)  (valve/power) │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ──────────────────      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  Valve · FlowSensor · SoilSensor · AutoWaterer         │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  edge-executor (cooperative tasks) · GPIO ISR + esp_timer    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Four cooperative tasks share the executor: the soil sampling loop,
//! the watering scheduler, the watering decision loop, and the history
//! drain. The flow ISR and its window timer run outside the executor
//! and exchange data only through the atomic handoff.

use std::rc::Rc;

use anyhow::{Context, Result};
use esp_idf_hal::gpio::{AnyIOPin, PinDriver};
use esp_idf_hal::peripherals::Peripherals;
use log::{info, warn};

use dripfeed::adapters::hardware::Dht22;
use dripfeed::adapters::storage::{FileBackend, NvsBackend};
use dripfeed::adapters::time::SystemClock;
use dripfeed::app::ports::{SettingsBackend, SoilReadings};
use dripfeed::app::waterer::AutoWaterer;
use dripfeed::drivers::hw_init;
use dripfeed::drivers::valve::{FlowConfirm, Valve, ValveState, DEFAULT_TRANSITION};
use dripfeed::history::{self, LogReadingSink, ReadingRecord};
use dripfeed::pins;
use dripfeed::sensors::flow::{FlowSensor, FrequencyCounter, DEFAULT_RATE_CONSTANT, FLOW_WINDOW_MS};
use dripfeed::sensors::soil::SoilSensor;
use dripfeed::settings::Settings;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Dripfeed v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Pin map ────────────────────────────────────────────
    // Claim exclusive ownership of the hardware; individual pins are
    // then materialized from the board pin map.
    let _peripherals = Peripherals::take().context("peripherals already taken")?;
    // SAFETY: Peripherals::take succeeded, so nothing else holds these
    // pins, and each GPIO number appears exactly once in the pin map.
    let (en, in1, in2, flow_pin, soil_data, soil_power) = unsafe {
        (
            AnyIOPin::new(pins::VALVE_EN_GPIO),
            AnyIOPin::new(pins::VALVE_IN1_GPIO),
            AnyIOPin::new(pins::VALVE_IN2_GPIO),
            AnyIOPin::new(pins::FLOW_PULSE_GPIO),
            AnyIOPin::new(pins::SOIL_DATA_GPIO),
            AnyIOPin::new(pins::SOIL_POWER_GPIO),
        )
    };

    // ── 3. Settings (NVS-backed, fresh on first boot) ─────────
    let backend: Box<dyn SettingsBackend> = match NvsBackend::new() {
        Ok(nvs) => Box::new(nvs),
        Err(e) => {
            // NVS should self-heal on the next reboot; until then fall
            // back to the settings file on the mounted data partition.
            warn!("nvs unavailable ({e}), falling back to settings file");
            Box::new(FileBackend::new("/spiffs/settings.json"))
        }
    };
    let settings = Rc::new(Settings::load(backend));

    // ── 4. Clock sync (scheduler skips ticks until synced) ────
    let _sntp = esp_idf_svc::sntp::EspSntp::new_default().context("sntp init failed")?;
    info!("SNTP started; scheduler waits for first sync");

    // ── 5. Flow sensor: ISR + periodic window rollover ────────
    let _flow_pin = hw_init::attach_flow_input(flow_pin)?;
    hw_init::start_flow_window_timer(FLOW_WINDOW_MS);
    let flow = Rc::new(FlowSensor::new(
        FrequencyCounter::flow_input(),
        DEFAULT_RATE_CONSTANT,
    ));

    // ── 6. Valve on the H-bridge lines, flow-confirmed ────────
    let valve = Rc::new(Valve::with_check(
        "waterer1",
        PinDriver::output(en)?,
        PinDriver::output(in1)?,
        PinDriver::output(in2)?,
        Rc::clone(&settings),
        FlowConfirm::new(Rc::clone(&flow), DEFAULT_TRANSITION),
    ));

    // ── 7. Soil sensor with switched power rail ───────────────
    let soil = Rc::new(SoilSensor::new(
        "waterer1",
        Dht22::new(soil_data)?,
        PinDriver::output(soil_power)?,
        Rc::clone(&settings),
    ));

    // ── 8. Watering policy ────────────────────────────────────
    let waterer = Rc::new(AutoWaterer::new(
        "waterer1",
        Rc::clone(&valve),
        Rc::clone(&soil),
        Rc::new(SystemClock),
        Rc::clone(&settings),
    ));

    // ── 9. Cooperative tasks ──────────────────────────────────
    let ex: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();

    let sampling = {
        let soil = Rc::clone(&soil);
        let valve = Rc::clone(&valve);
        let waterer = Rc::clone(&waterer);
        async move {
            soil.run(move |reading| {
                history::publish(ReadingRecord {
                    temperature: reading.temperature,
                    humidity: reading.humidity,
                    valve_open: valve.current_state() == ValveState::Open,
                    watering: waterer.watering(),
                    auto_mode: waterer.auto_mode(),
                });
            })
            .await;
        }
    };

    let scheduling = {
        let waterer = Rc::clone(&waterer);
        async move { waterer.schedule_loop().await }
    };

    let deciding = {
        let waterer = Rc::clone(&waterer);
        async move { waterer.auto_water_loop().await }
    };

    let draining = async {
        let mut sink = LogReadingSink;
        history::drain(&mut sink).await;
    };

    info!(
        "Starting control tasks (sample period {:?})",
        soil.sample_period()
    );

    let sampling = ex.spawn(sampling);
    let scheduling = ex.spawn(scheduling);
    let deciding = ex.spawn(deciding);
    let draining = ex.spawn(draining);

    // The tasks are all infinite loops; reaching this point means the
    // executor itself gave up.
    futures_lite::future::block_on(ex.run(async {
        sampling.await;
        scheduling.await;
        deciding.await;
        draining.await;
    }));

    warn!("control tasks ended unexpectedly");
    anyhow::bail!("control tasks terminated")
}
