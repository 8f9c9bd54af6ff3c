//! DHT22 transducer adapter (espidf only).
//!
//! Single-wire protocol, bit-banged: pull the line low for >1 ms to
//! request a reading, then sample 40 bits whose high-pulse width
//! encodes the bit value. The whole transaction runs inside a critical
//! section-free busy loop (~5 ms) — short enough not to disturb the
//! cooperative tasks, and the sampling loop only runs once per period.

use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver, Pull};

use crate::app::ports::{SoilReading, Transducer};
use crate::error::SensorError;

/// Microseconds of high level separating a 0-bit from a 1-bit.
const BIT_THRESHOLD_US: u32 = 50;
/// Timeout waiting for any single edge, microseconds.
const EDGE_TIMEOUT_US: u32 = 200;

pub struct Dht22 {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
}

impl Dht22 {
    pub fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self { pin })
    }

    fn wait_level(&self, high: bool) -> Result<u32, SensorError> {
        let mut waited = 0;
        while self.pin.is_high() != high {
            if waited > EDGE_TIMEOUT_US {
                return Err(SensorError::ReadFailed);
            }
            Ets::delay_us(1);
            waited += 1;
        }
        Ok(waited)
    }

    fn read_raw(&mut self) -> Result<[u8; 5], SensorError> {
        // Start signal: >1 ms low, then release.
        self.pin.set_low().map_err(|_| SensorError::ReadFailed)?;
        Ets::delay_us(1_100);
        self.pin.set_high().map_err(|_| SensorError::ReadFailed)?;

        // Sensor response: ~80 us low, ~80 us high.
        self.wait_level(false)?;
        self.wait_level(true)?;
        self.wait_level(false)?;

        let mut data = [0u8; 5];
        for bit in 0..40 {
            self.wait_level(true)?;
            let high_us = self.wait_level(false)?;
            if high_us > BIT_THRESHOLD_US {
                data[bit / 8] |= 1 << (7 - bit % 8);
            }
        }
        Ok(data)
    }
}

impl Transducer for Dht22 {
    fn sample(&mut self) -> Result<SoilReading, SensorError> {
        let data = self.read_raw()?;

        let sum = data[0]
            .wrapping_add(data[1])
            .wrapping_add(data[2])
            .wrapping_add(data[3]);
        if sum != data[4] {
            return Err(SensorError::ReadFailed);
        }

        let humidity = f32::from(u16::from_be_bytes([data[0], data[1]])) / 10.0;
        let raw_temp = u16::from_be_bytes([data[2], data[3]]);
        let temperature = if raw_temp & 0x8000 != 0 {
            -f32::from(raw_temp & 0x7FFF) / 10.0
        } else {
            f32::from(raw_temp) / 10.0
        };

        if !(0.0..=100.0).contains(&humidity) || !(-40.0..=80.0).contains(&temperature) {
            return Err(SensorError::OutOfRange);
        }
        Ok(SoilReading {
            temperature,
            humidity,
        })
    }
}
