// Crumble - DHT11 temperature and humidity sensor reader
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::core::{
    Clock, DataPin, Humidity, MonotonicClock, ReadError, Reading, TemperatureCelsius, TimeoutStage,
};
use rppal::gpio::{Level, Mode};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

pub(crate) const DATA_SIZE: usize = 5;
pub(crate) const DATA_BITS: usize = DATA_SIZE * 8;

/// How long the host holds the data line low to wake the sensor up.
pub const START_LOW_HOLD: Duration = Duration::from_millis(18);

/// How long the host holds the data line high before handing it to the sensor.
pub const START_HIGH_HOLD: Duration = Duration::from_micros(40);

/// Longest wait, in microseconds, for the data line to change level.
pub const EDGE_TIMEOUT_MICROS: u64 = 1_000;

/// High pulses longer than this many microseconds are a `1` bit, others a `0` bit.
///
/// The sensor sends a `0` as a ~26-28us high pulse and a `1` as a ~70us high pulse.
pub const BIT_THRESHOLD_MICROS: u64 = 40;

/// Timing parameters of the DHT11 single wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub start_low: Duration,
    pub start_high: Duration,
    pub edge_timeout_micros: u64,
    pub bit_threshold_micros: u64,
}

impl Timings {
    /// Return true if a high pulse of the given width encodes a `1` bit. Widths
    /// exactly at the threshold are a `0` bit.
    pub fn is_one(&self, width_micros: u64) -> bool {
        width_micros > self.bit_threshold_micros
    }
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            start_low: START_LOW_HOLD,
            start_high: START_HIGH_HOLD,
            edge_timeout_micros: EDGE_TIMEOUT_MICROS,
            bit_threshold_micros: BIT_THRESHOLD_MICROS,
        }
    }
}

/// Busy-wait until the pin reads `level`, returning the time it was observed.
fn wait_for_level(
    pin: &dyn DataPin,
    clock: &dyn Clock,
    level: Level,
    timeout_micros: u64,
    stage: TimeoutStage,
) -> Result<u64, ReadError> {
    let start = clock.now_micros();

    loop {
        let reached = match level {
            Level::Low => pin.is_low(),
            Level::High => pin.is_high(),
        };

        if reached {
            return Ok(clock.now_micros());
        }

        if clock.now_micros().saturating_sub(start) > timeout_micros {
            return Err(ReadError::Timeout { stage });
        }
    }
}

/// Widths, in microseconds, of the high pulses of the 40 data bits sent by the sensor.
#[derive(Debug)]
struct Pulses {
    widths: [u64; DATA_BITS],
}

impl Pulses {
    /// Wait for the sensor to acknowledge a start signal and then measure the high
    /// pulse of each of the 40 data bits it sends.
    ///
    /// An error will be returned if the pin didn't transition in time. The read will have
    /// to be retried in this case.
    ///
    /// NOTE: This method assumes the start signal has just been sent and the pin has
    /// been switched to input mode.
    fn from_data_pin(pin: &dyn DataPin, clock: &dyn Clock, timings: &Timings) -> Result<Self, ReadError> {
        let timeout = timings.edge_timeout_micros;

        // Sensor acknowledges the start signal by pulling the line low, releasing it,
        // and then pulling it low again right before the first bit.
        wait_for_level(pin, clock, Level::Low, timeout, TimeoutStage::ResponseLow)?;
        wait_for_level(pin, clock, Level::High, timeout, TimeoutStage::ResponseHigh)?;
        wait_for_level(pin, clock, Level::Low, timeout, TimeoutStage::DataStart)?;

        let mut widths = [0; DATA_BITS];
        for (i, width) in widths.iter_mut().enumerate() {
            let rise = wait_for_level(pin, clock, Level::High, timeout, TimeoutStage::BitStart(i))?;
            let fall = wait_for_level(pin, clock, Level::Low, timeout, TimeoutStage::BitEnd(i))?;
            *width = fall.saturating_sub(rise);
        }

        tracing::trace!(message = "measured high pulse widths", widths = ?widths);
        Ok(Self { widths })
    }
}

/// Bytes read from a sensor, computed from high pulse widths.
///
/// Bytes read make up humidity data, temperature data, and a checksum to ensure
/// the reading is valid. If valid, the bytes can be converted to a temperature
/// and humidity value.
#[derive(Debug)]
struct RawSample {
    bytes: [u8; DATA_SIZE],
}

impl RawSample {
    fn from_pulses(pulses: &Pulses, timings: &Timings) -> Result<Self, ReadError> {
        let mut bytes: [u8; DATA_SIZE] = [0; DATA_SIZE];

        // Bits are sent MSB first: shift the current byte left and set the LSB
        // for each `1` bit.
        for (i, &width) in pulses.widths.iter().enumerate() {
            let index = i / 8;
            bytes[index] <<= 1;

            if timings.is_one(width) {
                bytes[index] |= 1;
            }
        }

        Self::checksum_bytes(&bytes)?;
        Ok(RawSample { bytes })
    }

    fn checksum_bytes(bytes: &[u8; DATA_SIZE]) -> Result<(), ReadError> {
        // Last byte is the low 8 bits of the sum of the four data bytes
        let expected = bytes[4];
        let computed = bytes[..4].iter().fold(0u8, |sum, b| sum.wrapping_add(*b));

        tracing::debug!(
            message = "computing checksum for sensor data",
            computed = computed,
            expected = expected
        );

        if computed != expected {
            Err(ReadError::ChecksumMismatch { expected, computed })
        } else {
            Ok(())
        }
    }
}

impl From<RawSample> for (TemperatureCelsius, Humidity) {
    /// Convert sensor bytes into temperature and humidity measurements.
    ///
    /// The first byte of each pair is the integral part and the second byte is
    /// added as tenths.
    fn from(sample: RawSample) -> Self {
        let [hum_int, hum_dec, temp_int, temp_dec, _] = sample.bytes;

        let humidity = Humidity::from(hum_int as f32 + hum_dec as f32 / 10.0);
        let temperature = TemperatureCelsius::from(temp_int as f32 + temp_dec as f32 / 10.0);

        tracing::debug!(
            message = "parsed sensor data",
            raw = ?sample.bytes,
            temperature = %temperature,
            humidity = %humidity
        );

        (temperature, humidity)
    }
}

/// Read temperature in degrees celsius and relative humidity from a DHT11 sensor
///
/// The sensor keeps the result of the last successful read. Reads are blocking and
/// take tens of milliseconds. A single instance must not be read from multiple
/// threads at once, wrap it in a `Mutex` to share it.
pub struct DHT11Sensor {
    pin: Box<dyn DataPin + Send + Sync + 'static>,
    clock: Box<dyn Clock + Send + Sync + 'static>,
    timings: Timings,
    last: Reading,
}

impl DHT11Sensor {
    pub fn from_pin<T>(pin: T) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self::with_clock(pin, MonotonicClock::new(), Timings::default())
    }

    pub fn with_clock<T, C>(mut pin: T, clock: C, timings: Timings) -> Self
    where
        T: DataPin + Send + Sync + 'static,
        C: Clock + Send + Sync + 'static,
    {
        pin.set_mode(Mode::Input);

        Self {
            pin: Box::new(pin),
            clock: Box::new(clock),
            timings,
            last: Reading::default(),
        }
    }

    fn send_start_signal(&mut self) {
        // Host needs to set the data line:
        // * low for at least 18ms so the sensor detects the start signal
        // * high for 20-40us and then release it for the sensor's response
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        self.clock.sleep(self.timings.start_low);
        self.pin.set_high();
        self.clock.sleep(self.timings.start_high);
        self.pin.set_mode(Mode::Input);
    }

    /// Read temperature and humidity from the sensor or return an error if the
    /// read failed with details about what caused the read to fail.
    ///
    /// On failure the temperature and humidity of the last successful read are
    /// kept but are no longer marked as valid. Reads are never retried here.
    pub fn read(&mut self) -> Result<Reading, ReadError> {
        self.last.valid = false;
        self.send_start_signal();

        let pulses = Pulses::from_data_pin(self.pin.as_ref(), self.clock.as_ref(), &self.timings)?;
        let sample = RawSample::from_pulses(&pulses, &self.timings)?;
        let (temperature, humidity) = sample.into();

        self.last = Reading {
            temperature,
            humidity,
            valid: true,
        };

        Ok(self.last)
    }

    /// Most recent reading, `valid` only if the last call to `read` succeeded.
    pub fn last_reading(&self) -> Reading {
        self.last
    }

    /// Temperature of the last successful read, zero if there hasn't been one.
    pub fn last_temperature(&self) -> TemperatureCelsius {
        self.last.temperature
    }

    /// Humidity of the last successful read, zero if there hasn't been one.
    pub fn last_humidity(&self) -> Humidity {
        self.last.humidity
    }

    pub fn pin(&self) -> u8 {
        self.pin.pin()
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }
}

impl Debug for DHT11Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DHT11Sensor")
            .field("pin", &self.pin.pin())
            .field("timings", &self.timings)
            .field("last", &self.last)
            .finish()
    }
}
