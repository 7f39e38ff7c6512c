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

use std::error::Error;
use std::fmt::{self, Formatter};
use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, IoPin, Mode};

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f32);

impl From<TemperatureCelsius> for f32 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f32> for TemperatureCelsius {
    fn from(v: f32) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f32);

impl From<Humidity> for f32 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f32> for Humidity {
    fn from(v: f32) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Temperature and humidity decoded from a sensor.
///
/// `valid` is `true` only when the most recent read attempt of the sensor that
/// produced this value succeeded. When a read fails, the temperature and humidity
/// of the last successful read are kept and `valid` is cleared.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Reading {
    pub temperature: TemperatureCelsius,
    pub humidity: Humidity,
    pub valid: bool,
}

/// Point in the sensor transaction where an expected edge never showed up.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum TimeoutStage {
    /// Sensor never pulled the line low after the start signal
    ResponseLow,
    /// Sensor never released the line after its low response
    ResponseHigh,
    /// Sensor never pulled the line low to begin sending data
    DataStart,
    /// Rising edge of data bit `n` never arrived
    BitStart(usize),
    /// Falling edge of data bit `n` never arrived
    BitEnd(usize),
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::ResponseLow => write!(f, "response low"),
            TimeoutStage::ResponseHigh => write!(f, "response high"),
            TimeoutStage::DataStart => write!(f, "data start"),
            TimeoutStage::BitStart(n) => write!(f, "start of bit {}", n),
            TimeoutStage::BitEnd(n) => write!(f, "end of bit {}", n),
        }
    }
}

/// Potential kinds of errors that can be encountered reading from the DHT sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum ReadErrorKind {
    Timeout,
    Checksum,
}

impl ReadErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            ReadErrorKind::Timeout => "timeout",
            ReadErrorKind::Checksum => "checksum",
        }
    }
}

/// Error reading the DHT11 sensor. Neither kind of error leaves the sensor in a
/// state that prevents the read from being retried.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ReadError {
    Timeout { stage: TimeoutStage },
    ChecksumMismatch { expected: u8, computed: u8 },
}

impl ReadError {
    pub fn kind(&self) -> ReadErrorKind {
        match self {
            ReadError::Timeout { .. } => ReadErrorKind::Timeout,
            ReadError::ChecksumMismatch { .. } => ReadErrorKind::Checksum,
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Timeout { stage } => write!(f, "timeout waiting for {}", stage),
            ReadError::ChecksumMismatch { expected, computed } => {
                write!(f, "checksum error: expected {}, got {}", expected, computed)
            }
        }
    }
}

impl Error for ReadError {}

/// Error acquiring a GPIO pin for the sensor data line
#[derive(Debug)]
pub struct OpenPinError {
    msg: &'static str,
    cause: Box<dyn Error + Send + Sync>,
}

impl fmt::Display for OpenPinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.msg, self.cause)
    }
}

impl Error for OpenPinError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Create a new `IoPin` based on the BCM GPIO pin number of the data wire of a
/// sensor. The pin is left in input mode, idle until a read is started.
///
/// Note that the BCM GPIO pin number is NOT the same as the physical pin number.
/// See [pinout] for more information.
///
/// [pinout]: https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header
pub fn open_pin(bcm_gpio_pin: u8) -> Result<IoPin, OpenPinError> {
    let controller = Gpio::new().map_err(|e| OpenPinError {
        msg: "unable to create GPIO controller",
        cause: Box::new(e),
    })?;

    let pin = controller.get(bcm_gpio_pin).map_err(|e| OpenPinError {
        msg: "unable to acquire pin from controller",
        cause: Box::new(e),
    })?;

    Ok(pin.into_io(Mode::Input))
}

/// Abstraction around an `rppal::gpio::IoPin` to allow for easier testing.
pub trait DataPin {
    fn is_low(&self) -> bool;
    fn is_high(&self) -> bool;
    fn pin(&self) -> u8;
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn set_mode(&mut self, mode: Mode);
}

impl DataPin for IoPin {
    fn is_low(&self) -> bool {
        IoPin::is_low(self)
    }

    fn is_high(&self) -> bool {
        IoPin::is_high(self)
    }

    fn pin(&self) -> u8 {
        IoPin::pin(self)
    }

    fn set_high(&mut self) {
        IoPin::set_high(self);
    }

    fn set_low(&mut self) {
        IoPin::set_low(self);
    }

    fn set_mode(&mut self, mode: Mode) {
        IoPin::set_mode(self, mode);
    }
}

/// Monotonic microsecond time source used to measure pulses on the data line.
pub trait Clock {
    /// Microseconds elapsed since some fixed point in the past. Never decreases.
    fn now_micros(&self) -> u64;

    /// Block the calling thread for at least `duration`.
    fn sleep(&self, duration: Duration);
}

/// `Clock` backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
