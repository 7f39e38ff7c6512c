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

//! Read temperature and humidity from a DHT11 sensor over a single GPIO data wire.
//!
//! ## Features
//!
//! Crumble reads temperature and relative humidity from a [DHT11 sensor](https://learn.adafruit.com/dht)
//! connected to one of the General Purpose IO pins (GPIO) of a Raspberry PI. The sensor
//! is read by sending it a start signal on the data line and then timing the high
//! pulses it sends back for each of 40 bits: two bytes of humidity, two bytes of
//! temperature, and a checksum byte.
//!
//! Reads are blocking and take tens of milliseconds. Reads that fail (because the
//! sensor didn't respond in time or the checksum didn't match) are returned as errors
//! and are never retried, it's up to the caller to read the sensor again later. The
//! last successful reading is kept by the sensor and is marked as no longer valid
//! when a read fails.
//!
//! ```no_run
//! use crumble::sensor::{open_pin, DHT11Sensor};
//!
//! let pin = open_pin(18).unwrap();
//! let mut sensor = DHT11Sensor::from_pin(pin);
//!
//! match sensor.read() {
//!     Ok(reading) => println!("{} {}", reading.temperature, reading.humidity),
//!     Err(e) => println!("failed to read sensor: {}", e),
//! }
//! ```
//!
//! ## Build
//!
//! `crumble` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/)
//! . Since it's meant  to be run on a Raspberry PI, you will also likely need to cross-compile it. If you
//! are on Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! Next, make sure you have a Rust toolchain for ARMv7, assuming you are using the `rustup` tool.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Run
//!
//! In order to read and write the device `/dev/gpiomem`, `crumble` must run as `root`. The
//! DHT11 sensor can only be read once a second, at most. By default, the sensor is read
//! every two seconds.
//!
//! ```text
//! sudo crumble --bcm-pin 18 --refresh-secs 2
//! ```
//!

pub mod sensor;
