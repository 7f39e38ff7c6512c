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

use clap::Parser;
use crumble::sensor::{open_pin, DHT11Sensor};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{io, process};
use tokio::signal::unix::{self, SignalKind};
use tokio::task;
use tracing::{Instrument, Level};

const DEFAULT_REFRESH_SECS: u64 = 2;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;

/// Read temperature and humidity from a DHT11 sensor
///
/// Periodically read temperature and humidity from a DHT11 sensor connected to a
/// data pin of a local machine, usually a Raspberry PI, and log each reading. Failed
/// reads are logged and retried at the next interval.
///
/// The sensor must be connected to one of the General Purpose IO pins (GPIO). The
/// numbering of these pins (and how the pin number is provided to crumble) is based
/// on the Broadcom SOC channel.
#[derive(Debug, Parser)]
#[command(name = "crumble", version = clap::crate_version!())]
struct CrumbleApplication {
    /// BCM GPIO pin number the DHT11 sensor data line is connected to
    #[arg(long)]
    bcm_pin: u8,

    /// Read the sensor at this interval, in seconds. The sensor cannot be read
    /// more than once a second
    #[arg(long, default_value_t = DEFAULT_REFRESH_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    refresh_secs: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = CrumbleApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let pin = open_pin(opts.bcm_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize data pin", bcm_pin = opts.bcm_pin, error = %e);
        process::exit(1)
    });

    let sensor = Arc::new(Mutex::new(DHT11Sensor::from_pin(pin)));
    tracing::info!(
        message = "starting sensor reads",
        bcm_pin = opts.bcm_pin,
        refresh_secs = opts.refresh_secs
    );

    // Periodically read from the sensor and log the readings.
    let reads = task::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(opts.refresh_secs));

        loop {
            let _ = interval.tick().await;
            let sensor_ref = sensor.clone();

            let res = task::spawn_blocking(move || {
                let mut s = sensor_ref.lock().unwrap_or_else(|e| e.into_inner());
                s.read()
            })
            .instrument(tracing::span!(Level::DEBUG, "sensor_read"))
            .await;

            match res {
                Ok(Ok(reading)) => {
                    tracing::info!(
                        message = "read sensor",
                        temperature = %reading.temperature,
                        humidity = %reading.humidity
                    );
                }
                Ok(Err(e)) => {
                    tracing::warn!(message = "unable to read sensor", kind = e.kind().as_label(), error = %e);
                }
                Err(e) => {
                    tracing::error!(message = "sensor read task failed", error = %e);
                }
            }
        }
    });

    // Wait for either SIGTERM or SIGINT to shutdown
    tokio::select! {
        _ = sigterm() => {}
        _ = sigint() => {}
    }

    reads.abort();
    tracing::info!("shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}
