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

#![cfg(test)]

use crate::sensor::core::{Clock, DataPin, TimeoutStage};
use crate::sensor::dht11::DATA_SIZE;
use rppal::gpio::{Level, Mode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RESPONSE_DELAY_MICROS: u64 = 20;
const RESPONSE_LOW_MICROS: u64 = 80;
const RESPONSE_HIGH_MICROS: u64 = 80;
const BIT_LOW_MICROS: u64 = 50;
const ZERO_HIGH_MICROS: u64 = 26;
const ONE_HIGH_MICROS: u64 = 70;

/// Clock that only moves forward when it is asked for the time (by one microsecond)
/// or told to sleep (by the full duration). Busy-waits against it always make progress.
#[derive(Debug, Default, Clone)]
pub(crate) struct VirtualClock {
    now: Arc<AtomicU64>,
}

impl VirtualClock {
    fn peek(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Clock for VirtualClock {
    fn now_micros(&self) -> u64 {
        self.now.fetch_add(1, Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.now.fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }
}

/// DataPin implementation that never changes level, used to test timeouts.
pub(crate) struct StuckDataPin(pub(crate) Level);

impl DataPin for StuckDataPin {
    fn is_low(&self) -> bool {
        self.0 == Level::Low
    }

    fn is_high(&self) -> bool {
        self.0 == Level::High
    }

    fn pin(&self) -> u8 {
        0
    }

    fn set_high(&mut self) {
        // NOP
    }

    fn set_low(&mut self) {
        // NOP
    }

    fn set_mode(&mut self, _mode: Mode) {
        // NOP
    }
}

/// Something the host did to the data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostEvent {
    Low,
    High,
    Input,
    Output,
}

/// DataPin implementation that plays back the waveform a sensor would send for
/// some data each time the host releases the line. Time comes from a `VirtualClock`
/// shared with the sensor under test.
pub(crate) struct SimulatedLine {
    clock: VirtualClock,
    data: Arc<Mutex<[u8; DATA_SIZE]>>,
    stall: Arc<Mutex<Option<TimeoutStage>>>,
    events: Arc<Mutex<Vec<(u64, HostEvent)>>>,
    segments: Vec<(Level, u64)>,
    tail: Level,
    released_at: u64,
    driven: Level,
    input: bool,
}

impl SimulatedLine {
    pub(crate) fn new(data: [u8; DATA_SIZE]) -> Self {
        SimulatedLine {
            clock: VirtualClock::default(),
            data: Arc::new(Mutex::new(data)),
            stall: Arc::new(Mutex::new(None)),
            events: Arc::new(Mutex::new(Vec::new())),
            segments: Vec::new(),
            tail: Level::High,
            released_at: 0,
            driven: Level::High,
            input: true,
        }
    }

    /// Line that stops changing level right before the edge expected at `stage`.
    pub(crate) fn stalled(data: [u8; DATA_SIZE], stage: TimeoutStage) -> Self {
        let line = Self::new(data);
        *line.stall.lock().unwrap() = Some(stage);
        line
    }

    pub(crate) fn clock(&self) -> VirtualClock {
        self.clock.clone()
    }

    /// Bytes sent for every following read, may be changed between reads.
    pub(crate) fn data(&self) -> Arc<Mutex<[u8; DATA_SIZE]>> {
        self.data.clone()
    }

    /// Stall used for every following read, may be changed between reads.
    pub(crate) fn stall(&self) -> Arc<Mutex<Option<TimeoutStage>>> {
        self.stall.clone()
    }

    pub(crate) fn events(&self) -> Arc<Mutex<Vec<(u64, HostEvent)>>> {
        self.events.clone()
    }

    fn record(&self, event: HostEvent) {
        self.events.lock().unwrap().push((self.clock.peek(), event));
    }

    /// Levels and durations sent by the sensor after the line is released, and the
    /// level the line stays at afterwards.
    fn waveform(data: &[u8; DATA_SIZE], stall: Option<TimeoutStage>) -> (Vec<(Level, u64)>, Level) {
        let mut segments = vec![
            (Level::High, RESPONSE_DELAY_MICROS),
            (Level::Low, RESPONSE_LOW_MICROS),
            (Level::High, RESPONSE_HIGH_MICROS),
        ];

        for i in 0..DATA_SIZE * 8 {
            let bit = (data[i / 8] >> (7 - i % 8)) & 1;
            let high = if bit == 1 { ONE_HIGH_MICROS } else { ZERO_HIGH_MICROS };
            segments.push((Level::Low, BIT_LOW_MICROS));
            segments.push((Level::High, high));
        }
        segments.push((Level::Low, BIT_LOW_MICROS));

        // The last segment kept is held forever, so the edge after it never arrives.
        // Without a stall, the pull-up resistor holds the line high once the sensor is done.
        let keep = match stall {
            None => return (segments, Level::High),
            Some(TimeoutStage::ResponseLow) => 1,
            Some(TimeoutStage::ResponseHigh) => 2,
            Some(TimeoutStage::DataStart) => 3,
            Some(TimeoutStage::BitStart(n)) => 4 + 2 * n,
            Some(TimeoutStage::BitEnd(n)) => 5 + 2 * n,
        };

        segments.truncate(keep);
        let tail = segments.last().map(|&(level, _)| level).unwrap_or(Level::High);
        (segments, tail)
    }

    fn level(&self) -> Level {
        if !self.input {
            return self.driven;
        }

        let mut elapsed = self.clock.peek().saturating_sub(self.released_at);
        for &(level, duration) in &self.segments {
            if elapsed < duration {
                return level;
            }
            elapsed -= duration;
        }

        self.tail
    }
}

impl DataPin for SimulatedLine {
    fn is_low(&self) -> bool {
        self.level() == Level::Low
    }

    fn is_high(&self) -> bool {
        self.level() == Level::High
    }

    fn pin(&self) -> u8 {
        17
    }

    fn set_high(&mut self) {
        self.driven = Level::High;
        self.record(HostEvent::High);
    }

    fn set_low(&mut self) {
        self.driven = Level::Low;
        self.record(HostEvent::Low);
    }

    fn set_mode(&mut self, mode: Mode) {
        match mode {
            Mode::Input => {
                let data = *self.data.lock().unwrap();
                let stall = *self.stall.lock().unwrap();

                let (segments, tail) = Self::waveform(&data, stall);
                self.segments = segments;
                self.tail = tail;
                self.released_at = self.clock.peek();
                self.input = true;
                self.record(HostEvent::Input);
            }
            _ => {
                self.input = false;
                self.record(HostEvent::Output);
            }
        }
    }
}
