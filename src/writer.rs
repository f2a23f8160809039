//! Ingestion Write Buffer
//!
//! Stages streaming ticks into the current hour and streaming candles into
//! the current day. A unit seals when a sample belonging to a later unit
//! arrives, or when the writer stops; the sealed unit is handed back to the
//! caller for encoding and storage. A sample landing on an already-staged
//! key replaces the staged one.
//!
//! Late samples for an already-sealed unit restart staging for that unit;
//! callers producing out-of-order streams must run the engine in merge mode
//! or the rewrite loses the earlier emit's samples.

use crate::time::{minute_of_day, start_of_day, start_of_hour_ms, UnixSecs};
use crate::types::{empty_candle_day, Candle, CandleDay, ShortTick, Tick};
use std::collections::BTreeMap;

/// An hour of ticks sealed out of the staging buffer.
#[derive(Debug)]
pub struct SealedTicks {
    /// Start of the hour, UTC seconds.
    pub hour_start: UnixSecs,
    pub ticks: BTreeMap<u64, ShortTick>,
}

/// A day of candles sealed out of the staging buffer.
#[derive(Debug)]
pub struct SealedCandles {
    /// Start of the day, UTC seconds.
    pub day_start: UnixSecs,
    pub candles: Box<CandleDay>,
}

/// Time-aligned staging for one symbol's write stream.
pub struct WriterBuffer {
    ticks: BTreeMap<u64, ShortTick>,
    hour_start: UnixSecs,
    candles: Box<CandleDay>,
    day_start: UnixSecs,
}

impl Default for WriterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterBuffer {
    pub fn new() -> Self {
        Self {
            ticks: BTreeMap::new(),
            hour_start: 0,
            candles: empty_candle_day(),
            day_start: 0,
        }
    }

    /// Drop any staged data and start a fresh write session.
    pub fn start(&mut self) {
        self.ticks.clear();
        self.hour_start = 0;
        *self.candles = [Candle::default(); crate::time::MINUTES_IN_DAY];
        self.day_start = 0;
    }

    /// Stage a tick; returns the previous hour when this tick seals it.
    pub fn write_tick(&mut self, tick: &Tick) -> Option<SealedTicks> {
        let hour = start_of_hour_ms(tick.t_ms);

        let mut sealed = None;
        if hour != self.hour_start {
            if self.hour_start != 0 && !self.ticks.is_empty() {
                sealed = Some(SealedTicks {
                    hour_start: self.hour_start,
                    ticks: std::mem::take(&mut self.ticks),
                });
            }
            self.ticks.clear();
            self.hour_start = hour;
        }

        self.ticks
            .insert(tick.t_ms, ShortTick::new(tick.bid, tick.ask));
        sealed
    }

    /// Stage a candle; returns the previous day when this candle seals it.
    pub fn write_candle(&mut self, candle: &Candle) -> Option<SealedCandles> {
        let day = start_of_day(candle.timestamp);

        let mut sealed = None;
        if day != self.day_start {
            if self.day_start != 0 {
                sealed = Some(SealedCandles {
                    day_start: self.day_start,
                    candles: std::mem::replace(&mut self.candles, empty_candle_day()),
                });
            } else {
                *self.candles = [Candle::default(); crate::time::MINUTES_IN_DAY];
            }
            self.day_start = day;
        }

        self.candles[minute_of_day(candle.timestamp)] = *candle;
        sealed
    }

    /// Seal whatever is staged and reset.
    pub fn stop(&mut self) -> (Option<SealedTicks>, Option<SealedCandles>) {
        let ticks = if self.hour_start != 0 && !self.ticks.is_empty() {
            Some(SealedTicks {
                hour_start: self.hour_start,
                ticks: std::mem::take(&mut self.ticks),
            })
        } else {
            None
        };

        let candles = if self.day_start != 0 {
            Some(SealedCandles {
                day_start: self.day_start,
                candles: std::mem::replace(&mut self.candles, empty_candle_day()),
            })
        } else {
            None
        };

        self.hour_start = 0;
        self.day_start = 0;
        self.ticks.clear();
        (ticks, candles)
    }
}
