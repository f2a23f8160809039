//! Two-Tier Price Read Cache
//!
//! Caches decoded hour-of-ticks and day-of-candles units around the most
//! recent probe time and answers point lookups, next-tick probes, range
//! scans, and synthetic-bar requests from them.
//!
//! Units are fetched through loader closures supplied at construction; the
//! loader's result is cached even when empty so an absent unit is not
//! refetched while it stays inside the window. Eviction runs after every
//! hydration pass, dropping units outside the configured window around the
//! probe.

use crate::time::{
    minute_of_day, start_of_day, start_of_hour, start_of_hour_ms, MS_PER_SEC, SECS_PER_DAY,
    SECS_PER_HOUR, SECS_PER_MIN,
};
use crate::types::{Candle, CandleDay, CandleSource, Period, PriceMode, ShortTick, Tick};
use std::collections::BTreeMap;

/// Decoded hour unit: `t_ms -> quote`.
pub type TickHour = BTreeMap<u64, ShortTick>;

/// Loads the hour unit starting at the given UTC second (empty when absent).
pub type TickLoader = Box<dyn FnMut(u64) -> TickHour + Send>;
/// Loads the day unit starting at the given UTC second (all-empty when absent).
pub type CandleLoader = Box<dyn FnMut(u64) -> Box<CandleDay> + Send>;

#[derive(Debug, Clone)]
pub struct PriceBufferConfig {
    /// Seconds of tick data to hydrate before a probe.
    pub tick_window_back: u64,
    /// Seconds of tick data to hydrate after a probe.
    pub tick_window_fwd: u64,
    /// Maximum age, in seconds, before a stale tick reads as absent.
    pub tick_deadtime: u64,
    /// Seconds of candle data to hydrate before a probe.
    pub candle_window_back: u64,
    /// Seconds of candle data to hydrate after a probe.
    pub candle_window_fwd: u64,
    /// Maximum trailing silence, in seconds, for tick-built bars.
    pub candle_deadtime: u64,
    /// Permit assembling bars from raw ticks.
    pub candle_use_tick: bool,
    /// Quote side used for tick-built bars.
    pub price_mode: PriceMode,
}

impl Default for PriceBufferConfig {
    fn default() -> Self {
        Self {
            tick_window_back: SECS_PER_HOUR,
            tick_window_fwd: SECS_PER_HOUR,
            tick_deadtime: SECS_PER_MIN,
            candle_window_back: 10 * SECS_PER_DAY,
            candle_window_fwd: 10 * SECS_PER_DAY,
            candle_deadtime: SECS_PER_MIN,
            candle_use_tick: true,
            price_mode: PriceMode::Bid,
        }
    }
}

pub struct PriceBuffer {
    pub config: PriceBufferConfig,
    on_read_ticks: TickLoader,
    on_read_candles: CandleLoader,
    tick_buffer: BTreeMap<u64, TickHour>,
    candle_buffer: BTreeMap<u64, Box<CandleDay>>,
}

impl PriceBuffer {
    pub fn new(
        config: PriceBufferConfig,
        on_read_ticks: TickLoader,
        on_read_candles: CandleLoader,
    ) -> Self {
        Self {
            config,
            on_read_ticks,
            on_read_candles,
            tick_buffer: BTreeMap::new(),
            candle_buffer: BTreeMap::new(),
        }
    }

    /// Drop every cached unit.
    pub fn clear(&mut self) {
        self.tick_buffer.clear();
        self.candle_buffer.clear();
    }

    // -------------------------------------------------------------------------
    // Tick hydration and eviction
    // -------------------------------------------------------------------------

    fn tick_window(&self, t_ms: u64) -> (u64, u64) {
        let t = t_ms / MS_PER_SEC;
        let start = if t <= self.config.tick_window_back {
            0
        } else {
            start_of_hour(t - self.config.tick_window_back)
        };
        let stop = start_of_hour(t + self.config.tick_window_fwd);
        (start, stop)
    }

    fn hydrate_ticks(&mut self, t_ms: u64) {
        let (start, stop) = self.tick_window(t_ms);
        let mut rd = start;
        while rd <= stop {
            if !self.tick_buffer.contains_key(&rd) {
                let hour = (self.on_read_ticks)(rd);
                self.tick_buffer.insert(rd, hour);
            }
            rd += SECS_PER_HOUR;
        }
    }

    /// Hydrate forward from the probe hour until a bucket holding a tick
    /// past `t_ms` has been seen and the forward window is filled, bounded
    /// by `t_ms_max`.
    fn hydrate_next_ticks(&mut self, t_ms: u64, t_ms_max: u64) {
        let t = t_ms / MS_PER_SEC;
        let t_max = t_ms_max / MS_PER_SEC;

        let stop = start_of_hour(t + self.config.tick_window_fwd);

        let mut has_later_tick = false;
        let mut rd = start_of_hour(t);
        loop {
            if !self.tick_buffer.contains_key(&rd) {
                let hour = (self.on_read_ticks)(rd);
                if !has_later_tick {
                    if let Some((&last, _)) = hour.iter().next_back() {
                        if last > t_ms {
                            has_later_tick = true;
                        }
                    }
                }
                self.tick_buffer.insert(rd, hour);
            }
            rd += SECS_PER_HOUR;
            if rd > stop && has_later_tick {
                break;
            }
            if rd > t_max {
                break;
            }
        }
    }

    fn evict_ticks(&mut self, t_ms: u64) {
        let (start, stop) = self.tick_window(t_ms);
        self.tick_buffer.retain(|&k, _| k >= start && k <= stop);
    }

    // -------------------------------------------------------------------------
    // Tick lookups over the cache
    // -------------------------------------------------------------------------

    fn deadtime_ok(&self, probe_ms: u64, tick_ms: u64) -> bool {
        (probe_ms.saturating_sub(tick_ms)) / MS_PER_SEC <= self.config.tick_deadtime
    }

    /// Most recent tick at or before `t_ms`, from cache only. The probe
    /// hour must be cached for the lookup to engage at all.
    fn lookup_tick(&self, t_ms: u64) -> Option<Tick> {
        let hour = start_of_hour_ms(t_ms);
        let bucket = self.tick_buffer.get(&hour)?;

        let found = match bucket.range(..=t_ms).next_back() {
            Some((&k, v)) => (k, *v),
            None => {
                // walk back to the nearest earlier non-empty cached bucket
                let (&k, v) = self
                    .tick_buffer
                    .range(..hour)
                    .rev()
                    .find_map(|(_, b)| b.iter().next_back())?;
                (k, *v)
            }
        };

        if !self.deadtime_ok(t_ms, found.0) {
            return None;
        }
        Some(Tick::new(found.1.bid, found.1.ask, found.0))
    }

    /// First tick strictly after `t_ms`, from cache only, walking forward
    /// no further than the hour containing `t_ms_max`.
    fn lookup_next_tick(&self, t_ms: u64, t_ms_max: u64) -> Option<Tick> {
        let hour = start_of_hour_ms(t_ms);
        let bucket = self.tick_buffer.get(&hour)?;

        let found = match bucket.range(t_ms + 1..).next() {
            Some((&k, v)) => (k, *v),
            None => {
                let stop_hour = start_of_hour_ms(t_ms_max);
                if stop_hour <= hour {
                    return None;
                }
                let (&k, v) = self
                    .tick_buffer
                    .range(hour + 1..=stop_hour)
                    .find_map(|(_, b)| b.iter().next())?;
                (k, *v)
            }
        };
        Some(Tick::new(found.1.bid, found.1.ask, found.0))
    }

    /// Ticks in `[a_ms, b_ms]`, prefixed with the most recent tick at or
    /// before `a_ms` when one exists, as an open-price seed. Missing hour
    /// buckets hydrate on demand.
    fn collect_ticks(&mut self, a_ms: u64, b_ms: u64) -> Vec<Tick> {
        let start_hour = start_of_hour_ms(a_ms);
        let stop_hour = start_of_hour_ms(b_ms);

        let mut rd = start_hour;
        while rd <= stop_hour {
            if !self.tick_buffer.contains_key(&rd) {
                let hour = (self.on_read_ticks)(rd);
                self.tick_buffer.insert(rd, hour);
            }
            rd += SECS_PER_HOUR;
        }

        let mut out = Vec::new();

        let seed = match self
            .tick_buffer
            .get(&start_hour)
            .and_then(|b| b.range(..=a_ms).next_back())
        {
            Some((&k, v)) => Some((k, *v)),
            None => self
                .tick_buffer
                .range(..start_hour)
                .rev()
                .find_map(|(_, b)| b.iter().next_back())
                .map(|(&k, v)| (k, *v)),
        };
        if let Some((k, v)) = seed {
            out.push(Tick::new(v.bid, v.ask, k));
        }

        if a_ms < b_ms {
            for (_, bucket) in self.tick_buffer.range(start_hour..=stop_hour) {
                for (&k, v) in bucket.range(a_ms + 1..=b_ms) {
                    out.push(Tick::new(v.bid, v.ask, k));
                }
            }
        }
        out
    }

    // -------------------------------------------------------------------------
    // Candle hydration and eviction
    // -------------------------------------------------------------------------

    fn candle_window(&self, t: u64) -> (u64, u64) {
        let start = start_of_day(t.saturating_sub(self.config.candle_window_back));
        let stop = start_of_day(t + self.config.candle_window_fwd);
        (start, stop)
    }

    fn hydrate_candles(&mut self, t: u64) {
        let (start, stop) = self.candle_window(t);
        let mut rd = start;
        while rd <= stop {
            if !self.candle_buffer.contains_key(&rd) {
                let day = (self.on_read_candles)(rd);
                self.candle_buffer.insert(rd, day);
            }
            rd += SECS_PER_DAY;
        }
    }

    fn evict_candles(&mut self, t: u64) {
        let (start, stop) = self.candle_window(t);
        self.candle_buffer.retain(|&k, _| k >= start && k <= stop);
    }

    // -------------------------------------------------------------------------
    // Bar assembly
    // -------------------------------------------------------------------------

    fn candle_from_day(&self, t: u64, period: Period) -> Option<Candle> {
        let day = start_of_day(t);
        let bucket = self.candle_buffer.get(&day)?;
        let minute = minute_of_day(t);

        if period == Period::M1 {
            let c = bucket[minute];
            return (!c.is_empty()).then_some(c);
        }

        let n = period.minutes() as usize;
        let m0 = minute - minute % n;

        let mut bar = Candle {
            timestamp: day + m0 as u64 * SECS_PER_MIN,
            ..Candle::default()
        };
        for c in bucket[m0..=minute].iter().filter(|c| !c.is_empty()) {
            if bar.open == 0.0 {
                bar.open = c.open;
            }
            if bar.high == 0.0 || c.high > bar.high {
                bar.high = c.high;
            }
            if bar.low == 0.0 || c.low < bar.low {
                bar.low = c.low;
            }
            bar.close = c.close;
            bar.volume += c.volume;
        }

        (!bar.is_empty()).then_some(bar)
    }

    fn candle_from_ticks(&mut self, t: u64, period: Period) -> Option<Candle> {
        let span = period.seconds();
        let t_start = t - t % span;

        let ticks = self.collect_ticks(t_start * MS_PER_SEC, t * MS_PER_SEC);
        let last = ticks.last()?;

        if self.config.candle_deadtime > 0 {
            let silence = (t * MS_PER_SEC).saturating_sub(last.t_ms) / MS_PER_SEC;
            if silence > self.config.candle_deadtime {
                return None;
            }
        }

        let mut bar = Candle::default();
        for tick in &ticks {
            let price = self.config.price_mode.price_of(tick);
            if bar.open == 0.0 {
                bar.open = price;
                bar.high = price;
                bar.low = price;
                bar.timestamp = t_start;
            }
            if price > bar.high {
                bar.high = price;
            }
            if price < bar.low {
                bar.low = price;
            }
            bar.close = price;
        }

        (!bar.is_empty()).then_some(bar)
    }

    // -------------------------------------------------------------------------
    // Public queries
    // -------------------------------------------------------------------------

    /// Bar at `t` for the given timeframe, from stored bars or raw ticks.
    pub fn get_candle(&mut self, t: u64, period: Period, source: CandleSource) -> Option<Candle> {
        match source {
            CandleSource::FromCandles => {
                if !self.candle_buffer.contains_key(&start_of_day(t)) {
                    self.hydrate_candles(t);
                    self.evict_candles(t);
                }
                self.candle_from_day(t, period)
            }
            CandleSource::FromTicks => {
                if !self.config.candle_use_tick {
                    return None;
                }
                let t_ms = t * MS_PER_SEC;
                if self.lookup_tick(t_ms).is_none() {
                    self.evict_ticks(t_ms);
                    self.hydrate_ticks(t_ms);
                }
                self.candle_from_ticks(t, period)
            }
        }
    }

    /// Most recent tick at or before `t` seconds, within the dead-time.
    pub fn get_tick(&mut self, t: u64) -> Option<Tick> {
        self.get_tick_ms(t * MS_PER_SEC)
    }

    /// Most recent tick at or before `t_ms`, within the dead-time.
    pub fn get_tick_ms(&mut self, t_ms: u64) -> Option<Tick> {
        if let Some(tick) = self.lookup_tick(t_ms) {
            return Some(tick);
        }
        self.evict_ticks(t_ms);
        self.hydrate_ticks(t_ms);
        self.lookup_tick(t_ms)
    }

    /// First tick strictly after `t_ms`, scanning no further than
    /// `t_ms_max`. No dead-time gating.
    pub fn get_next_tick_ms(&mut self, t_ms: u64, t_ms_max: u64) -> Option<Tick> {
        if let Some(tick) = self.lookup_next_tick(t_ms, t_ms_max) {
            return Some(tick);
        }
        self.evict_ticks(t_ms);
        self.hydrate_next_ticks(t_ms, t_ms_max);
        self.lookup_next_tick(t_ms, t_ms_max)
    }
}
