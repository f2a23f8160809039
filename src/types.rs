//! Core market-data types shared across the crate.

use crate::time::{self, UnixMillis, UnixSecs};

/// One 1-minute OHLCV bar.
///
/// A candle is considered empty when it has no timestamp or no close price;
/// empty slots are how a day-of-candles unit represents missing minutes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// UTC seconds, minute-aligned.
    pub timestamp: UnixSecs,
}

impl Candle {
    pub fn new(
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        timestamp: UnixSecs,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            timestamp,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamp == 0 || self.close == 0.0
    }
}

/// One bid/ask quote.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    /// UTC milliseconds.
    pub t_ms: UnixMillis,
}

impl Tick {
    pub fn new(bid: f64, ask: f64, t_ms: UnixMillis) -> Self {
        Self { bid, ask, t_ms }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.t_ms == 0
    }
}

/// Tick payload without its timestamp; the key of the hour map carries it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShortTick {
    pub bid: f64,
    pub ask: f64,
}

impl ShortTick {
    pub fn new(bid: f64, ask: f64) -> Self {
        Self { bid, ask }
    }
}

/// A dense day of 1-minute candles indexed by minute-of-day.
pub type CandleDay = [Candle; time::MINUTES_IN_DAY];

/// Allocate an all-empty day.
pub fn empty_candle_day() -> Box<CandleDay> {
    Box::new([Candle::default(); time::MINUTES_IN_DAY])
}

/// Bar timeframes, as minutes per bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Period {
    M1 = 1,
    M5 = 5,
    M15 = 15,
    M30 = 30,
    H1 = 60,
    H4 = 240,
    D1 = 1440,
}

impl Period {
    #[inline]
    pub fn minutes(self) -> u64 {
        self as u64
    }

    #[inline]
    pub fn seconds(self) -> u64 {
        self.minutes() * time::SECS_PER_MIN
    }

    pub fn from_minutes(minutes: u64) -> Option<Self> {
        Some(match minutes {
            1 => Period::M1,
            5 => Period::M5,
            15 => Period::M15,
            30 => Period::M30,
            60 => Period::H1,
            240 => Period::H4,
            1440 => Period::D1,
            _ => return None,
        })
    }
}

/// Which side of the quote feeds a tick-built bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceMode {
    #[default]
    Bid,
    Ask,
    Mid,
}

impl PriceMode {
    #[inline]
    pub fn price_of(self, tick: &Tick) -> f64 {
        match self {
            PriceMode::Bid => tick.bid,
            PriceMode::Ask => tick.ask,
            PriceMode::Mid => (tick.bid + tick.ask) / 2.0,
        }
    }
}

/// Where a requested bar is assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandleSource {
    #[default]
    FromCandles,
    FromTicks,
}

/// Sentinel id for a trade window without a caller-assigned id.
pub const TIME_PERIOD_NO_ID: i32 = i32::MIN;

/// A point inside the day, stored as second-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimePoint {
    pub second_day: u32,
}

impl TimePoint {
    pub fn new(hh: u32, mm: u32, ss: u32) -> Self {
        Self {
            second_day: hh * 3600 + mm * 60 + ss,
        }
    }
}

/// An intra-day trading window. The stop bound is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePeriod {
    pub start: TimePoint,
    pub stop: TimePoint,
    pub id: i32,
}

impl TimePeriod {
    pub fn new(start: TimePoint, stop: TimePoint, id: i32) -> Self {
        Self { start, stop, id }
    }

    /// Whether the timestamp's second-of-day falls inside the window.
    #[inline]
    pub fn contains(&self, t: UnixSecs) -> bool {
        let sd = time::second_of_day(t);
        sd >= self.start.second_day && sd <= self.stop.second_day
    }
}

/// Recognized per-symbol metadata entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataKey {
    SymbolName,
    SymbolDigits,
    SymbolDataFeedSource,
}

impl MetadataKey {
    pub fn as_str(self) -> &'static str {
        match self {
            MetadataKey::SymbolName => "SYMBOL_NAME",
            MetadataKey::SymbolDigits => "SYMBOL_DIGITS",
            MetadataKey::SymbolDataFeedSource => "SYMBOL_DATA_FEED_SOURCE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_empty_rules() {
        assert!(Candle::default().is_empty());
        let no_close = Candle::new(1.0, 1.0, 1.0, 0.0, 0.0, 1_700_000_000);
        assert!(no_close.is_empty());
        let live = Candle::new(1.0, 1.1, 0.9, 1.05, 3.0, 1_700_000_000);
        assert!(!live.is_empty());
    }

    #[test]
    fn test_period_from_minutes() {
        assert_eq!(Period::from_minutes(5), Some(Period::M5));
        assert_eq!(Period::from_minutes(240), Some(Period::H4));
        assert_eq!(Period::from_minutes(7), None);
        assert_eq!(Period::H1.seconds(), 3600);
    }

    #[test]
    fn test_time_period_inclusive_stop() {
        let w = TimePeriod::new(TimePoint::new(10, 15, 0), TimePoint::new(10, 15, 5), 2);
        let day = 1_699_920_000; // start of day
        assert!(!w.contains(day + 10 * 3600 + 14 * 60 + 59));
        assert!(w.contains(day + 10 * 3600 + 15 * 60));
        assert!(w.contains(day + 10 * 3600 + 15 * 60 + 5));
        assert!(!w.contains(day + 10 * 3600 + 15 * 60 + 6));
    }

    #[test]
    fn test_price_mode_selection() {
        let tick = Tick::new(1.0, 2.0, 1);
        assert_eq!(PriceMode::Bid.price_of(&tick), 1.0);
        assert_eq!(PriceMode::Ask.price_of(&tick), 2.0);
        assert_eq!(PriceMode::Mid.price_of(&tick), 1.5);
    }
}
