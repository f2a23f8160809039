//! Historical Replay Engine
//!
//! Drives user callbacks over a date range, symbol by symbol, with one
//! worker thread per hardware thread. Each worker owns a full read-only
//! fleet of symbol engines, so the hot path shares no mutable state; the
//! only shared data are the config, the precomputed intra-day grid, and the
//! user callbacks, which must therefore be thread-safe.
//!
//! The grid holds every intra-day offset at which something fires: a tick
//! probe inside at least one trade window, a candle boundary, or both.
//! Replaying the same config twice yields identical callback sequences per
//! symbol; no wall clock or thread timing enters the dispatch decisions.

use crate::fx::{FxConfig, FxSymbolDb};
use crate::time::{ms_to_sec, start_of_day, start_of_minute, MS_PER_DAY, MS_PER_SEC, SECS_PER_DAY, SECS_PER_MIN};
use crate::types::{Candle, CandleSource, Period, Tick, TimePeriod};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

pub type OnSymbol = Box<dyn Fn(usize) -> bool + Send + Sync>;
pub type OnCandle = Box<dyn Fn(&mut FxSymbolDb, usize, u64, &BTreeSet<i32>, &Candle) + Send + Sync>;
pub type OnTick = Box<dyn Fn(&mut FxSymbolDb, usize, u64, &BTreeSet<i32>, &Tick) + Send + Sync>;
pub type OnTest = Box<dyn Fn(&mut FxSymbolDb, usize, u64, &BTreeSet<i32>) + Send + Sync>;
pub type OnDateMsg = Box<dyn Fn(usize, u64) + Send + Sync>;
pub type OnEndTestSymbol = Box<dyn Fn(usize) + Send + Sync>;
pub type OnEndTestThread = Box<dyn Fn(usize, usize) + Send + Sync>;
pub type OnEndTest = Box<dyn Fn() + Send + Sync>;
pub type OnMsg = Box<dyn Fn(&str) + Send + Sync>;

pub struct ReplayConfig {
    /// Symbol fleet definition; every worker opens its own copy read-only.
    pub market: FxConfig,
    /// Warm-up margin before `start_date`, in seconds.
    pub pre_start_period: u64,
    /// First test day, UTC seconds.
    pub start_date: u64,
    /// Last test day, UTC seconds.
    pub stop_date: u64,
    /// Seconds between intra-day tick probes.
    pub tick_period: f64,
    /// Seconds per dispatched candle.
    pub timeframe: u64,
    /// Fire `on_test` only on ticks newer than any seen in the previous
    /// probe period.
    pub use_new_tick_mode: bool,
    pub trade_periods: Vec<TimePeriod>,

    pub on_symbol: Option<OnSymbol>,
    pub on_candle: Option<OnCandle>,
    pub on_tick: Option<OnTick>,
    pub on_test: Option<OnTest>,
    pub on_date_msg: Option<OnDateMsg>,
    pub on_end_test_symbol: Option<OnEndTestSymbol>,
    pub on_end_test_thread: Option<OnEndTestThread>,
    pub on_end_test: Option<OnEndTest>,
    pub on_msg: Option<OnMsg>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            market: FxConfig::default(),
            pre_start_period: 7 * SECS_PER_DAY,
            start_date: 0,
            stop_date: 0,
            tick_period: 1.0,
            timeframe: SECS_PER_MIN,
            use_new_tick_mode: false,
            trade_periods: Vec::new(),
            on_symbol: None,
            on_candle: None,
            on_tick: None,
            on_test: None,
            on_date_msg: None,
            on_end_test_symbol: None,
            on_end_test_thread: None,
            on_end_test: None,
            on_msg: None,
        }
    }
}

/// One retained intra-day offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridStep {
    /// Milliseconds after midnight.
    pub offset_ms: u64,
    /// Ids of every trade window covering this offset.
    pub period_ids: BTreeSet<i32>,
    /// The offset sits on a timeframe boundary.
    pub is_candle: bool,
}

/// Offsets fire at tick-probe multiples and candle boundaries; a probe is
/// retained only when inside a trade window, a boundary always.
pub(crate) fn build_grid(
    tick_period_ms: u64,
    timeframe_ms: u64,
    trade_periods: &[TimePeriod],
) -> Vec<GridStep> {
    let mut grid = Vec::new();
    let mut offset_ms = 0u64;
    while offset_ms < MS_PER_DAY {
        let t = ms_to_sec(offset_ms);
        let period_ids: BTreeSet<i32> = trade_periods
            .iter()
            .filter(|p| p.contains(t))
            .map(|p| p.id)
            .collect();
        let is_candle = offset_ms % timeframe_ms == 0;

        if !period_ids.is_empty() || is_candle {
            grid.push(GridStep {
                offset_ms,
                period_ids,
                is_candle,
            });
        }
        offset_ms += tick_period_ms;
    }
    grid
}

pub struct ReplayEngine {
    config: ReplayConfig,
    grid: Vec<GridStep>,
    fleets: Vec<FxSymbolDb>,
    timeframe_period: Period,
    tick_period_ms: u64,
}

impl ReplayEngine {
    /// Validate the config, open one fleet per worker thread, and build the
    /// grid. Any store that cannot be opened fails here, before any thread
    /// runs.
    pub fn init(config: ReplayConfig) -> Result<Self> {
        let tick_period_ms = (config.tick_period * MS_PER_SEC as f64 + 0.5) as u64;
        if tick_period_ms == 0 {
            bail!("tick_period must be positive");
        }
        let timeframe_period = match Period::from_minutes(config.timeframe / SECS_PER_MIN) {
            Some(p) if config.timeframe % SECS_PER_MIN == 0 => p,
            _ => bail!("timeframe {}s is not a supported bar period", config.timeframe),
        };
        if config.stop_date < config.start_date {
            bail!("stop_date precedes start_date");
        }

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let mut fleets = Vec::with_capacity(threads);
        for _ in 0..threads {
            match FxSymbolDb::init(config.market.clone()) {
                Ok(fleet) => fleets.push(fleet),
                Err(e) => {
                    if let Some(msg) = &config.on_msg {
                        msg(&format!("symbol store open failed: {e:#}"));
                    }
                    return Err(e).context("open replay fleet");
                }
            }
        }

        let grid = build_grid(
            tick_period_ms,
            config.timeframe * MS_PER_SEC,
            &config.trade_periods,
        );
        debug!(
            steps = grid.len(),
            threads,
            symbols = config.market.symbols.len(),
            "replay grid ready"
        );

        Ok(Self {
            config,
            grid,
            fleets,
            timeframe_period,
            tick_period_ms,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.fleets.len()
    }

    /// Run the whole test. Single-shot: the per-thread fleets are consumed.
    pub fn start(&mut self) -> Result<()> {
        let fleets = std::mem::take(&mut self.fleets);
        if fleets.is_empty() {
            bail!("replay already ran; re-init the engine");
        }
        let thread_count = fleets.len();

        let config = &self.config;
        let grid = &self.grid;
        let timeframe_period = self.timeframe_period;
        let tick_period_ms = self.tick_period_ms;
        let date_lock: Mutex<()> = Mutex::new(());

        let symbol_count = config.market.symbols.len();
        let start_day_ms = start_of_day(config.start_date) * MS_PER_SEC;
        let pre_start_day_ms =
            start_of_day(config.start_date.saturating_sub(config.pre_start_period)) * MS_PER_SEC;
        let stop_day_ms = start_of_day(config.stop_date) * MS_PER_SEC;

        std::thread::scope(|scope| {
            for (n, mut fleet) in fleets.into_iter().enumerate() {
                let date_lock = &date_lock;
                scope.spawn(move || {
                    let mut sym = n;
                    while sym < symbol_count {
                        let wanted = config
                            .on_symbol
                            .as_ref()
                            .map(|cb| cb(sym))
                            .unwrap_or(true);
                        if wanted {
                            Self::run_symbol(
                                config,
                                grid,
                                &mut fleet,
                                sym,
                                timeframe_period,
                                tick_period_ms,
                                pre_start_day_ms,
                                start_day_ms,
                                stop_day_ms,
                                date_lock,
                            );
                            if let Some(cb) = &config.on_end_test_symbol {
                                cb(sym);
                            }
                        }
                        sym += thread_count;
                    }
                    if let Some(cb) = &config.on_end_test_thread {
                        cb(n, thread_count);
                    }
                });
            }
        });

        if let Some(cb) = &config.on_end_test {
            cb();
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_symbol(
        config: &ReplayConfig,
        grid: &[GridStep],
        fleet: &mut FxSymbolDb,
        sym: usize,
        timeframe_period: Period,
        tick_period_ms: u64,
        pre_start_day_ms: u64,
        start_day_ms: u64,
        stop_day_ms: u64,
        date_lock: &Mutex<()>,
    ) {
        let mut last_update_ms: u64 = 0;
        let mut new_tick = false;

        let mut day_ms = pre_start_day_ms;
        while day_ms <= stop_day_ms {
            if let Some(cb) = &config.on_date_msg {
                let _guard = date_lock.lock();
                cb(sym, day_ms);
            }
            if let Some(date) = chrono::DateTime::from_timestamp((day_ms / MS_PER_SEC) as i64, 0) {
                debug!(symbol = sym, date = %date.format("%Y-%m-%d"), "replay day");
            }

            for step in grid {
                let t_ms = day_ms + step.offset_ms;

                let dispatched = catch_unwind(AssertUnwindSafe(|| {
                    if step.is_candle {
                        let t = ms_to_sec(t_ms);
                        let candle_ts = start_of_minute(t).saturating_sub(SECS_PER_MIN);
                        if let Some(candle) =
                            fleet.get_candle(sym, candle_ts, timeframe_period, CandleSource::FromCandles)
                        {
                            if let Some(cb) = &config.on_candle {
                                cb(fleet, sym, t_ms, &step.period_ids, &candle);
                            }
                            last_update_ms = (candle.timestamp + SECS_PER_MIN) * MS_PER_SEC;
                        }
                        if config.use_new_tick_mode {
                            if let Some(tick) = fleet.get_tick_ms(sym, t_ms) {
                                if tick.t_ms > t_ms.saturating_sub(tick_period_ms) {
                                    new_tick = true;
                                }
                            }
                        }
                    } else if let Some(tick) = fleet.get_tick_ms(sym, t_ms) {
                        if tick.t_ms > last_update_ms {
                            last_update_ms = tick.t_ms;
                            if let Some(cb) = &config.on_tick {
                                cb(fleet, sym, t_ms, &step.period_ids, &tick);
                            }
                            new_tick = true;
                        }
                    }

                    if config.on_test.is_some()
                        && day_ms >= start_day_ms
                        && !step.period_ids.is_empty()
                    {
                        let fire = if config.use_new_tick_mode {
                            std::mem::take(&mut new_tick)
                        } else {
                            true
                        };
                        if fire {
                            if let Some(cb) = &config.on_test {
                                cb(fleet, sym, t_ms, &step.period_ids);
                            }
                        }
                    }
                }));

                if dispatched.is_err() {
                    warn!(symbol = sym, t_ms, "callback panicked, skipping offset");
                    if let Some(msg) = &config.on_msg {
                        msg(&format!("callback panicked at symbol {sym}, t_ms {t_ms}"));
                    }
                }
            }

            day_ms += MS_PER_DAY;
        }
    }
}
