//! FX Symbol Fleet and Trade P/L
//!
//! Holds one read-only quote engine per configured symbol, resolves the
//! cross rate that converts each symbol's quote currency into the account
//! currency, and prices FX trades from stored ticks.
//!
//! Cross resolution scans the symbol list in order and takes the first
//! match, direct before inverse; fleets with ambiguous conversion paths
//! should order their symbol lists deliberately.

use crate::types::{Candle, CandleSource, Period, Tick};
use crate::QuoteDb;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// One traded symbol. `prefix_count` skips broker prefixes before the
/// six-letter currency pair.
#[derive(Debug, Clone)]
pub struct FxSymbolConfig {
    pub symbol: String,
    pub prefix_count: usize,
    /// Pip size; defaulted from the pair when zero.
    pub point: f64,
    /// Units per lot; defaulted to 100 000 when zero.
    pub contract_size: f64,
}

impl FxSymbolConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            prefix_count: 0,
            point: 0.0,
            contract_size: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FxConfig {
    /// Directory holding one `<SYMBOL>.qdb` file per symbol.
    pub path: PathBuf,
    pub symbols: Vec<FxSymbolConfig>,
    pub account_currency: String,
    pub leverage: f64,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            symbols: Vec::new(),
            account_currency: "USD".to_string(),
            leverage: 100.0,
        }
    }
}

/// A trade to price. Either `symbol` or `symbol_index` selects the pair;
/// the close time falls back to `open + duration` when absent.
#[derive(Debug, Clone, Default)]
pub struct TradeFxSignal {
    pub symbol: String,
    pub symbol_index: usize,
    pub open_date_ms: u64,
    pub close_date_ms: u64,
    pub open_delay_ms: u32,
    pub close_delay_ms: u32,
    pub duration_ms: u32,
    pub lot_size: f64,
    /// `true` = buy, `false` = sell.
    pub direction: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFxResult {
    pub open_price: f64,
    pub close_price: f64,
    pub send_date_ms: u64,
    pub open_date_ms: u64,
    pub close_date_ms: u64,
    pub profit: f64,
    pub pips: f64,
    pub win: bool,
}

struct SymbolLegs {
    base: String,
    quote: String,
}

/// Fleet of per-symbol quote engines with cross-rate wiring.
pub struct FxSymbolDb {
    config: FxConfig,
    dbs: Vec<QuoteDb>,
    legs: Vec<SymbolLegs>,
    /// Direct cross per symbol: multiply by its bid.
    cross: Vec<Option<usize>>,
    /// Inverse cross per symbol: divide by its ask.
    cross_invert: Vec<Option<usize>>,
    symbol_to_index: HashMap<String, usize>,
}

impl FxSymbolDb {
    /// Open every symbol store read-only and resolve conversion pairs.
    pub fn init(mut config: FxConfig) -> Result<Self> {
        if config.symbols.is_empty() {
            bail!("fx fleet needs at least one symbol");
        }

        let mut dbs = Vec::with_capacity(config.symbols.len());
        for sc in &config.symbols {
            let file = config.path.join(format!("{}.qdb", sc.symbol));
            let db = QuoteDb::open(&file, true)
                .with_context(|| format!("open symbol store {}", file.display()))?;
            dbs.push(db);
        }

        // derive legs and fill defaults
        let mut legs = Vec::with_capacity(config.symbols.len());
        for sc in config.symbols.iter_mut() {
            let name = &sc.symbol;
            if name.len() < sc.prefix_count + 6 {
                bail!("symbol {:?} too short for a currency pair", name);
            }
            let base = name[sc.prefix_count..sc.prefix_count + 3].to_string();
            let quote = name[sc.prefix_count + 3..sc.prefix_count + 6].to_string();

            if sc.point == 0.0 {
                sc.point = if base == "JPY" || quote == "JPY" {
                    0.001
                } else {
                    0.00001
                };
            }
            if sc.contract_size == 0.0 {
                sc.contract_size = 100_000.0;
            }
            legs.push(SymbolLegs { base, quote });
        }

        let account = &config.account_currency;
        if !legs.iter().any(|l| &l.base == account || &l.quote == account) {
            bail!("account currency {:?} absent from the symbol set", account);
        }

        // first match in list order; direct conversion wins over inverse
        let mut cross = vec![None; legs.len()];
        let mut cross_invert = vec![None; legs.len()];
        for j in 0..legs.len() {
            if &legs[j].quote == account {
                continue;
            }
            for (i, li) in legs.iter().enumerate() {
                if &li.quote == account && li.base == legs[j].quote {
                    cross[j] = Some(i);
                    break;
                }
                if &li.base == account && li.quote == legs[j].quote {
                    cross_invert[j] = Some(i);
                    break;
                }
            }
            if cross[j].is_none() && cross_invert[j].is_none() {
                warn!(symbol = %config.symbols[j].symbol, "no conversion pair to account currency");
            }
        }

        let symbol_to_index = config
            .symbols
            .iter()
            .enumerate()
            .map(|(i, sc)| (sc.symbol.clone(), i))
            .collect();

        debug!(symbols = config.symbols.len(), account = %account, "fx fleet initialized");

        Ok(Self {
            config,
            dbs,
            legs,
            cross,
            cross_invert,
            symbol_to_index,
        })
    }

    pub fn config(&self) -> &FxConfig {
        &self.config
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbol_to_index.get(symbol).copied()
    }

    pub fn symbol_count(&self) -> usize {
        self.dbs.len()
    }

    // -------------------------------------------------------------------------
    // Trade pricing
    // -------------------------------------------------------------------------

    /// Price a trade from stored ticks. `None` when the symbol is unknown,
    /// the dates are inconsistent, or any required tick is absent.
    pub fn calc_trade_result(&mut self, signal: &TradeFxSignal) -> Option<TradeFxResult> {
        if signal.close_date_ms != 0 && signal.close_date_ms < signal.open_date_ms {
            return None;
        }

        let open_at = signal.open_date_ms + signal.open_delay_ms as u64;
        let close_at = if signal.close_date_ms == 0 {
            open_at + signal.duration_ms as u64 + signal.close_delay_ms as u64
        } else {
            signal.close_date_ms + signal.close_delay_ms as u64
        };

        let index = if signal.symbol.is_empty() {
            signal.symbol_index
        } else {
            self.symbol_index(&signal.symbol)?
        };
        if index >= self.dbs.len() {
            return None;
        }

        let (open_price, close_price, profit) =
            self.calc_profit(index, signal.lot_size, open_at, close_at, signal.direction)?;

        let point = self.config.symbols[index].point;
        let pips = if signal.direction {
            (close_price - open_price) / point
        } else {
            (open_price - close_price) / point
        };

        Some(TradeFxResult {
            open_price,
            close_price,
            send_date_ms: signal.open_date_ms,
            open_date_ms: open_at,
            close_date_ms: close_at,
            profit,
            pips,
            win: profit > 0.0,
        })
    }

    fn calc_profit(
        &mut self,
        index: usize,
        lot: f64,
        open_ms: u64,
        close_ms: u64,
        direction: bool,
    ) -> Option<(f64, f64, f64)> {
        let open_tick = self.dbs[index].get_tick_ms(open_ms)?;
        let close_tick = self.dbs[index].get_tick_ms(close_ms)?;

        let open_price = if direction { open_tick.ask } else { open_tick.bid };
        let close_price = if direction { close_tick.bid } else { close_tick.ask };

        let mut raw = lot * self.config.symbols[index].contract_size * self.config.leverage;
        raw *= if direction {
            close_price - open_price
        } else {
            open_price - close_price
        };

        // quote currency already the account currency
        if self.legs[index].quote == self.config.account_currency {
            return Some((open_price, close_price, raw));
        }

        // conversion at close time; that is where settlement happens
        if let Some(i) = self.cross[index] {
            let rate = self.dbs[i].get_tick_ms(close_ms)?;
            return Some((open_price, close_price, raw * rate.bid));
        }
        if let Some(i) = self.cross_invert[index] {
            let rate = self.dbs[i].get_tick_ms(close_ms)?;
            return Some((open_price, close_price, raw / rate.ask));
        }
        None
    }

    // -------------------------------------------------------------------------
    // Fleet reads
    // -------------------------------------------------------------------------

    pub fn get_candle(
        &mut self,
        index: usize,
        t: u64,
        period: Period,
        source: CandleSource,
    ) -> Option<Candle> {
        self.dbs.get_mut(index)?.get_candle(t, period, source)
    }

    pub fn get_candle_by_symbol(
        &mut self,
        symbol: &str,
        t: u64,
        period: Period,
        source: CandleSource,
    ) -> Option<Candle> {
        let index = self.symbol_index(symbol)?;
        self.get_candle(index, t, period, source)
    }

    pub fn get_tick(&mut self, index: usize, t: u64) -> Option<Tick> {
        self.dbs.get_mut(index)?.get_tick(t)
    }

    pub fn get_tick_ms(&mut self, index: usize, t_ms: u64) -> Option<Tick> {
        self.dbs.get_mut(index)?.get_tick_ms(t_ms)
    }

    pub fn get_next_tick_ms(&mut self, index: usize, t_ms: u64, t_ms_max: u64) -> Option<Tick> {
        self.dbs.get_mut(index)?.get_next_tick_ms(t_ms, t_ms_max)
    }

    /// Date range covered by *every* member store: the latest minimum and
    /// the earliest maximum. `None` when any store reports no data.
    pub fn get_min_max_date(&self, use_ticks: bool) -> Option<(u64, u64)> {
        let mut range: Option<(u64, u64)> = None;
        for db in &self.dbs {
            let (min, max) = db.get_min_max_date(use_ticks)?;
            range = Some(match range {
                None => (min, max),
                Some((a, b)) => (a.max(min), b.min(max)),
            });
        }
        range
    }
}
